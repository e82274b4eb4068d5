//! # Page Lifecycle Module
//!
//! Mutable per-request instances configured from immutable blueprints.
//!
//! A [`Page`] is created (or recycled) when a route resolves, configured with
//! the request and its response sink, and then walks a fixed state machine:
//!
//! ```text
//! Idle → Configuring → Discovering → RenderingShell → Streaming → Ended
//! ```
//!
//! `Ended` is terminal and entered exactly once, guarded by the `ended` flag
//! in the streaming writer. Configuration clears every per-request table
//! (connections, enabled, disabled, output queue), so a pooled instance can
//! never leak state between requests; the generation counter bumped by
//! [`Poolable::reset`] lets stale render callbacks detect that their page has
//! been reused and discard their output.
//!
//! Authorization discovery runs the same sequential-guard pattern as route
//! resolution, but produces a set rather than a first match: every child is
//! tested in order, accepted children go to `enabled`, rejected ones to
//! `disabled`.

use crate::blueprint::{PageBlueprint, PageletBlueprint};
use crate::dispatcher::RequestContext;
use crate::ids::{PageId, PageletId};
use crate::orchestration::Transport;
use crate::pool::{Pool, Poolable};
use crate::server::response::ResponseSink;
use crate::writer::Fragment;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

/// Page instance lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Idle,
    Configuring,
    Discovering,
    RenderingShell,
    Streaming,
    Ended,
}

/// Mutable pagelet instance, one per active request or live binding.
///
/// Never shared between two concurrent requests: the pool hands an instance
/// to exactly one page at a time, and `reset` bumps the generation so a
/// callback from a previous life can be told apart.
pub struct Pagelet {
    blueprint: Option<Arc<PageletBlueprint>>,
    /// Fresh per configure.
    pub id: PageletId,
    /// Instance id of the owning page, used to validate late callbacks.
    pub page: Option<PageId>,
    /// Bumped on every reset.
    pub generation: u64,
    pub enabled: bool,
    /// Client-supplied id for a live sub-channel, preferred over `id` in
    /// outbound envelopes when present.
    pub client_ref: Option<String>,
}

impl Default for Pagelet {
    fn default() -> Self {
        Pagelet {
            blueprint: None,
            id: PageletId::new(),
            page: None,
            generation: 0,
            enabled: false,
            client_ref: None,
        }
    }
}

impl Poolable for Pagelet {
    fn reset(&mut self) {
        self.blueprint = None;
        self.page = None;
        self.enabled = false;
        self.client_ref = None;
        self.generation += 1;
    }
}

impl Pagelet {
    /// Bind this instance to its owning page and blueprint, generating a
    /// fresh unique id. No structural state may be added afterwards.
    pub fn configure(&mut self, page: &Page, blueprint: Arc<PageletBlueprint>) {
        self.id = PageletId::new();
        self.page = Some(page.id);
        self.blueprint = Some(blueprint);
        self.enabled = true;
        self.client_ref = None;
    }

    pub fn blueprint(&self) -> Option<&Arc<PageletBlueprint>> {
        self.blueprint.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.blueprint.as_ref().map(|b| b.name.as_ref())
    }

    /// The id used in outbound fragment envelopes.
    pub fn wire_id(&self) -> String {
        self.client_ref.clone().unwrap_or_else(|| self.id.to_string())
    }
}

/// Mutable page instance, one per active request or live connection.
pub struct Page {
    blueprint: Option<Arc<PageBlueprint>>,
    /// Fresh per configure.
    pub id: PageId,
    /// Bumped on every reset; checked by render callbacks before writing.
    pub generation: u64,
    pub state: PageState,
    /// Authorized child pagelets, in blueprint order.
    pub enabled: Vec<Pagelet>,
    /// Children whose guard rejected the request.
    pub disabled: Vec<Pagelet>,
    connections: HashMap<String, Arc<dyn Transport>>,
    ctx: Option<RequestContext>,
    sink: Option<Arc<dyn ResponseSink>>,
    // Streaming writer state. Output ordering is write-call order: a FIFO
    // queue drained by a single flush consumer.
    pub(crate) queue: VecDeque<Fragment>,
    pub(crate) flushing: bool,
    pub(crate) flushed: usize,
    pub(crate) ended: bool,
}

impl Default for Page {
    fn default() -> Self {
        Page {
            blueprint: None,
            id: PageId::new(),
            generation: 0,
            state: PageState::Idle,
            enabled: Vec::new(),
            disabled: Vec::new(),
            connections: HashMap::new(),
            ctx: None,
            sink: None,
            queue: VecDeque::new(),
            flushing: false,
            flushed: 0,
            ended: false,
        }
    }
}

impl Poolable for Page {
    fn reset(&mut self) {
        self.blueprint = None;
        self.state = PageState::Idle;
        self.enabled.clear();
        self.disabled.clear();
        self.connections.clear();
        self.ctx = None;
        self.sink = None;
        self.queue.clear();
        self.flushing = false;
        self.flushed = 0;
        self.ended = false;
        self.generation += 1;
    }
}

impl Page {
    /// Configure this instance for one HTTP request.
    ///
    /// Clears all per-request tables, generates a fresh instance id, then
    /// discovers which child pagelets are authorized. Guards are evaluated
    /// strictly in blueprint order, one at a time; a guard error aborts
    /// configuration and propagates (the dispatcher routes it to the 500
    /// fallback). Ends in `RenderingShell`: the dispatcher renders and
    /// writes the shell next.
    pub fn configure(
        &mut self,
        blueprint: Arc<PageBlueprint>,
        ctx: RequestContext,
        sink: Arc<dyn ResponseSink>,
        pagelets: &Pool<Pagelet>,
    ) -> anyhow::Result<()> {
        self.state = PageState::Configuring;
        self.clear_request_state(pagelets);
        self.id = PageId::new();
        self.blueprint = Some(Arc::clone(&blueprint));
        self.ctx = Some(ctx);
        self.sink = Some(sink);

        self.state = PageState::Discovering;
        self.discover(pagelets)?;

        info!(
            page = %self.id,
            blueprint = %blueprint.id,
            enabled = self.enabled.len(),
            disabled = self.disabled.len(),
            "Page configured"
        );
        self.state = PageState::RenderingShell;
        Ok(())
    }

    /// Bind this instance to a live connection instead of an HTTP exchange.
    ///
    /// No authorization discovery runs here: pagelets are enabled one by one
    /// as the client binds sub-channels. The flush gate opens immediately so
    /// re-rendered fragments stream out as soon as they are written.
    pub fn bind_live(
        &mut self,
        blueprint: Arc<PageBlueprint>,
        ctx: RequestContext,
        sink: Arc<dyn ResponseSink>,
        pagelets: &Pool<Pagelet>,
    ) {
        self.state = PageState::Configuring;
        self.clear_request_state(pagelets);
        self.id = PageId::new();
        self.blueprint = Some(blueprint);
        self.ctx = Some(ctx);
        self.sink = Some(sink);
        self.flushing = true;
        self.state = PageState::Streaming;
    }

    fn clear_request_state(&mut self, pagelets: &Pool<Pagelet>) {
        for pagelet in self.enabled.drain(..).chain(self.disabled.drain(..)) {
            pagelets.release(pagelet);
        }
        self.connections.clear();
        self.queue.clear();
        self.flushing = false;
        self.flushed = 0;
        self.ended = false;
    }

    fn discover(&mut self, pagelets: &Pool<Pagelet>) -> anyhow::Result<()> {
        let blueprint = match &self.blueprint {
            Some(b) => Arc::clone(b),
            None => return Ok(()),
        };
        let ctx = self.ctx.clone();
        for child in &blueprint.pagelets {
            let mut instance = pagelets.alloc();
            instance.configure(self, Arc::clone(child));
            let accepted = match (&child.guard, &ctx) {
                (None, _) => true,
                (Some(guard), Some(ctx)) => match guard(ctx) {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        instance.enabled = false;
                        self.disabled.push(instance);
                        return Err(err);
                    }
                },
                (Some(_), None) => false,
            };
            if accepted {
                debug!(page = %self.id, pagelet = %child.name, "Pagelet authorized");
                self.enabled.push(instance);
            } else {
                debug!(page = %self.id, pagelet = %child.name, "Pagelet rejected");
                instance.enabled = false;
                self.disabled.push(instance);
            }
        }
        Ok(())
    }

    /// Release every held pagelet instance back to the pool.
    pub fn release_pagelets(&mut self, pagelets: &Pool<Pagelet>) {
        for pagelet in self.enabled.drain(..).chain(self.disabled.drain(..)) {
            pagelets.release(pagelet);
        }
    }

    pub fn blueprint(&self) -> Option<&Arc<PageBlueprint>> {
        self.blueprint.as_ref()
    }

    pub fn ctx(&self) -> Option<&RequestContext> {
        self.ctx.as_ref()
    }

    pub(crate) fn sink(&self) -> Option<&Arc<dyn ResponseSink>> {
        self.sink.as_ref()
    }

    /// Find an enabled pagelet instance by blueprint name.
    pub fn find_enabled(&self, name: &str) -> Option<&Pagelet> {
        self.enabled.iter().find(|p| p.name() == Some(name))
    }

    pub fn register_connection(&mut self, connection_id: &str, transport: Arc<dyn Transport>) {
        self.connections.insert(connection_id.to_string(), transport);
    }

    pub fn remove_connection(&mut self, connection_id: &str) -> bool {
        self.connections.remove(connection_id).is_some()
    }

    pub fn connection(&self, connection_id: &str) -> Option<&Arc<dyn Transport>> {
        self.connections.get(connection_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of pagelet fragments flushed so far.
    pub fn flushed_count(&self) -> usize {
        self.flushed
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// Pending (unflushed) fragments in the output queue.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Record that every enabled pagelet was delivered inline with the shell.
    /// Used by full-render mode, where there are no separate fragments.
    pub(crate) fn note_inline_delivery(&mut self) {
        self.flushed = self.enabled.len();
    }
}
