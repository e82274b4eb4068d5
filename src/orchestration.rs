//! # Orchestration Channel Module
//!
//! The real-time resync protocol: binds a long-lived connection to
//! server-side page and pagelet state, independent of the original HTTP
//! request lifecycle, so fragments can be re-rendered and pushed after the
//! initial response.
//!
//! ## Protocol
//!
//! The channel speaks two JSON-shaped messages over an abstract transport:
//!
//! - `{"type": "page", "id": …, "url": …}` — bind the connection to the page
//!   with the given blueprint id, releasing any previous binding first. The
//!   URL (when supplied) overrides the path used for parameter extraction.
//! - `{"type": "pagelet", "name": …, "id": …}` — open a sub-channel for one
//!   named pagelet of the bound page. Ignored when no page is bound, when the
//!   name is already bound, or when the page's blueprint has no such child.
//!
//! Malformed payloads are dropped: the channel favors availability over
//! strict validation. Binding an unknown page id closes the connection.
//!
//! ## Connection lifecycle
//!
//! While a connection is open its binding lives in the expiring registry with
//! `Expiry::Never`. On close the bound pagelets return to their pool and the
//! entry is demoted to a grace window (default 5 minutes) instead of being
//! deleted — a fast reconnect of the same connection inside the window finds
//! its page state intact. [`Orchestrator::sweep`] reclaims bindings whose
//! window elapsed.
//!
//! The transport itself stays abstract: anything that can `send` bytes and
//! report its connection id works, wire framing is someone else's problem.

use crate::dispatcher::{render_pagelet, Dispatcher, RequestContext};
use crate::ids::PageId;
use crate::page::Page;
use crate::registry::{ExpiringRegistry, Expiry};
use crate::server::response::{ChannelSink, ResponseSink};
use crate::writer::Fragment;
use http::Method;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Error reported by a transport send.
#[derive(Debug)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: {}", self.0)
    }
}

impl std::error::Error for TransportError {}

/// Abstract bidirectional message channel, one per client connection.
///
/// The orchestrator is built entirely on this seam and never assumes a
/// specific wire framing. Inbound traffic arrives through
/// [`Orchestrator::on_connect`], [`Orchestrator::on_data`], and
/// [`Orchestrator::on_close`], driven by whatever owns the socket.
pub trait Transport: Send + Sync {
    /// Stable id of this connection.
    fn id(&self) -> &str;
    /// Push a payload to the client.
    fn send(&self, payload: &[u8]) -> Result<(), TransportError>;
    /// Terminate the connection from the server side.
    fn close(&self);
}

/// Orchestration wire messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireMessage {
    Page {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
    Pagelet {
        name: String,
        #[serde(default)]
        id: Option<String>,
    },
}

/// In-memory transport backed by a coroutine channel. The test double for
/// real socket transports, and the reference implementation of the trait.
pub struct ChannelTransport {
    id: String,
    tx: Mutex<may::sync::mpsc::Sender<Vec<u8>>>,
    closed: AtomicBool,
}

impl ChannelTransport {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

impl Transport for ChannelTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError("connection closed".to_string()));
        }
        self.tx
            .lock()
            .expect("transport sender lock poisoned")
            .send(payload.to_vec())
            .map_err(|err| TransportError(err.to_string()))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

/// Create an in-memory transport and the receiver observing its outbound
/// payloads.
pub fn channel(
    id: impl Into<String>,
) -> (Arc<ChannelTransport>, may::sync::mpsc::Receiver<Vec<u8>>) {
    let (tx, rx) = may::sync::mpsc::channel();
    (
        Arc::new(ChannelTransport {
            id: id.into(),
            tx: Mutex::new(tx),
            closed: AtomicBool::new(false),
        }),
        rx,
    )
}

/// One connection's server-side state.
struct Binding {
    page: Arc<Mutex<Page>>,
    /// Pagelet names with an open sub-channel on this connection.
    bound: HashSet<String>,
    transport: Arc<dyn Transport>,
}

/// Protocol layer binding live connections to page state.
pub struct Orchestrator {
    engine: Arc<Dispatcher>,
    bindings: ExpiringRegistry<Arc<Mutex<Binding>>>,
    grace: Duration,
}

impl Orchestrator {
    pub fn new(engine: Arc<Dispatcher>) -> Self {
        let grace = engine.config().reconnect_grace;
        Orchestrator {
            engine,
            bindings: ExpiringRegistry::new(grace),
            grace,
        }
    }

    /// Handshake: a client that already holds a page id resumes its binding
    /// immediately, without waiting for an explicit page message.
    pub fn on_connect(&self, transport: Arc<dyn Transport>, query: &HashMap<String, String>) {
        if let Some(id) = query.get("page") {
            let url = query.get("url").cloned();
            self.bind_page(transport, Some(id.clone()), url);
        }
    }

    /// Feed one inbound payload. Undecodable payloads are dropped.
    pub fn on_data(&self, transport: Arc<dyn Transport>, payload: &[u8]) {
        let message: WireMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(err) => {
                debug!(connection = transport.id(), error = %err, "Malformed message dropped");
                return;
            }
        };
        match message {
            WireMessage::Page { id, url } => self.bind_page(transport, id, url),
            WireMessage::Pagelet { name, id } => self.bind_pagelet(transport, name, id),
        }
    }

    /// The connection went away: free its pagelets, keep the page state for a
    /// grace window so a fast reconnect can pick it back up.
    pub fn on_close(&self, connection_id: &str) {
        let binding = match self.bindings.get(connection_id) {
            Some(binding) => binding,
            None => return,
        };
        {
            let mut binding = binding.lock().expect("binding lock poisoned");
            let mut page = binding.page.lock().expect("page lock poisoned");
            page.release_pagelets(self.engine.pagelets());
            page.remove_connection(connection_id);
            drop(page);
            binding.bound.clear();
        }
        self.bindings
            .set_expiry(connection_id, Expiry::after(self.grace));
        info!(
            connection = connection_id,
            grace_secs = self.grace.as_secs(),
            "Connection closed, page state kept for grace window"
        );
    }

    /// Reclaim bindings whose grace window elapsed, returning how many pages
    /// went back to the pool.
    pub fn sweep(&self) -> usize {
        let expired = self.bindings.sweep();
        let count = expired.len();
        for (_, binding) in expired {
            self.release_binding(binding);
        }
        count
    }

    /// Re-run a bound pagelet's render operation and push the fragment
    /// payload over the connection. Returns `false` when the connection or
    /// pagelet is not bound (or the page was rebound mid-render).
    pub fn refresh(&self, connection_id: &str, pagelet_name: &str) -> anyhow::Result<bool> {
        let binding = match self.bindings.get(connection_id) {
            Some(binding) => binding,
            None => return Ok(false),
        };
        let binding = binding.lock().expect("binding lock poisoned");
        let (blueprint, ctx, wire_id, generation) = {
            let page = binding.page.lock().expect("page lock poisoned");
            let pagelet = match page.find_enabled(pagelet_name) {
                Some(pagelet) => pagelet,
                None => return Ok(false),
            };
            let blueprint = match pagelet.blueprint() {
                Some(blueprint) => Arc::clone(blueprint),
                None => return Ok(false),
            };
            let ctx = page
                .ctx()
                .cloned()
                .unwrap_or_else(|| RequestContext::new(Method::GET, "/"));
            (blueprint, ctx, pagelet.wire_id(), page.generation)
        };

        // Render outside the page lock; the operation may suspend.
        let (markup, data) =
            render_pagelet(self.engine.views(), self.engine.assets(), &blueprint, &ctx)?;

        {
            let page = binding.page.lock().expect("page lock poisoned");
            if page.generation != generation {
                debug!(
                    connection = connection_id,
                    pagelet = pagelet_name,
                    "Page rebound mid-render, refresh discarded"
                );
                return Ok(false);
            }
        }
        let payload = Fragment::envelope(pagelet_name, &wire_id, markup.as_deref(), &data);
        binding
            .transport
            .send(payload.as_bytes())
            .map_err(anyhow::Error::from)?;
        debug!(connection = connection_id, pagelet = pagelet_name, "Pagelet refreshed");
        Ok(true)
    }

    /// Page instance id and bound sub-channel count for a connection.
    pub fn binding_info(&self, connection_id: &str) -> Option<(PageId, usize)> {
        let binding = self.bindings.get(connection_id)?;
        let binding = binding.lock().expect("binding lock poisoned");
        let page = binding.page.lock().expect("page lock poisoned");
        Some((page.id, binding.bound.len()))
    }

    fn bind_page(&self, transport: Arc<dyn Transport>, id: Option<String>, url: Option<String>) {
        let connection_id = transport.id().to_string();
        let id = match id {
            Some(id) => id,
            None => {
                debug!(connection = %connection_id, "Page message without id dropped");
                return;
            }
        };

        // A binding surviving in its grace window: if it is for the same
        // blueprint, resume it instead of building fresh state.
        if let Some(existing) = self.bindings.get(&connection_id) {
            let same_blueprint = {
                let binding = existing.lock().expect("binding lock poisoned");
                let page = binding.page.lock().expect("page lock poisoned");
                page.blueprint().map(|b| b.id.as_ref() == id).unwrap_or(false)
            };
            if same_blueprint {
                {
                    let mut binding = existing.lock().expect("binding lock poisoned");
                    binding.transport = Arc::clone(&transport);
                    let mut page = binding.page.lock().expect("page lock poisoned");
                    page.register_connection(&connection_id, Arc::clone(&transport));
                }
                self.bindings.set_expiry(&connection_id, Expiry::Never);
                info!(connection = %connection_id, page = %id, "Binding resumed");
                return;
            }
            // Rebinding to a different page: release everything bound so far
            // before any new binding begins.
            if let Some(stale) = self.bindings.remove(&connection_id) {
                self.release_binding(stale);
            }
        }

        let path = url
            .as_deref()
            .map(|u| u.split('?').next().unwrap_or("/").to_string())
            .unwrap_or_else(|| "/".to_string());
        let mut ctx = RequestContext::new(Method::GET, path);

        let resolution = match self.engine.resolve_explicit(&ctx, &id) {
            Ok(resolution) => resolution,
            Err(err) => {
                warn!(connection = %connection_id, page = %id, error = %err, "Bind failed, closing");
                transport.close();
                return;
            }
        };
        if resolution.is_fallback {
            warn!(connection = %connection_id, page = %id, "Unknown page id, closing connection");
            transport.close();
            return;
        }
        ctx.path_params = resolution.params.clone();

        let mut page = self.engine.pages().alloc();
        // The connection substitutes for the request/response pair: writes go
        // out as real-time payloads rather than HTTP body bytes.
        let sink: Arc<dyn ResponseSink> = Arc::new(ChannelSink::new(Arc::clone(&transport)));
        page.bind_live(
            Arc::clone(&resolution.blueprint),
            ctx,
            sink,
            self.engine.pagelets(),
        );
        page.register_connection(&connection_id, Arc::clone(&transport));
        let page_id = page.id;

        let binding = Binding {
            page: Arc::new(Mutex::new(page)),
            bound: HashSet::new(),
            transport,
        };
        self.bindings.insert_with(
            connection_id.as_str(),
            Arc::new(Mutex::new(binding)),
            Expiry::Never,
        );
        info!(
            connection = %connection_id,
            blueprint = %id,
            page = %page_id,
            "Page bound to connection"
        );
    }

    fn bind_pagelet(&self, transport: Arc<dyn Transport>, name: String, client_id: Option<String>) {
        let connection_id = transport.id();
        let binding = match self.bindings.get(connection_id) {
            Some(binding) => binding,
            // No page bound on this connection: ignored.
            None => return,
        };
        let mut binding = binding.lock().expect("binding lock poisoned");
        if binding.bound.contains(&name) {
            debug!(connection = connection_id, pagelet = %name, "Sub-channel already bound");
            return;
        }
        let mut page = binding.page.lock().expect("page lock poisoned");
        let blueprint = match page.blueprint().and_then(|b| b.pagelet(&name)).map(Arc::clone) {
            Some(blueprint) => blueprint,
            None => {
                // Not a child of the bound page's blueprint: ignored, no
                // error surfaces to the client.
                debug!(connection = connection_id, pagelet = %name, "Unknown pagelet name ignored");
                return;
            }
        };
        let mut instance = self.engine.pagelets().alloc();
        instance.configure(&page, blueprint);
        if let Some(client_ref) = client_id {
            instance.client_ref = Some(client_ref);
        }
        debug!(
            connection = connection_id,
            pagelet = %name,
            instance = %instance.id,
            "Sub-channel established"
        );
        page.enabled.push(instance);
        drop(page);
        binding.bound.insert(name);
    }

    fn release_binding(&self, binding: Arc<Mutex<Binding>>) {
        let binding = match Arc::try_unwrap(binding) {
            Ok(mutex) => match mutex.into_inner() {
                Ok(binding) => binding,
                Err(_) => return,
            },
            Err(_) => {
                warn!("Binding still referenced, release skipped");
                return;
            }
        };
        {
            let mut page = binding.page.lock().expect("page lock poisoned");
            page.release_pagelets(self.engine.pagelets());
            page.remove_connection(binding.transport.id());
        }
        self.engine.pages().release_shared(binding.page);
    }
}
