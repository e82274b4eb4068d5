use crate::dispatcher::RequestContext;
use crate::server::response::ResponseSink;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What a layer decided about the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerOutcome {
    /// Pass the request to the next layer (and eventually the router).
    Continue,
    /// The layer wrote the response itself; stop the chain and skip dispatch.
    Handled,
}

/// One named request-processing layer.
pub trait Layer: Send + Sync {
    /// Run before routing. May mutate the request context and write to the
    /// sink. Errors short-circuit the chain.
    fn call(&self, ctx: &mut RequestContext, sink: &Arc<dyn ResponseSink>)
        -> anyhow::Result<LayerOutcome>;

    /// Run after the response completes, with the total request latency.
    fn after(&self, _ctx: &RequestContext, _latency: Duration) {}
}

/// How a chain run finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    /// Every enabled layer continued; proceed to routing.
    Completed,
    /// The named layer handled the response; dispatch is skipped.
    HandledBy(String),
}

struct ChainEntry {
    name: String,
    enabled: bool,
    layer: Arc<dyn Layer>,
}

/// Ordered list of named layers, run in registration order.
#[derive(Default)]
pub struct MiddlewareChain {
    layers: Vec<ChainEntry>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        MiddlewareChain { layers: Vec::new() }
    }

    /// Insert a layer, or replace the existing layer with the same name in
    /// place (keeping its chain position). A replaced layer is re-enabled.
    pub fn register(&mut self, name: impl Into<String>, layer: Arc<dyn Layer>) {
        let name = name.into();
        match self.layers.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => {
                entry.layer = layer;
                entry.enabled = true;
                debug!(layer = %name, "Middleware layer replaced");
            }
            None => {
                debug!(layer = %name, position = self.layers.len(), "Middleware layer registered");
                self.layers.push(ChainEntry {
                    name,
                    enabled: true,
                    layer,
                });
            }
        }
    }

    /// Remove a layer by name. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.layers.len();
        self.layers.retain(|entry| entry.name != name);
        before != self.layers.len()
    }

    /// Enable a layer by name. Returns whether it exists.
    pub fn enable(&mut self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    /// Disable a layer by name without removing it. Returns whether it exists.
    pub fn disable(&mut self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.layers.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.layers
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.enabled)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Run every enabled layer in registration order.
    ///
    /// The request context is normalized first (query string split off the
    /// path and decoded), so every layer observes the same canonical request
    /// metadata. A `Handled` outcome stops iteration — the layer owns the
    /// response. An error stops iteration and propagates.
    pub fn run(
        &self,
        ctx: &mut RequestContext,
        sink: &Arc<dyn ResponseSink>,
    ) -> anyhow::Result<ChainOutcome> {
        normalize(ctx);
        for entry in self.layers.iter().filter(|entry| entry.enabled) {
            match entry.layer.call(ctx, sink)? {
                LayerOutcome::Continue => {}
                LayerOutcome::Handled => {
                    debug!(layer = %entry.name, "Request handled by middleware layer");
                    return Ok(ChainOutcome::HandledBy(entry.name.clone()));
                }
            }
        }
        Ok(ChainOutcome::Completed)
    }

    /// Run every enabled layer's `after` hook with the final latency.
    pub fn finish(&self, ctx: &RequestContext, latency: Duration) {
        for entry in self.layers.iter().filter(|entry| entry.enabled) {
            entry.layer.after(ctx, latency);
        }
    }
}

/// Split the query string off the path and decode it into the context.
fn normalize(ctx: &mut RequestContext) {
    if let Some(pos) = ctx.path.find('?') {
        let query_str = ctx.path[pos + 1..].to_string();
        ctx.path.truncate(pos);
        for (k, v) in url::form_urlencoded::parse(query_str.as_bytes()) {
            ctx.query.insert(k.to_string(), v.to_string());
        }
    }
    if ctx.path.is_empty() {
        ctx.path.push('/');
    }
}
