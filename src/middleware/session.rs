use std::sync::Arc;
use tracing::debug;

use super::{Layer, LayerOutcome};
use crate::dispatcher::RequestContext;
use crate::server::response::ResponseSink;

/// Derives the session identity the engine exposes on the request context.
///
/// Reads the configured cookie; when absent, mints a fresh ULID so downstream
/// guards and render operations always see a session id.
pub struct SessionLayer {
    cookie_name: String,
}

impl SessionLayer {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        SessionLayer {
            cookie_name: cookie_name.into(),
        }
    }
}

impl Default for SessionLayer {
    fn default() -> Self {
        SessionLayer::new("pp_sid")
    }
}

impl Layer for SessionLayer {
    fn call(
        &self,
        ctx: &mut RequestContext,
        _sink: &Arc<dyn ResponseSink>,
    ) -> anyhow::Result<LayerOutcome> {
        if ctx.session_id.is_none() {
            match ctx.cookies.get(&self.cookie_name) {
                Some(value) if !value.is_empty() => {
                    ctx.session_id = Some(value.clone());
                }
                _ => {
                    let minted = ulid::Ulid::new().to_string();
                    debug!(request_id = %ctx.request_id, session = %minted, "Session id minted");
                    ctx.session_id = Some(minted);
                }
            }
        }
        Ok(LayerOutcome::Continue)
    }
}
