use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{Layer, LayerOutcome};
use crate::dispatcher::RequestContext;
use crate::server::response::ResponseSink;

/// Passive request logging layer.
pub struct TracingLayer;

impl Layer for TracingLayer {
    fn call(
        &self,
        ctx: &mut RequestContext,
        _sink: &Arc<dyn ResponseSink>,
    ) -> anyhow::Result<LayerOutcome> {
        info!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
            session = ctx.session_id.as_deref(),
            "Request received"
        );
        Ok(LayerOutcome::Continue)
    }

    fn after(&self, ctx: &RequestContext, latency: Duration) {
        info!(
            request_id = %ctx.request_id,
            latency_ms = latency.as_millis() as u64,
            "Request completed"
        );
    }
}
