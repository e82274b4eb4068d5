use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{Layer, LayerOutcome};
use crate::dispatcher::RequestContext;
use crate::server::response::ResponseSink;

/// Passive metrics collection layer.
///
/// Tracks request counts, average latency, and per-path counters. All
/// counters are atomics or lock-free map entries; the layer never blocks a
/// request, only observes it.
#[derive(Default)]
pub struct MetricsLayer {
    request_count: AtomicUsize,
    completed_count: AtomicUsize,
    total_latency_ns: AtomicU64,
    per_path: DashMap<String, u64>,
}

impl MetricsLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total requests seen by the chain.
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Requests that ran to completion (the `after` hook fired).
    pub fn completed_count(&self) -> usize {
        self.completed_count.load(Ordering::Relaxed)
    }

    /// Mean request latency across completed requests; zero before the first.
    pub fn average_latency(&self) -> Duration {
        let count = self.completed_count.load(Ordering::Relaxed) as u64;
        if count == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }

    /// Requests seen for one normalized path.
    pub fn path_count(&self, path: &str) -> u64 {
        self.per_path.get(path).map(|entry| *entry).unwrap_or(0)
    }

    /// Render the counters in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut body = format!(
            "# HELP pagepipe_requests_total Total number of handled requests\n\
             # TYPE pagepipe_requests_total counter\n\
             pagepipe_requests_total {}\n\
             # HELP pagepipe_request_latency_seconds Average request latency in seconds\n\
             # TYPE pagepipe_request_latency_seconds gauge\n\
             pagepipe_request_latency_seconds {}\n",
            self.request_count(),
            self.average_latency().as_secs_f64()
        );
        body.push_str("# HELP pagepipe_path_requests_total Requests per normalized path\n");
        body.push_str("# TYPE pagepipe_path_requests_total counter\n");
        for entry in self.per_path.iter() {
            body.push_str(&format!(
                "pagepipe_path_requests_total{{path=\"{}\"}} {}\n",
                entry.key(),
                entry.value()
            ));
        }
        body
    }
}

impl Layer for MetricsLayer {
    fn call(
        &self,
        ctx: &mut RequestContext,
        _sink: &Arc<dyn ResponseSink>,
    ) -> anyhow::Result<LayerOutcome> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        *self.per_path.entry(ctx.path.clone()).or_insert(0) += 1;
        Ok(LayerOutcome::Continue)
    }

    fn after(&self, _ctx: &RequestContext, latency: Duration) {
        self.completed_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::response::BufferSink;
    use http::Method;

    #[test]
    fn test_counts_and_latency() {
        let metrics = MetricsLayer::new();
        let sink: Arc<dyn ResponseSink> = Arc::new(BufferSink::new());
        let mut ctx = RequestContext::new(Method::GET, "/home");

        metrics.call(&mut ctx, &sink).unwrap();
        metrics.call(&mut ctx, &sink).unwrap();
        metrics.after(&ctx, Duration::from_millis(10));

        assert_eq!(metrics.request_count(), 2);
        assert_eq!(metrics.completed_count(), 1);
        assert_eq!(metrics.path_count("/home"), 2);
        assert_eq!(metrics.average_latency(), Duration::from_millis(10));

        let rendered = metrics.render_prometheus();
        assert!(rendered.contains("pagepipe_requests_total 2"));
        assert!(rendered.contains("path=\"/home\"} 2"));
    }
}
