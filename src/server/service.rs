use super::request::parse_request;
use super::response::{write_json, write_page_response, write_text, BufferSink, ResponseSink};
use crate::dispatcher::Dispatcher;
use crate::middleware::MetricsLayer;
use arc_swap::ArcSwap;
use may_minihttp::{HttpService, Request, Response};
use serde_json::json;
use std::io;
use std::sync::Arc;

/// The HTTP front end: parses requests, answers infrastructure endpoints,
/// and hands everything else to the engine.
///
/// The engine sits behind an `ArcSwap` so a rebuilt page table can replace
/// the running one without restarting the server: in-flight requests keep
/// the engine they loaded, new requests see the swapped one.
pub struct AppService {
    engine: Arc<ArcSwap<Dispatcher>>,
    metrics: Option<Arc<MetricsLayer>>,
}

impl Clone for AppService {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            metrics: self.metrics.clone(),
        }
    }
}

impl AppService {
    pub fn new(engine: Dispatcher) -> Self {
        AppService {
            engine: Arc::new(ArcSwap::from_pointee(engine)),
            metrics: None,
        }
    }

    /// The engine serving requests right now.
    pub fn engine(&self) -> Arc<Dispatcher> {
        self.engine.load_full()
    }

    /// Replace the engine for all future requests.
    pub fn swap_engine(&self, engine: Dispatcher) {
        self.engine.store(Arc::new(engine));
    }

    /// Expose a metrics layer's counters at `GET /metrics`.
    pub fn set_metrics(&mut self, metrics: Arc<MetricsLayer>) {
        self.metrics = Some(metrics);
    }
}

impl HttpService for AppService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let ctx = parse_request(req);
        let bare_path = ctx.path.split('?').next().unwrap_or("/");

        if ctx.method == http::Method::GET && bare_path == "/health" {
            write_json(res, 200, json!({ "status": "ok" }));
            return Ok(());
        }
        if ctx.method == http::Method::GET && bare_path == "/metrics" {
            match &self.metrics {
                Some(metrics) => write_text(res, 200, metrics.render_prometheus()),
                None => write_json(res, 404, json!({ "error": "Metrics not configured" })),
            }
            return Ok(());
        }

        let engine = self.engine.load();
        let sink = Arc::new(BufferSink::new());
        let summary = engine.handle(ctx, Arc::clone(&sink) as Arc<dyn ResponseSink>);
        write_page_response(res, summary.status, sink.take());
        Ok(())
    }
}
