//! Tests for the middleware chain: ordering, enable/disable, short-circuits.

use http::Method;
use pagepipe::dispatcher::RequestContext;
use pagepipe::middleware::{ChainOutcome, Layer, LayerOutcome, MiddlewareChain, SessionLayer};
use pagepipe::server::{BufferSink, ResponseSink};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing_util::TestTracing;

struct Counter(Arc<AtomicUsize>);

impl Layer for Counter {
    fn call(
        &self,
        _ctx: &mut RequestContext,
        _sink: &Arc<dyn ResponseSink>,
    ) -> anyhow::Result<LayerOutcome> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(LayerOutcome::Continue)
    }
}

struct Gate;

impl Layer for Gate {
    fn call(
        &self,
        _ctx: &mut RequestContext,
        sink: &Arc<dyn ResponseSink>,
    ) -> anyhow::Result<LayerOutcome> {
        sink.write(b"gated")?;
        Ok(LayerOutcome::Handled)
    }
}

struct Failing;

impl Layer for Failing {
    fn call(
        &self,
        _ctx: &mut RequestContext,
        _sink: &Arc<dyn ResponseSink>,
    ) -> anyhow::Result<LayerOutcome> {
        anyhow::bail!("layer exploded")
    }
}

fn sink() -> Arc<dyn ResponseSink> {
    Arc::new(BufferSink::new())
}

fn ctx() -> RequestContext {
    RequestContext::new(Method::GET, "/")
}

#[test]
fn test_handled_stops_iteration() {
    let _tracing = TestTracing::init();
    let after = Arc::new(AtomicUsize::new(0));

    let mut chain = MiddlewareChain::new();
    chain.register("gate", Arc::new(Gate));
    chain.register("after-gate", Arc::new(Counter(Arc::clone(&after))));

    let buffer = Arc::new(BufferSink::new());
    let dyn_sink: Arc<dyn ResponseSink> = Arc::clone(&buffer) as Arc<dyn ResponseSink>;
    let outcome = chain.run(&mut ctx(), &dyn_sink).unwrap();

    assert_eq!(outcome, ChainOutcome::HandledBy("gate".to_string()));
    assert_eq!(buffer.contents(), b"gated");
    // The layer after the gate never ran: the gate owns the response.
    assert_eq!(after.load(Ordering::SeqCst), 0);
}

#[test]
fn test_error_short_circuits() {
    let _tracing = TestTracing::init();
    let after = Arc::new(AtomicUsize::new(0));

    let mut chain = MiddlewareChain::new();
    chain.register("boom", Arc::new(Failing));
    chain.register("after-boom", Arc::new(Counter(Arc::clone(&after))));

    assert!(chain.run(&mut ctx(), &sink()).is_err());
    assert_eq!(after.load(Ordering::SeqCst), 0);
}

#[test]
fn test_remove_enable_disable() {
    let _tracing = TestTracing::init();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut chain = MiddlewareChain::new();
    chain.register("counter", Arc::new(Counter(Arc::clone(&calls))));
    assert_eq!(chain.is_enabled("counter"), Some(true));

    chain.run(&mut ctx(), &sink()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(chain.disable("counter"));
    chain.run(&mut ctx(), &sink()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(chain.enable("counter"));
    chain.run(&mut ctx(), &sink()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert!(chain.remove("counter"));
    assert!(!chain.remove("counter"));
    assert_eq!(chain.is_enabled("counter"), None);
    assert!(chain.is_empty());
}

#[test]
fn test_unknown_names_report_absence() {
    let _tracing = TestTracing::init();
    let mut chain = MiddlewareChain::new();
    assert!(!chain.enable("ghost"));
    assert!(!chain.disable("ghost"));
    assert!(!chain.remove("ghost"));
}

#[test]
fn test_session_layer_in_chain() {
    let _tracing = TestTracing::init();
    let mut chain = MiddlewareChain::new();
    chain.register("session", Arc::new(SessionLayer::default()));

    let mut request = ctx();
    request
        .cookies
        .insert("pp_sid".to_string(), "s-42".to_string());
    chain.run(&mut request, &sink()).unwrap();
    assert_eq!(request.session_id.as_deref(), Some("s-42"));
}

#[test]
fn test_normalization_happens_before_first_layer() {
    let _tracing = TestTracing::init();
    let saw_clean_path = Arc::new(AtomicBool::new(false));

    struct Observer(Arc<AtomicBool>);
    impl Layer for Observer {
        fn call(
            &self,
            ctx: &mut RequestContext,
            _sink: &Arc<dyn ResponseSink>,
        ) -> anyhow::Result<LayerOutcome> {
            self.0.store(
                ctx.path == "/search" && ctx.get_query("q") == Some("x"),
                Ordering::SeqCst,
            );
            Ok(LayerOutcome::Continue)
        }
    }

    let mut chain = MiddlewareChain::new();
    chain.register("observer", Arc::new(Observer(Arc::clone(&saw_clean_path))));

    let mut request = RequestContext::new(Method::GET, "/search?q=x");
    chain.run(&mut request, &sink()).unwrap();
    assert!(saw_clean_path.load(Ordering::SeqCst));
}
