//! Tests for the dispatcher: full request flow across all render modes,
//! fallback routing, and instance pooling between requests.

use http::Method;
use pagepipe::blueprint::{PageBlueprint, PageletBlueprint, RenderMode};
use pagepipe::dispatcher::{Dispatcher, RequestContext};
use pagepipe::middleware::{Layer, LayerOutcome, MiddlewareChain};
use pagepipe::render::{JinjaEngine, ManifestAssets};
use pagepipe::router::Router;
use pagepipe::runtime_config::RuntimeConfig;
use pagepipe::server::{BufferSink, ResponseSink};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use tracing_util::TestTracing;

fn engine_with(
    pages: Vec<PageBlueprint>,
    templates: Vec<(&str, &str)>,
    chain: MiddlewareChain,
) -> Dispatcher {
    may::config().set_stack_size(0x8000);
    let config = RuntimeConfig::default();
    let mut router = Router::new(config.route_cache_ttl);
    for page in pages {
        router.register(page);
    }
    router.register_fallback(
        404,
        PageBlueprint::builder("not-found", "/404")
            .view("not_found.html")
            .mode(RenderMode::Full)
            .build(),
    );
    router.register_fallback(
        500,
        PageBlueprint::builder("error", "/500")
            .view("error.html")
            .mode(RenderMode::Full)
            .build(),
    );

    let mut templates = templates;
    templates.push(("not_found.html", "nothing here"));
    templates.push(("error.html", "failed: {{ error }}"));
    let views = Arc::new(JinjaEngine::from_templates(templates).unwrap());

    Dispatcher::new(router, chain, views, Arc::new(ManifestAssets::default()), config).unwrap()
}

fn handle(engine: &Dispatcher, method: Method, path: &str) -> (u16, usize, String, Arc<BufferSink>) {
    let sink = Arc::new(BufferSink::new());
    let summary = engine.handle(
        RequestContext::new(method, path),
        Arc::clone(&sink) as Arc<dyn ResponseSink>,
    );
    let body = String::from_utf8(sink.contents()).unwrap();
    (summary.status, summary.fragments, body, sink)
}

#[test]
fn test_childless_page_serves_and_closes() {
    let _tracing = TestTracing::init();
    let engine = engine_with(
        vec![PageBlueprint::builder("home", "/")
            .method(Method::GET)
            .view("home.html")
            .mode(RenderMode::Full)
            .build()],
        vec![("home.html", "<html>empty home</html>")],
        MiddlewareChain::new(),
    );

    let (status, fragments, body, sink) = handle(&engine, Method::GET, "/");
    assert_eq!(status, 200);
    assert_eq!(fragments, 0);
    assert!(body.contains("empty home"));
    assert!(sink.finished(), "response must be closed");
}

#[test]
fn test_async_flush_streams_shell_then_fragments() {
    let _tracing = TestTracing::init();
    let engine = engine_with(
        vec![PageBlueprint::builder("home", "/")
            .view("home.html")
            .mode(RenderMode::AsyncFlush)
            .pagelet(
                PageletBlueprint::builder("greeting")
                    .view("greeting.html")
                    .render(|_| Ok(json!({ "who": "world" })))
                    .build(),
            )
            .pagelet(
                PageletBlueprint::builder("footer")
                    .view("footer.html")
                    .render(|_| Ok(json!({})))
                    .build(),
            )
            .build()],
        vec![
            ("home.html", "<html>{{ pagelets.greeting | safe }}{{ pagelets.footer | safe }}</html>"),
            ("greeting.html", "<h1>hi {{ who }}</h1>"),
            ("footer.html", "<footer>end</footer>"),
        ],
        MiddlewareChain::new(),
    );

    let (status, fragments, body, sink) = handle(&engine, Method::GET, "/");
    assert_eq!(status, 200);
    assert_eq!(fragments, 2);
    assert!(sink.finished());

    // The shell goes out first with placeholder mount points, fragments
    // arrive afterwards in script envelopes.
    let shell_pos = body.find("<html>").unwrap();
    let greeting_pos = body.find("\"name\":\"greeting\"").unwrap();
    let footer_pos = body.find("\"name\":\"footer\"").unwrap();
    assert!(shell_pos < greeting_pos && shell_pos < footer_pos);
    assert!(body.contains("data-pagelet=\"greeting\""));
    assert!(body.contains("hi world"));
}

#[test]
fn test_async_flush_write_order_is_completion_order() {
    let _tracing = TestTracing::init();
    let engine = engine_with(
        vec![PageBlueprint::builder("race", "/race")
            .view("race.html")
            .mode(RenderMode::AsyncFlush)
            .pagelet(
                PageletBlueprint::builder("slow")
                    .view("part.html")
                    .render(|_| {
                        may::coroutine::sleep(Duration::from_millis(60));
                        Ok(json!({ "label": "slow" }))
                    })
                    .build(),
            )
            .pagelet(
                PageletBlueprint::builder("fast")
                    .view("part.html")
                    .render(|_| Ok(json!({ "label": "fast" })))
                    .build(),
            )
            .build()],
        vec![
            ("race.html", "<html>race</html>"),
            ("part.html", "<span>{{ label }}</span>"),
        ],
        MiddlewareChain::new(),
    );

    let (status, fragments, body, _sink) = handle(&engine, Method::GET, "/race");
    assert_eq!(status, 200);
    assert_eq!(fragments, 2);
    // The fast pagelet completes first, so it is written first even though
    // the slow one comes first in the blueprint.
    let fast_pos = body.find("\"name\":\"fast\"").unwrap();
    let slow_pos = body.find("\"name\":\"slow\"").unwrap();
    assert!(fast_pos < slow_pos);
}

#[test]
fn test_ordered_pipe_preserves_blueprint_order() {
    let _tracing = TestTracing::init();
    let engine = engine_with(
        vec![PageBlueprint::builder("pipe", "/pipe")
            .view("pipe.html")
            .mode(RenderMode::OrderedPipe)
            .pagelet(
                PageletBlueprint::builder("slow")
                    .view("part.html")
                    .render(|_| {
                        std::thread::sleep(Duration::from_millis(30));
                        Ok(json!({ "label": "slow" }))
                    })
                    .build(),
            )
            .pagelet(
                PageletBlueprint::builder("fast")
                    .view("part.html")
                    .render(|_| Ok(json!({ "label": "fast" })))
                    .build(),
            )
            .build()],
        vec![
            ("pipe.html", "<html>pipe</html>"),
            ("part.html", "<span>{{ label }}</span>"),
        ],
        MiddlewareChain::new(),
    );

    let (_, fragments, body, _sink) = handle(&engine, Method::GET, "/pipe");
    assert_eq!(fragments, 2);
    // Blueprint order wins regardless of render timing.
    let slow_pos = body.find("\"name\":\"slow\"").unwrap();
    let fast_pos = body.find("\"name\":\"fast\"").unwrap();
    assert!(slow_pos < fast_pos);
}

#[test]
fn test_unmatched_route_renders_404_fallback() {
    let _tracing = TestTracing::init();
    let engine = engine_with(vec![], vec![], MiddlewareChain::new());

    let (status, _, body, sink) = handle(&engine, Method::GET, "/nope");
    assert_eq!(status, 404);
    assert!(body.contains("nothing here"));
    assert!(sink.finished());
}

#[test]
fn test_render_error_routes_to_500_fallback() {
    let _tracing = TestTracing::init();
    let engine = engine_with(
        vec![PageBlueprint::builder("broken", "/broken")
            .view("broken.html")
            .mode(RenderMode::OrderedPipe)
            .pagelet(
                PageletBlueprint::builder("bomb")
                    .render(|_| anyhow::bail!("downstream timeout"))
                    .build(),
            )
            .build()],
        vec![("broken.html", "<html>broken</html>")],
        MiddlewareChain::new(),
    );

    let (status, _, body, sink) = handle(&engine, Method::GET, "/broken");
    assert_eq!(status, 500);
    // The original error is available to the fallback page's view data.
    assert!(body.contains("failed: downstream timeout"));
    assert!(sink.finished());
}

#[test]
fn test_page_guard_error_routes_to_500() {
    let _tracing = TestTracing::init();
    let engine = engine_with(
        vec![PageBlueprint::builder("guarded", "/guarded")
            .view("guarded.html")
            .guard(|_| anyhow::bail!("session store down"))
            .build()],
        vec![("guarded.html", "<html>guarded</html>")],
        MiddlewareChain::new(),
    );

    let (status, _, body, _sink) = handle(&engine, Method::GET, "/guarded");
    assert_eq!(status, 500);
    assert!(body.contains("session store down"));
}

#[test]
fn test_middleware_handled_skips_dispatch() {
    let _tracing = TestTracing::init();

    struct Shortcut;
    impl Layer for Shortcut {
        fn call(
            &self,
            _ctx: &mut RequestContext,
            sink: &Arc<dyn ResponseSink>,
        ) -> anyhow::Result<LayerOutcome> {
            sink.write(b"intercepted")?;
            Ok(LayerOutcome::Handled)
        }
    }

    let mut chain = MiddlewareChain::new();
    chain.register("shortcut", Arc::new(Shortcut));
    let engine = engine_with(
        vec![PageBlueprint::builder("home", "/").view("home.html").build()],
        vec![("home.html", "<html>home</html>")],
        chain,
    );

    let sink = Arc::new(BufferSink::new());
    let summary = engine.handle(
        RequestContext::new(Method::GET, "/"),
        Arc::clone(&sink) as Arc<dyn ResponseSink>,
    );
    assert_eq!(summary.handled_by.as_deref(), Some("shortcut"));
    assert!(summary.page.is_none());
    assert_eq!(sink.contents(), b"intercepted");
}

#[test]
fn test_middleware_error_routes_to_500() {
    let _tracing = TestTracing::init();

    struct Boom;
    impl Layer for Boom {
        fn call(
            &self,
            _ctx: &mut RequestContext,
            _sink: &Arc<dyn ResponseSink>,
        ) -> anyhow::Result<LayerOutcome> {
            anyhow::bail!("layer exploded")
        }
    }

    let mut chain = MiddlewareChain::new();
    chain.register("boom", Arc::new(Boom));
    let engine = engine_with(
        vec![PageBlueprint::builder("home", "/").view("home.html").build()],
        vec![("home.html", "<html>home</html>")],
        chain,
    );

    let (status, _, body, _sink) = handle(&engine, Method::GET, "/");
    assert_eq!(status, 500);
    assert!(body.contains("layer exploded"));
}

#[test]
fn test_pagelet_discovery_feeds_streaming() {
    let _tracing = TestTracing::init();
    let engine = engine_with(
        vec![PageBlueprint::builder("mixed", "/mixed")
            .view("mixed.html")
            .mode(RenderMode::AsyncFlush)
            .pagelet(
                PageletBlueprint::builder("public")
                    .view("part.html")
                    .render(|_| Ok(json!({ "label": "public" })))
                    .build(),
            )
            .pagelet(
                PageletBlueprint::builder("private")
                    .view("part.html")
                    .guard(|_| Ok(false))
                    .render(|_| Ok(json!({ "label": "private" })))
                    .build(),
            )
            .build()],
        vec![
            ("mixed.html", "<html>mixed</html>"),
            ("part.html", "<span>{{ label }}</span>"),
        ],
        MiddlewareChain::new(),
    );

    let (status, fragments, body, _sink) = handle(&engine, Method::GET, "/mixed");
    assert_eq!(status, 200);
    // Only the authorized pagelet streams; the rejected one contributes
    // nothing and does not block completion.
    assert_eq!(fragments, 1);
    assert!(body.contains("\"name\":\"public\""));
    assert!(!body.contains("\"name\":\"private\""));
}

#[test]
fn test_instances_recycle_between_requests() {
    let _tracing = TestTracing::init();
    let engine = engine_with(
        vec![PageBlueprint::builder("home", "/")
            .view("home.html")
            .mode(RenderMode::Full)
            .pagelet(PageletBlueprint::builder("feed").build())
            .build()],
        vec![("home.html", "<html>home</html>")],
        MiddlewareChain::new(),
    );

    let (status, _, _, _) = handle(&engine, Method::GET, "/");
    assert_eq!(status, 200);
    assert_eq!(engine.pages().free_len(), 1);
    assert_eq!(engine.pagelets().free_len(), 1);

    let (status, _, _, _) = handle(&engine, Method::GET, "/");
    assert_eq!(status, 200);
    let (_, recycled, _) = engine.pages().stats();
    assert!(recycled >= 1, "second request must reuse the pooled page");
}

#[test]
fn test_engine_requires_fallback_pages() {
    let _tracing = TestTracing::init();
    let config = RuntimeConfig::default();
    let router = Router::new(config.route_cache_ttl);
    let views = Arc::new(JinjaEngine::from_templates(Vec::<(&str, &str)>::new()).unwrap());

    // No 404/500 blueprints: a startup-time contract violation.
    let result = Dispatcher::new(
        router,
        MiddlewareChain::new(),
        views,
        Arc::new(ManifestAssets::default()),
        config,
    );
    assert!(result.is_err());
}
