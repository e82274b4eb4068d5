//! Tests for the orchestration channel: binding, rebinding, sub-channels,
//! disconnect grace, and live refresh.

use pagepipe::blueprint::{PageBlueprint, PageletBlueprint, RenderMode};
use pagepipe::dispatcher::Dispatcher;
use pagepipe::middleware::MiddlewareChain;
use pagepipe::orchestration::{channel, Orchestrator, WireMessage};
use pagepipe::render::{JinjaEngine, ManifestAssets};
use pagepipe::router::Router;
use pagepipe::runtime_config::RuntimeConfig;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing_util::TestTracing;

fn engine() -> Arc<Dispatcher> {
    may::config().set_stack_size(0x8000);
    let mut config = RuntimeConfig::default();
    config.reconnect_grace = Duration::from_millis(40);

    let mut router = Router::new(config.route_cache_ttl);
    router.register(
        PageBlueprint::builder("dash", "/dash")
            .view("dash.html")
            .mode(RenderMode::AsyncFlush)
            .pagelet(
                PageletBlueprint::builder("feed")
                    .view("feed.html")
                    .render(|_| Ok(json!({ "items": 3 })))
                    .build(),
            )
            .pagelet(PageletBlueprint::builder("ticker").build())
            .build(),
    );
    router.register(
        PageBlueprint::builder("settings", "/settings")
            .view("settings.html")
            .build(),
    );
    router.register_fallback(
        404,
        PageBlueprint::builder("not-found", "/404").view("not_found.html").build(),
    );
    router.register_fallback(
        500,
        PageBlueprint::builder("error", "/500").view("error.html").build(),
    );

    let views = Arc::new(
        JinjaEngine::from_templates(vec![
            ("dash.html", "<html>dash</html>"),
            ("feed.html", "feed: {{ items }}"),
            ("settings.html", "<html>settings</html>"),
            ("not_found.html", "missing"),
            ("error.html", "error"),
        ])
        .unwrap(),
    );

    Arc::new(
        Dispatcher::new(
            router,
            MiddlewareChain::new(),
            views,
            Arc::new(ManifestAssets::default()),
            config,
        )
        .unwrap(),
    )
}

fn page_msg(id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({ "type": "page", "id": id, "url": "/dash" })).unwrap()
}

fn pagelet_msg(name: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({ "type": "pagelet", "name": name })).unwrap()
}

#[test]
fn test_wire_message_decoding() {
    let _tracing = TestTracing::init();
    let message: WireMessage =
        serde_json::from_slice(br#"{"type":"page","id":"dash","url":"/dash"}"#).unwrap();
    assert_eq!(
        message,
        WireMessage::Page {
            id: Some("dash".to_string()),
            url: Some("/dash".to_string()),
        }
    );

    let message: WireMessage = serde_json::from_slice(br#"{"type":"pagelet","name":"feed"}"#).unwrap();
    assert_eq!(
        message,
        WireMessage::Pagelet {
            name: "feed".to_string(),
            id: None,
        }
    );

    assert!(serde_json::from_slice::<WireMessage>(br#"{"type":"warp"}"#).is_err());
}

#[test]
fn test_page_bind_success() {
    let _tracing = TestTracing::init();
    let orchestrator = Orchestrator::new(engine());
    let (transport, _rx) = channel("c1");

    orchestrator.on_data(Arc::clone(&transport) as _, &page_msg("dash"));

    let (page_id, bound) = orchestrator.binding_info("c1").expect("binding");
    assert_eq!(bound, 0);
    assert!(!transport.is_closed());
    let _ = page_id;
}

#[test]
fn test_unknown_page_id_closes_connection() {
    let _tracing = TestTracing::init();
    let orchestrator = Orchestrator::new(engine());
    let (transport, _rx) = channel("c1");

    orchestrator.on_data(Arc::clone(&transport) as _, &page_msg("no-such-page"));

    assert!(transport.is_closed());
    assert!(orchestrator.binding_info("c1").is_none());
}

#[test]
fn test_malformed_messages_are_dropped() {
    let _tracing = TestTracing::init();
    let orchestrator = Orchestrator::new(engine());
    let (transport, _rx) = channel("c1");

    orchestrator.on_data(Arc::clone(&transport) as _, b"{not json at all");
    orchestrator.on_data(Arc::clone(&transport) as _, br#"{"type":"unknown"}"#);

    // Best-effort channel: no binding, no close, no error to the client.
    assert!(!transport.is_closed());
    assert!(orchestrator.binding_info("c1").is_none());
}

#[test]
fn test_pagelet_before_page_is_ignored() {
    let _tracing = TestTracing::init();
    let orchestrator = Orchestrator::new(engine());
    let (transport, _rx) = channel("c1");

    orchestrator.on_data(Arc::clone(&transport) as _, &pagelet_msg("feed"));

    assert!(orchestrator.binding_info("c1").is_none());
    assert!(!transport.is_closed());
}

#[test]
fn test_unknown_pagelet_name_is_ignored() {
    let _tracing = TestTracing::init();
    let orchestrator = Orchestrator::new(engine());
    let (transport, _rx) = channel("c1");

    orchestrator.on_data(Arc::clone(&transport) as _, &page_msg("dash"));
    orchestrator.on_data(Arc::clone(&transport) as _, &pagelet_msg("missing"));

    // "missing" is not a child of the dash blueprint: no sub-channel, no
    // error raised to the client.
    let (_, bound) = orchestrator.binding_info("c1").unwrap();
    assert_eq!(bound, 0);
    assert!(!transport.is_closed());
}

#[test]
fn test_pagelet_bind_and_duplicate_ignored() {
    let _tracing = TestTracing::init();
    let orchestrator = Orchestrator::new(engine());
    let (transport, _rx) = channel("c1");

    orchestrator.on_data(Arc::clone(&transport) as _, &page_msg("dash"));
    orchestrator.on_data(Arc::clone(&transport) as _, &pagelet_msg("feed"));
    let (_, bound) = orchestrator.binding_info("c1").unwrap();
    assert_eq!(bound, 1);

    orchestrator.on_data(Arc::clone(&transport) as _, &pagelet_msg("feed"));
    let (_, bound) = orchestrator.binding_info("c1").unwrap();
    assert_eq!(bound, 1, "second bind for the same name is ignored");
}

#[test]
fn test_client_supplied_id_is_assigned() {
    let _tracing = TestTracing::init();
    let eng = engine();
    let orchestrator = Orchestrator::new(Arc::clone(&eng));
    let (transport, rx) = channel("c1");

    orchestrator.on_data(Arc::clone(&transport) as _, &page_msg("dash"));
    let bind = serde_json::to_vec(&json!({ "type": "pagelet", "name": "feed", "id": "cl-9" }))
        .unwrap();
    orchestrator.on_data(Arc::clone(&transport) as _, &bind);

    assert!(orchestrator.refresh("c1", "feed").unwrap());
    let payload = rx.recv().unwrap();
    let payload = String::from_utf8(payload).unwrap();
    assert!(payload.contains("\"id\":\"cl-9\""));
}

#[test]
fn test_rebind_releases_previous_bindings_first() {
    let _tracing = TestTracing::init();
    let eng = engine();
    let orchestrator = Orchestrator::new(Arc::clone(&eng));
    let (transport, _rx) = channel("c1");

    orchestrator.on_data(Arc::clone(&transport) as _, &page_msg("dash"));
    orchestrator.on_data(Arc::clone(&transport) as _, &pagelet_msg("feed"));
    orchestrator.on_data(Arc::clone(&transport) as _, &pagelet_msg("ticker"));
    let (first_page, bound) = orchestrator.binding_info("c1").unwrap();
    assert_eq!(bound, 2);

    let rebind = serde_json::to_vec(&json!({ "type": "page", "id": "settings", "url": "/settings" }))
        .unwrap();
    orchestrator.on_data(Arc::clone(&transport) as _, &rebind);

    let (second_page, bound) = orchestrator.binding_info("c1").unwrap();
    assert_ne!(first_page, second_page);
    assert_eq!(bound, 0);
    // Everything bound under the first page went back to the pools before
    // the new binding began: both pagelets sit in the free list, and the
    // released page was recycled into the new binding.
    assert_eq!(eng.pagelets().free_len(), 2);
    let (_, recycled, _) = eng.pages().stats();
    assert!(recycled >= 1, "released page must be recycled for the rebind");
}

#[test]
fn test_close_keeps_state_for_grace_window() {
    let _tracing = TestTracing::init();
    let eng = engine();
    let orchestrator = Orchestrator::new(Arc::clone(&eng));
    let (transport, _rx) = channel("c1");

    orchestrator.on_data(Arc::clone(&transport) as _, &page_msg("dash"));
    orchestrator.on_data(Arc::clone(&transport) as _, &pagelet_msg("feed"));
    orchestrator.on_close("c1");

    // Pagelets are released immediately; the page survives the grace window.
    assert_eq!(eng.pagelets().free_len(), 1);
    assert!(orchestrator.binding_info("c1").is_some());
    assert_eq!(orchestrator.sweep(), 0);

    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(orchestrator.sweep(), 1);
    assert!(orchestrator.binding_info("c1").is_none());
    assert_eq!(eng.pages().free_len(), 1);
}

#[test]
fn test_fast_reconnect_resumes_page_state() {
    let _tracing = TestTracing::init();
    let orchestrator = Orchestrator::new(engine());
    let (transport, _rx) = channel("c1");

    orchestrator.on_data(Arc::clone(&transport) as _, &page_msg("dash"));
    let (original_page, _) = orchestrator.binding_info("c1").unwrap();
    orchestrator.on_close("c1");

    // Reconnect within the grace window: same page instance, pinned open
    // again.
    let (transport, _rx) = channel("c1");
    orchestrator.on_data(Arc::clone(&transport) as _, &page_msg("dash"));
    let (resumed_page, _) = orchestrator.binding_info("c1").unwrap();
    assert_eq!(original_page, resumed_page);

    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(orchestrator.sweep(), 0, "resumed binding must not expire");
}

#[test]
fn test_handshake_binds_from_connection_query() {
    let _tracing = TestTracing::init();
    let orchestrator = Orchestrator::new(engine());
    let (transport, _rx) = channel("c1");

    let mut query = HashMap::new();
    query.insert("page".to_string(), "dash".to_string());
    query.insert("url".to_string(), "/dash".to_string());
    orchestrator.on_connect(Arc::clone(&transport) as _, &query);

    assert!(orchestrator.binding_info("c1").is_some());
}

#[test]
fn test_refresh_pushes_rerendered_fragment() {
    let _tracing = TestTracing::init();
    let orchestrator = Orchestrator::new(engine());
    let (transport, rx) = channel("c1");

    orchestrator.on_data(Arc::clone(&transport) as _, &page_msg("dash"));
    orchestrator.on_data(Arc::clone(&transport) as _, &pagelet_msg("feed"));

    assert!(orchestrator.refresh("c1", "feed").unwrap());
    let payload = String::from_utf8(rx.recv().unwrap()).unwrap();
    assert!(payload.contains("\"name\":\"feed\""));
    assert!(payload.contains("feed: 3"));

    // Unbound pagelet: nothing to refresh, nothing sent.
    assert!(!orchestrator.refresh("c1", "ticker").unwrap());
    assert!(!orchestrator.refresh("ghost", "feed").unwrap());
}
