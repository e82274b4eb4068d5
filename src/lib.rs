//! # PagePipe
//!
//! **PagePipe** is a coroutine-powered engine for serving HTML pages composed
//! of independently rendered fragments ("pagelets"). Each fragment is flushed
//! to the client as soon as it is ready, and a live channel stays open so
//! fragments can be re-rendered after the initial response without a page
//! reload.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//!
//! - **[`blueprint`]** - Immutable page/pagelet templates built once at startup
//! - **[`router`]** - Ordered candidate resolution with sequential guard scans
//! - **[`middleware`]** - Named, enable/disable-able request layers
//! - **[`page`]** - Pooled per-request page/pagelet instances and their lifecycle
//! - **[`writer`]** - The FIFO streaming writer draining fragments to the response
//! - **[`dispatcher`]** - The entry point composing all of the above per request
//! - **[`orchestration`]** - The real-time resync protocol over an abstract transport
//! - **[`pool`]** - Bounded free lists recycling page/pagelet instances
//! - **[`registry`]** - TTL-keyed map for route caching and live-connection state
//! - **[`render`]** - Template engine and asset resolver seams
//! - **[`server`]** - HTTP front end built on `may_minihttp`
//!
//! ## Request Handling Flow
//!
//! ```text
//! request → middleware chain → router (cache hit or ordered guard scan)
//!         → pooled Page configured (per-pagelet authorization discovery)
//!         → shell flushed → pagelets render → fragments stream in write order
//!         → response closed once, instance back to the pool
//! ```
//!
//! Independently: a connection opens → the orchestration channel binds it to
//! a page (new, or resumed within the reconnect grace window) → pagelet
//! sub-channels enable live re-renders → the connection closes → state is
//! released back to the pools after the grace window.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pagepipe::blueprint::{PageBlueprint, PageletBlueprint, RenderMode};
//! use pagepipe::dispatcher::Dispatcher;
//! use pagepipe::middleware::MiddlewareChain;
//! use pagepipe::render::{JinjaEngine, ManifestAssets};
//! use pagepipe::router::Router;
//! use pagepipe::runtime_config::RuntimeConfig;
//! use pagepipe::server::{AppService, HttpServer};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let config = RuntimeConfig::from_env();
//! let mut router = Router::new(config.route_cache_ttl);
//! router.register(
//!     PageBlueprint::builder("home", "/")
//!         .view("home.html")
//!         .mode(RenderMode::AsyncFlush)
//!         .pagelet(PageletBlueprint::builder("feed").view("feed.html").build())
//!         .build(),
//! );
//! router.register_fallback(404, PageBlueprint::builder("not-found", "/404").build());
//! router.register_fallback(500, PageBlueprint::builder("error", "/500").build());
//!
//! let views = Arc::new(JinjaEngine::from_dir(Path::new("views")).expect("templates"));
//! let assets = Arc::new(ManifestAssets::default());
//! let engine = Dispatcher::new(router, MiddlewareChain::new(), views, assets, config)
//!     .expect("engine");
//! let service = AppService::new(engine);
//! // HttpServer(service).start("0.0.0.0:8080");
//! ```
//!
//! ## Runtime Considerations
//!
//! PagePipe uses the `may` coroutine runtime, not tokio or async-std:
//!
//! - Guards, render operations, and middleware layers are plain blocking
//!   calls inside coroutines; suspending is just blocking
//! - Ordered scans (route resolution, pagelet discovery) call guards one at
//!   a time, which is what keeps first-match results deterministic
//! - Stack size is configurable via the `PAGEPIPE_STACK_SIZE` environment
//!   variable; see [`runtime_config`] for all tunables
//! - The runtime is incompatible with tokio-based libraries without bridging

pub mod blueprint;
pub mod cli;
pub mod dispatcher;
pub mod ids;
pub mod middleware;
pub mod orchestration;
pub mod page;
pub mod pool;
pub mod registry;
pub mod render;
pub mod router;
pub mod runtime_config;
pub mod server;
pub mod writer;

pub use blueprint::{PageBlueprint, PageletBlueprint, RenderMode};
pub use dispatcher::{DispatchSummary, Dispatcher, RequestContext};
pub use orchestration::{Orchestrator, Transport, WireMessage};
pub use page::{Page, PageState, Pagelet};
pub use pool::{Pool, Poolable};
pub use registry::{ExpiringRegistry, Expiry};
pub use router::{Resolution, Router};
pub use writer::{EndOutcome, Fragment, StreamWriter, WriteError};
