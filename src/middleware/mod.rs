//! # Middleware Module
//!
//! An ordered chain of named, independently enable/disable-able request
//! processing layers, run before routing.
//!
//! A layer can finish the exchange itself (`LayerOutcome::Handled`), pass it
//! on (`LayerOutcome::Continue`), or fail — which short-circuits the chain
//! and routes the request to the 500 fallback page. Layers that need to wait
//! on something simply block their coroutine; the chain stays strictly
//! sequential either way.

mod core;
mod metrics;
mod session;
mod tracing;

pub use core::{ChainOutcome, Layer, LayerOutcome, MiddlewareChain};
pub use metrics::MetricsLayer;
pub use session::SessionLayer;
pub use tracing::TracingLayer;
