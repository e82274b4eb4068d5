//! # Dispatcher Module
//!
//! The entry point composing the whole engine for one incoming request:
//! middleware chain → router → page lifecycle → streaming writer.
//!
//! ## Request Flow
//!
//! 1. The middleware chain runs; a layer may finish the exchange itself.
//! 2. The router resolves the request to a page blueprint (worst case the
//!    404 fallback) with sequential guard evaluation.
//! 3. A pooled `Page` instance is configured: per-request tables cleared,
//!    child pagelets discovered through their guards.
//! 4. The shell renders and flushes; pagelets render according to the
//!    blueprint's mode and stream out through the writer.
//! 5. The instance and its pagelets return to their pools.
//!
//! ## Error Handling
//!
//! Any failure — middleware error, guard error, render error — routes the
//! request to the 500 fallback page with the original error available to its
//! view data. Routing misses are not errors; they resolve to the 404
//! fallback.
//!
//! ## Concurrency
//!
//! In `AsyncFlush` mode each pagelet renders in its own `may` coroutine.
//! Write order is completion order: results funnel through a channel into a
//! single consumer that performs the writes, and every write re-validates the
//! page generation so a late result can never land in a reused instance.
//!
//! Pools, route cache, and view engine are owned by the dispatcher and
//! injected at construction — multiple independent engines can coexist in
//! one process.

mod core;

pub(crate) use core::render_pagelet;
pub use core::{DispatchSummary, Dispatcher, RequestContext};
