//! # Router Module
//!
//! Resolves an incoming request (method + path, or an explicit page id) to a
//! page blueprint and its extracted path parameters.
//!
//! ## Algorithm
//!
//! 1. Compute the cache key — the explicit id when given, otherwise
//!    `method + "@" + path` — and take the ordered candidate list from the
//!    route cache or a registration-order scan.
//! 2. Append the registered "not found" fallback as the final candidate, so
//!    resolution always terminates with a result.
//! 3. Walk the candidates in order, extracting path parameters and consulting
//!    each candidate's authorization guard. Guards run one at a time, never
//!    concurrently: "first eligible candidate wins" is only deterministic if
//!    evaluation order is the candidate order. The first candidate whose
//!    guard accepts (or which has no guard) is the result.
//!
//! A rejecting guard moves the scan to the next candidate; a guard *error*
//! aborts the scan and propagates.
//!
//! ## Caching
//!
//! Candidate lists are cached in an [`crate::registry::ExpiringRegistry`]
//! with a fixed window (default 300 s). A hit does not renew the entry;
//! candidate lists derive from static blueprints, so bounded staleness is
//! acceptable.

mod core;

pub use core::{Resolution, Router, ParamVec, MAX_INLINE_PARAMS};
