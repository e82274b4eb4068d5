//! # Runtime Configuration Module
//!
//! Environment variable-based configuration for the engine's runtime behavior.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `PAGEPIPE_STACK_SIZE` | `0x4000` | Coroutine stack size in bytes (decimal or `0x` hex) |
//! | `PAGEPIPE_PAGE_POOL` | `64` | Maximum free-list length of the `Page` pool |
//! | `PAGEPIPE_PAGELET_POOL` | `256` | Maximum free-list length of the `Pagelet` pool |
//! | `PAGEPIPE_ROUTE_CACHE_TTL_SECS` | `300` | Fixed expiry window for route-resolution cache entries |
//! | `PAGEPIPE_RECONNECT_GRACE_SECS` | `300` | How long a disconnected connection's page state survives |
//! | `PAGEPIPE_QUEUE_BOUND` | `1024` | Maximum fragments queued per page before `write` errors |
//!
//! Stack size matters because every handler and per-pagelet render runs in a
//! coroutine: total virtual memory is `stack_size × concurrent_coroutines`.
//! Too small panics on deep call chains; too large wastes address space.
//!
//! ## Usage
//!
//! ```rust
//! use pagepipe::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! println!("Stack size: {} bytes", config.stack_size);
//! ```

use std::env;
use std::time::Duration;

/// Runtime configuration loaded from environment variables.
///
/// Load this at startup using [`RuntimeConfig::from_env()`] and hand it to
/// [`crate::dispatcher::Dispatcher::new`].
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Stack size for coroutines in bytes (default: 16 KB / 0x4000)
    pub stack_size: usize,
    /// Maximum free-list length of the page pool
    pub page_pool_capacity: usize,
    /// Maximum free-list length of the pagelet pool
    pub pagelet_pool_capacity: usize,
    /// Fixed expiry window for route cache entries (a hit does not renew)
    pub route_cache_ttl: Duration,
    /// Grace window during which a disconnected connection's page state is kept
    pub reconnect_grace: Duration,
    /// Maximum queued fragments per page; `write` errors once reached
    pub queue_bound: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            stack_size: 0x4000,
            page_pool_capacity: 64,
            pagelet_pool_capacity: 256,
            route_cache_ttl: Duration::from_secs(300),
            reconnect_grace: Duration::from_secs(300),
            queue_bound: 1024,
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    match env::var(name) {
        Ok(val) => {
            if let Some(hex) = val.strip_prefix("0x") {
                usize::from_str_radix(hex, 16).unwrap_or(default)
            } else {
                val.parse().unwrap_or(default)
            }
        }
        Err(_) => default,
    }
}

fn env_secs(name: &str, default: u64) -> Duration {
    let secs = env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = RuntimeConfig::default();
        RuntimeConfig {
            stack_size: env_usize("PAGEPIPE_STACK_SIZE", defaults.stack_size),
            page_pool_capacity: env_usize("PAGEPIPE_PAGE_POOL", defaults.page_pool_capacity),
            pagelet_pool_capacity: env_usize(
                "PAGEPIPE_PAGELET_POOL",
                defaults.pagelet_pool_capacity,
            ),
            route_cache_ttl: env_secs("PAGEPIPE_ROUTE_CACHE_TTL_SECS", 300),
            reconnect_grace: env_secs("PAGEPIPE_RECONNECT_GRACE_SECS", 300),
            queue_bound: env_usize("PAGEPIPE_QUEUE_BOUND", defaults.queue_bound),
        }
    }
}
