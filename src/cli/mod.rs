//! # CLI Module
//!
//! Command-line bootstrap for the server binary.
//!
//! ```bash
//! pagepipe serve --addr 0.0.0.0:8080 --templates ./views
//! ```
//!
//! With no template directory the server runs a small built-in demo page
//! table, which is also what the integration tests drive. A YAML app config
//! can supply the bind address, template directory, and asset manifest:
//!
//! ```yaml
//! addr: 0.0.0.0:9000
//! templates: ./views
//! asset_manifest: ./assets.yaml
//! ```

mod commands;

pub use commands::{run_cli, AppConfig, Cli, Commands};
