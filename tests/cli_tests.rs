//! Tests for CLI parsing and the YAML app config.

use clap::Parser;
use pagepipe::cli::{AppConfig, Cli, Commands};
use std::path::PathBuf;

#[test]
fn test_serve_arguments_parse() {
    let cli = Cli::try_parse_from(["pagepipe", "serve", "--addr", "127.0.0.1:9001"]).unwrap();
    match cli.command {
        Commands::Serve {
            addr,
            config,
            templates,
        } => {
            assert_eq!(addr, "127.0.0.1:9001");
            assert!(config.is_none());
            assert!(templates.is_none());
        }
    }
}

#[test]
fn test_serve_defaults() {
    let cli = Cli::try_parse_from(["pagepipe", "serve"]).unwrap();
    match cli.command {
        Commands::Serve { addr, .. } => assert_eq!(addr, "0.0.0.0:8080"),
    }
}

#[test]
fn test_app_config_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.yaml");
    std::fs::write(&path, "addr: 0.0.0.0:9000\ntemplates: ./views\n").unwrap();

    let config = AppConfig::load(&path).unwrap();
    assert_eq!(config.addr.as_deref(), Some("0.0.0.0:9000"));
    assert_eq!(config.templates, Some(PathBuf::from("./views")));
    assert!(config.asset_manifest.is_none());
}

#[test]
fn test_app_config_rejects_invalid_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.yaml");
    std::fs::write(&path, "addr: [unterminated").unwrap();
    assert!(AppConfig::load(&path).is_err());

    assert!(AppConfig::load(std::path::Path::new("/no/such/app.yaml")).is_err());
}
