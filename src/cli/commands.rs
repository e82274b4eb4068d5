use crate::blueprint::{PageBlueprint, PageletBlueprint, RenderMode};
use crate::dispatcher::Dispatcher;
use crate::middleware::{Layer, MetricsLayer, MiddlewareChain, SessionLayer, TracingLayer};
use crate::render::{AssetResolver, JinjaEngine, ManifestAssets, ViewEngine};
use crate::router::Router;
use crate::runtime_config::RuntimeConfig;
use crate::server::{AppService, HttpServer};
use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Command-line interface for the server binary.
#[derive(Parser)]
#[command(name = "pagepipe")]
#[command(about = "PagePipe streaming page server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the server
    Serve {
        /// Address to bind, overridden by the app config when set there
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,

        /// YAML app config (addr, template dir, asset manifest)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory of view templates; the built-in demo is used when omitted
        #[arg(long)]
        templates: Option<PathBuf>,
    },
}

/// Optional YAML application config.
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    pub addr: Option<String>,
    pub templates: Option<PathBuf>,
    pub asset_manifest: Option<PathBuf>,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("app config {} not readable", path.display()))?;
        serde_yaml::from_str(&raw).context("app config is not valid YAML")
    }
}

pub fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            addr,
            config,
            templates,
        } => serve(addr, config, templates),
    }
}

fn serve(addr: String, config: Option<PathBuf>, templates: Option<PathBuf>) -> anyhow::Result<()> {
    let runtime = RuntimeConfig::from_env();
    may::config().set_stack_size(runtime.stack_size);

    let app_config = config
        .as_deref()
        .map(AppConfig::load)
        .transpose()?
        .unwrap_or_default();
    let addr = app_config.addr.unwrap_or(addr);

    let views: Arc<dyn ViewEngine> = match templates.or(app_config.templates) {
        Some(dir) => Arc::new(JinjaEngine::from_dir(&dir)?),
        None => Arc::new(demo_views()?),
    };
    let assets: Arc<dyn AssetResolver> = match app_config.asset_manifest {
        Some(path) => Arc::new(ManifestAssets::from_yaml_file(&path)?),
        None => Arc::new(ManifestAssets::default()),
    };

    let mut router = Router::new(runtime.route_cache_ttl);
    register_demo_pages(&mut router);

    let metrics = Arc::new(MetricsLayer::new());
    let mut chain = MiddlewareChain::new();
    chain.register("tracing", Arc::new(TracingLayer));
    chain.register("session", Arc::new(SessionLayer::default()));
    let metrics_layer: Arc<dyn Layer> = metrics.clone();
    chain.register("metrics", metrics_layer);

    let engine = Dispatcher::new(router, chain, views, assets, runtime)?;
    engine.router().dump_pages();

    let mut service = AppService::new(engine);
    service.set_metrics(metrics);

    let handle = HttpServer(service).start(&addr)?;
    info!(addr = %addr, "Server started");

    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        let mut signals = signal_hook::iterator::Signals::new([SIGINT, SIGTERM])?;
        if signals.forever().next().is_some() {
            info!("Shutdown signal received, stopping server");
            handle.stop();
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        handle
            .join()
            .map_err(|e| anyhow::anyhow!("server exited abnormally: {e:?}"))
    }
}

/// Inline templates for the demo page table.
fn demo_views() -> anyhow::Result<JinjaEngine> {
    JinjaEngine::from_templates(vec![
        // Shells embed pre-rendered fragment markup, hence `| safe`; scalar
        // data in the pagelet views stays auto-escaped.
        (
            "home.html",
            "<!doctype html>\n<html>\n<head><title>pagepipe demo</title></head>\n<body>\n\
             {{ pagelets.hello | safe }}\n{{ pagelets.clock | safe }}\n</body>\n</html>\n",
        ),
        ("hello.html", "<h1>Hello, {{ who }}!</h1>"),
        ("clock.html", "<p>Server unix time: {{ now }}</p>"),
        ("not_found.html", "<h1>404</h1><p>No page matches this address.</p>"),
        ("error.html", "<h1>500</h1><p>{{ error }}</p>"),
    ])
}

/// The page table the demo server (and the integration tests) run against.
pub fn register_demo_pages(router: &mut Router) {
    let hello = PageletBlueprint::builder("hello")
        .view("hello.html")
        .render(|ctx| {
            let who = ctx
                .get_query("who")
                .unwrap_or("world")
                .to_string();
            Ok(json!({ "who": who }))
        })
        .build();
    let clock = PageletBlueprint::builder("clock")
        .view("clock.html")
        .render(|_ctx| {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            Ok(json!({ "now": now }))
        })
        .build();

    router.register(
        PageBlueprint::builder("home", "/")
            .method(http::Method::GET)
            .view("home.html")
            .mode(RenderMode::AsyncFlush)
            .pagelet(hello)
            .pagelet(clock)
            .build(),
    );
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
}
