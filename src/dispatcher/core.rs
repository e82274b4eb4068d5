//! Dispatcher core - hot path for request dispatch.

use crate::blueprint::{PageBlueprint, PageletBlueprint, RenderMode};
use crate::ids::{PageId, RequestId};
use crate::middleware::{ChainOutcome, MiddlewareChain};
use crate::page::{Page, PageState, Pagelet};
use crate::pool::Pool;
use crate::render::{AssetResolver, ViewEngine};
use crate::router::{ParamVec, Resolution, Router};
use crate::runtime_config::RuntimeConfig;
use crate::server::response::ResponseSink;
use crate::writer::{EndOutcome, Fragment, StreamWriter};
use http::Method;
use may::sync::mpsc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info};

/// Normalized request metadata handed through the engine.
///
/// Built by the HTTP front end for real requests, or synthesized from a live
/// connection for orchestration binds. Guards and render operations only ever
/// see this type, never the raw transport.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request ID for tracing and correlation
    pub request_id: RequestId,
    /// HTTP method (GET for synthesized live-connection contexts)
    pub method: Method,
    /// Request path, query string stripped after normalization
    pub path: String,
    /// Decoded query string parameters
    pub query: HashMap<String, String>,
    /// HTTP headers (lowercase keys)
    pub headers: HashMap<String, String>,
    /// Cookies parsed from the Cookie header
    pub cookies: HashMap<String, String>,
    /// Session identity derived from a cookie, or minted by the session layer
    pub session_id: Option<String>,
    /// Path parameters extracted by the router (stack-allocated for ≤8 params)
    pub path_params: ParamVec,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        RequestContext {
            request_id: RequestId::new(),
            method,
            path: path.into(),
            query: HashMap::new(),
            headers: HashMap::new(),
            cookies: HashMap::new(),
            session_id: None,
            path_params: ParamVec::new(),
        }
    }

    /// Get a path parameter by name, last write wins.
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a query parameter by name.
    #[inline]
    #[must_use]
    pub fn get_query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Get a header by name (case-insensitive per RFC 7230).
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get a cookie by name.
    #[inline]
    #[must_use]
    pub fn get_cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

/// What a dispatch produced, for the HTTP front end to finish the exchange.
#[derive(Debug)]
pub struct DispatchSummary {
    /// Status for the response head (200, or the fallback's status).
    pub status: u16,
    /// Instance id of the page that served the request, if one was configured.
    pub page: Option<PageId>,
    /// Pagelet fragments flushed to the sink.
    pub fragments: usize,
    /// Name of the middleware layer that handled the request, if any.
    pub handled_by: Option<String>,
}

/// The engine: routes, configures, renders, and streams one request at a time
/// per coroutine.
pub struct Dispatcher {
    router: Router,
    chain: MiddlewareChain,
    views: Arc<dyn ViewEngine>,
    assets: Arc<dyn AssetResolver>,
    pages: Pool<Page>,
    pagelets: Pool<Pagelet>,
    writer: StreamWriter,
    config: RuntimeConfig,
}

impl Dispatcher {
    /// Build an engine from its collaborators.
    ///
    /// Fails when the router lacks 404/500 fallback pages: asking for a
    /// fallback that was never registered is a startup-time contract
    /// violation, not a runtime condition to recover from.
    pub fn new(
        router: Router,
        chain: MiddlewareChain,
        views: Arc<dyn ViewEngine>,
        assets: Arc<dyn AssetResolver>,
        config: RuntimeConfig,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            router.fallback(404).is_some(),
            "404 fallback page must be registered before the engine starts"
        );
        anyhow::ensure!(
            router.fallback(500).is_some(),
            "500 fallback page must be registered before the engine starts"
        );
        Ok(Dispatcher {
            router,
            chain,
            views,
            assets,
            pages: Pool::new(config.page_pool_capacity),
            pagelets: Pool::new(config.pagelet_pool_capacity),
            writer: StreamWriter::new(config.queue_bound),
            config,
        })
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Resolve with an explicit page id as the match key. Used by the
    /// orchestration channel to rebind live connections.
    pub fn resolve_explicit(&self, ctx: &RequestContext, id: &str) -> anyhow::Result<Resolution> {
        self.router.resolve(ctx, Some(id))
    }

    /// Mutable chain access for pre-start layer management.
    pub fn chain_mut(&mut self) -> &mut MiddlewareChain {
        &mut self.chain
    }

    pub fn views(&self) -> &Arc<dyn ViewEngine> {
        &self.views
    }

    pub fn assets(&self) -> &Arc<dyn AssetResolver> {
        &self.assets
    }

    pub fn pages(&self) -> &Pool<Page> {
        &self.pages
    }

    pub fn pagelets(&self) -> &Pool<Pagelet> {
        &self.pagelets
    }

    pub fn writer(&self) -> &StreamWriter {
        &self.writer
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Process one request, writing everything into `sink`.
    pub fn handle(&self, mut ctx: RequestContext, sink: Arc<dyn ResponseSink>) -> DispatchSummary {
        let started = Instant::now();
        debug!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
            "Dispatch start"
        );

        match self.chain.run(&mut ctx, &sink) {
            Err(err) => return self.fail(&ctx, &sink, err, started),
            Ok(ChainOutcome::HandledBy(name)) => {
                self.chain.finish(&ctx, started.elapsed());
                return DispatchSummary {
                    status: 200,
                    page: None,
                    fragments: 0,
                    handled_by: Some(name),
                };
            }
            Ok(ChainOutcome::Completed) => {}
        }

        let resolution = match self.router.resolve(&ctx, None) {
            Ok(resolution) => resolution,
            Err(err) => return self.fail(&ctx, &sink, err, started),
        };
        ctx.path_params = resolution.params.clone();
        let status = resolution.blueprint.status.unwrap_or(200);

        let mut page = self.pages.alloc();
        if let Err(err) = page.configure(
            Arc::clone(&resolution.blueprint),
            ctx.clone(),
            Arc::clone(&sink),
            &self.pagelets,
        ) {
            page.release_pagelets(&self.pagelets);
            self.pages.release(page);
            return self.fail(&ctx, &sink, err, started);
        }
        let page_id = page.id;
        let shared = Arc::new(Mutex::new(page));

        let result = self.run_page(&shared, &resolution.blueprint, &ctx);

        let fragments = {
            let mut page = shared.lock().expect("page lock poisoned");
            let fragments = page.flushed_count();
            page.release_pagelets(&self.pagelets);
            fragments
        };
        self.pages.release_shared(shared);

        match result {
            Ok(()) => {
                info!(
                    request_id = %ctx.request_id,
                    page = %page_id,
                    status = status,
                    fragments = fragments,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Dispatch complete"
                );
                self.chain.finish(&ctx, started.elapsed());
                DispatchSummary {
                    status,
                    page: Some(page_id),
                    fragments,
                    handled_by: None,
                }
            }
            Err(err) => self.fail(&ctx, &sink, err, started),
        }
    }

    /// Drive one configured page through its blueprint's render mode.
    fn run_page(
        &self,
        shared: &Arc<Mutex<Page>>,
        blueprint: &Arc<PageBlueprint>,
        ctx: &RequestContext,
    ) -> anyhow::Result<()> {
        match blueprint.mode {
            RenderMode::Full => self.run_full(shared, blueprint, ctx),
            RenderMode::OrderedPipe => self.run_ordered(shared, blueprint, ctx),
            RenderMode::AsyncFlush => self.run_async_flush(shared, blueprint, ctx),
        }
    }

    /// Render everything, then send one complete document.
    fn run_full(
        &self,
        shared: &Arc<Mutex<Page>>,
        blueprint: &Arc<PageBlueprint>,
        ctx: &RequestContext,
    ) -> anyhow::Result<()> {
        let plan = {
            let page = shared.lock().expect("page lock poisoned");
            render_plan(&page)
        };
        let mut markup_map = HashMap::new();
        for entry in &plan {
            let (markup, _data) =
                render_pagelet(&self.views, &self.assets, &entry.blueprint, ctx)?;
            markup_map.insert(entry.name.clone(), markup.unwrap_or_default());
        }

        let mut page = shared.lock().expect("page lock poisoned");
        let data = self.shell_data(&page, blueprint, Some(&markup_map));
        let shell = self.views.render(&blueprint.view, &data)?;
        self.writer
            .write(&mut page, Fragment::shell(shell))
            .map_err(anyhow::Error::from)?;
        page.note_inline_delivery();
        page.state = PageState::Streaming;
        let _ = self.writer.flush(&mut page, Some(true));
        match self.writer.end(&mut page, None) {
            EndOutcome::Failed(err) => Err(err),
            _ => Ok(()),
        }
    }

    /// Flush the shell, then pagelets strictly in blueprint order.
    fn run_ordered(
        &self,
        shared: &Arc<Mutex<Page>>,
        blueprint: &Arc<PageBlueprint>,
        ctx: &RequestContext,
    ) -> anyhow::Result<()> {
        let plan = self.write_shell(shared, blueprint)?;
        for entry in &plan {
            // Completing pagelet N before writing N+1 is what makes the
            // output order deterministic in this mode.
            let (markup, data) =
                render_pagelet(&self.views, &self.assets, &entry.blueprint, ctx)?;
            let mut page = shared.lock().expect("page lock poisoned");
            self.writer
                .write(
                    &mut page,
                    Fragment::pagelet(&entry.name, &entry.wire_id, markup.as_deref(), &data),
                )
                .map_err(anyhow::Error::from)?;
        }
        let mut page = shared.lock().expect("page lock poisoned");
        match self.writer.end(&mut page, None) {
            EndOutcome::Failed(err) => Err(err),
            _ => Ok(()),
        }
    }

    /// Flush the shell, then each pagelet as its render completes.
    ///
    /// Renders run concurrently in their own coroutines; completion order
    /// decides write order, and the single consumer below serializes the
    /// writes. Generation-validated writes discard results that arrive after
    /// the page was reconfigured.
    fn run_async_flush(
        &self,
        shared: &Arc<Mutex<Page>>,
        blueprint: &Arc<PageBlueprint>,
        ctx: &RequestContext,
    ) -> anyhow::Result<()> {
        let plan = self.write_shell(shared, blueprint)?;
        let (generation, expected) = {
            let page = shared.lock().expect("page lock poisoned");
            (page.generation, plan.len())
        };

        type RenderResult = (String, String, anyhow::Result<(Option<String>, Value)>);
        let (tx, rx) = mpsc::channel::<RenderResult>();
        for entry in plan {
            let tx = tx.clone();
            let ctx = ctx.clone();
            let views = Arc::clone(&self.views);
            let assets = Arc::clone(&self.assets);
            let spawn_result = unsafe {
                // SAFETY: coroutine spawn is unsafe in the may runtime; the
                // closure is Send + 'static and reports back over a channel.
                may::coroutine::Builder::new()
                    .stack_size(self.config.stack_size)
                    .spawn(move || {
                        let result = render_pagelet(&views, &assets, &entry.blueprint, &ctx);
                        let _ = tx.send((entry.name, entry.wire_id, result));
                    })
            };
            if let Err(err) = spawn_result {
                error!(error = %err, "Failed to spawn pagelet render coroutine");
            }
        }
        drop(tx);

        let mut received = 0;
        while received < expected {
            let (name, wire_id, result) = match rx.recv() {
                Ok(message) => message,
                // Spawn failures above mean fewer messages than expected.
                Err(_) => break,
            };
            received += 1;
            match result {
                Ok((markup, data)) => {
                    let mut page = shared.lock().expect("page lock poisoned");
                    let fragment =
                        Fragment::pagelet(&name, &wire_id, markup.as_deref(), &data);
                    if let Err(err) = self.writer.write_if_current(&mut page, generation, fragment)
                    {
                        return Err(anyhow::Error::from(err));
                    }
                }
                Err(err) => {
                    let mut page = shared.lock().expect("page lock poisoned");
                    return match self.writer.end(&mut page, Some(err)) {
                        EndOutcome::Failed(err) => Err(err),
                        _ => Ok(()),
                    };
                }
            }
        }

        let mut page = shared.lock().expect("page lock poisoned");
        match self.writer.end(&mut page, None) {
            EndOutcome::Failed(err) => Err(err),
            _ => Ok(()),
        }
    }

    /// Render the shell with per-pagelet placeholders, write it, and open the
    /// flush gate. Returns the render plan for the enabled pagelets.
    fn write_shell(
        &self,
        shared: &Arc<Mutex<Page>>,
        blueprint: &Arc<PageBlueprint>,
    ) -> anyhow::Result<Vec<PlanEntry>> {
        let mut page = shared.lock().expect("page lock poisoned");
        let plan = render_plan(&page);
        let data = self.shell_data(&page, blueprint, None);
        let shell = self.views.render(&blueprint.view, &data)?;
        self.writer
            .write(&mut page, Fragment::shell(shell))
            .map_err(anyhow::Error::from)?;
        page.state = PageState::Streaming;
        let _ = self.writer.flush(&mut page, Some(true));
        Ok(plan)
    }

    /// Data handed to the page shell view: page identity, resolved assets,
    /// and per-pagelet markup (final fragments in full mode, placeholder
    /// mount points otherwise).
    fn shell_data(
        &self,
        page: &Page,
        blueprint: &Arc<PageBlueprint>,
        rendered: Option<&HashMap<String, String>>,
    ) -> Value {
        let mut assets: Vec<String> = Vec::new();
        for child in &blueprint.pagelets {
            for logical in &child.assets {
                assets.push(self.assets.resolve(logical));
            }
        }
        let mut pagelets = serde_json::Map::new();
        for pagelet in &page.enabled {
            let name = match pagelet.name() {
                Some(name) => name,
                None => continue,
            };
            let html = match rendered {
                Some(markup_map) => markup_map.get(name).cloned().unwrap_or_default(),
                None => format!(
                    "<div data-pagelet=\"{}\" data-instance=\"{}\"></div>",
                    name,
                    pagelet.wire_id()
                ),
            };
            pagelets.insert(name.to_string(), Value::String(html));
        }
        json!({
            "page": { "id": page.id, "blueprint": blueprint.id.as_ref() },
            "assets": assets,
            "pagelets": Value::Object(pagelets),
        })
    }

    /// Route a failed request to the 500 fallback page. The original error is
    /// exposed to the fallback view's data but not guaranteed to reach the
    /// client verbatim.
    fn fail(
        &self,
        ctx: &RequestContext,
        sink: &Arc<dyn ResponseSink>,
        err: anyhow::Error,
        started: Instant,
    ) -> DispatchSummary {
        error!(
            request_id = %ctx.request_id,
            path = %ctx.path,
            error = %err,
            "Request failed, rendering 500 fallback"
        );
        if !sink.finished() {
            if let Some(fallback) = self.router.fallback(500) {
                let data = json!({
                    "error": err.to_string(),
                    "path": ctx.path,
                    "request_id": ctx.request_id,
                });
                match self.views.render(&fallback.view, &data) {
                    Ok(markup) => {
                        let _ = sink.write(markup.as_bytes());
                    }
                    Err(render_err) => {
                        error!(error = %render_err, "Fallback view failed to render");
                    }
                }
            }
            let _ = sink.end();
        }
        self.chain.finish(ctx, started.elapsed());
        DispatchSummary {
            status: 500,
            page: None,
            fragments: 0,
            handled_by: None,
        }
    }
}

/// One enabled pagelet's render inputs, captured while the page lock is held.
struct PlanEntry {
    name: String,
    wire_id: String,
    blueprint: Arc<PageletBlueprint>,
}

fn render_plan(page: &Page) -> Vec<PlanEntry> {
    page.enabled
        .iter()
        .filter_map(|pagelet| {
            Some(PlanEntry {
                name: pagelet.name()?.to_string(),
                wire_id: pagelet.wire_id(),
                blueprint: Arc::clone(pagelet.blueprint()?),
            })
        })
        .collect()
}

/// Run a pagelet's render operation and its view.
///
/// Resolved asset URLs are merged into the data under `"assets"` so views can
/// reference them without knowing the manifest.
pub(crate) fn render_pagelet(
    views: &Arc<dyn ViewEngine>,
    assets: &Arc<dyn AssetResolver>,
    blueprint: &Arc<PageletBlueprint>,
    ctx: &RequestContext,
) -> anyhow::Result<(Option<String>, Value)> {
    let mut data = match &blueprint.render {
        Some(render) => render(ctx)?,
        None => json!({}),
    };
    if !blueprint.assets.is_empty() {
        if let Value::Object(map) = &mut data {
            let resolved: Vec<String> = blueprint
                .assets
                .iter()
                .map(|logical| assets.resolve(logical))
                .collect();
            map.insert("assets".to_string(), json!(resolved));
        }
    }
    let markup = match &blueprint.view {
        Some(view) => Some(views.render(view, &data)?),
        None => None,
    };
    Ok((markup, data))
}
