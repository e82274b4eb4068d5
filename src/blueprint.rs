//! # Blueprint Module
//!
//! Immutable page and pagelet templates, defined once at startup. Per-request
//! state never lives here: a blueprint is a value object the engine copies
//! defaults from when it configures a pooled [`crate::page::Page`] or
//! [`crate::page::Pagelet`] instance.
//!
//! Blueprints are built with builders and wrapped in `Arc` at registration,
//! so every instance configured from one shares the same compiled template.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pagepipe::blueprint::{PageBlueprint, PageletBlueprint, RenderMode};
//! use serde_json::json;
//!
//! let weather = PageletBlueprint::builder("weather")
//!     .view("weather.html")
//!     .asset("css/weather.css")
//!     .render(|_ctx| Ok(json!({ "temp_c": 21 })))
//!     .build();
//!
//! let home = PageBlueprint::builder("home", "/")
//!     .method(http::Method::GET)
//!     .view("home.html")
//!     .mode(RenderMode::AsyncFlush)
//!     .pagelet(weather)
//!     .build();
//! ```

use crate::dispatcher::RequestContext;
use http::Method;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Authorization predicate evaluated against the request.
///
/// `Ok(true)` accepts, `Ok(false)` rejects, `Err` aborts the scan that is
/// evaluating it. Guards may block inside their coroutine; the engine always
/// evaluates them sequentially so first-match results stay deterministic.
pub type Guard = Arc<dyn Fn(&RequestContext) -> anyhow::Result<bool> + Send + Sync>;

/// Render operation producing the pagelet's structured data.
pub type RenderFn = Arc<dyn Fn(&RequestContext) -> anyhow::Result<Value> + Send + Sync>;

/// How a page delivers its fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Render everything, then send one complete document.
    Full,
    /// Flush the shell immediately, then each pagelet as its render completes.
    AsyncFlush,
    /// Flush the shell, then pagelets strictly in blueprint order.
    OrderedPipe,
}

/// Immutable template for one pagelet.
pub struct PageletBlueprint {
    /// Fragment name, unique among its page's children.
    pub name: Arc<str>,
    /// View reference rendered with the pagelet's data; `None` sends data only.
    pub view: Option<String>,
    /// Logical asset paths resolved through the asset resolver at render time.
    pub assets: Vec<String>,
    /// Optional authorization predicate.
    pub guard: Option<Guard>,
    /// Render operation; `None` renders the view with empty data.
    pub render: Option<RenderFn>,
    /// Nested child pagelets.
    pub children: Vec<Arc<PageletBlueprint>>,
}

impl fmt::Debug for PageletBlueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageletBlueprint")
            .field("name", &self.name)
            .field("view", &self.view)
            .field("assets", &self.assets)
            .field("guarded", &self.guard.is_some())
            .field("children", &self.children.len())
            .finish()
    }
}

impl PageletBlueprint {
    pub fn builder(name: impl Into<String>) -> PageletBuilder {
        PageletBuilder {
            name: name.into(),
            view: None,
            assets: Vec::new(),
            guard: None,
            render: None,
            children: Vec::new(),
        }
    }
}

/// Builder for [`PageletBlueprint`].
pub struct PageletBuilder {
    name: String,
    view: Option<String>,
    assets: Vec<String>,
    guard: Option<Guard>,
    render: Option<RenderFn>,
    children: Vec<Arc<PageletBlueprint>>,
}

impl PageletBuilder {
    pub fn view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }

    pub fn asset(mut self, logical_path: impl Into<String>) -> Self {
        self.assets.push(logical_path.into());
        self
    }

    pub fn guard<F>(mut self, guard: F) -> Self
    where
        F: Fn(&RequestContext) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub fn render<F>(mut self, render: F) -> Self
    where
        F: Fn(&RequestContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.render = Some(Arc::new(render));
        self
    }

    pub fn child(mut self, child: Arc<PageletBlueprint>) -> Self {
        self.children.push(child);
        self
    }

    pub fn build(self) -> Arc<PageletBlueprint> {
        Arc::new(PageletBlueprint {
            name: Arc::from(self.name),
            view: self.view,
            assets: self.assets,
            guard: self.guard,
            render: self.render,
            children: self.children,
        })
    }
}

/// Immutable template for one route-bound page.
pub struct PageBlueprint {
    /// Stable identifier, also the explicit-match key for live rebinds.
    pub id: Arc<str>,
    /// Route pattern, e.g. `/users/{id}`.
    pub path_pattern: Arc<str>,
    /// Accepted methods; empty accepts every method.
    pub methods: Vec<Method>,
    /// View reference for the page shell.
    pub view: String,
    /// Fragment delivery mode.
    pub mode: RenderMode,
    /// Optional authorization predicate consulted during route resolution.
    pub guard: Option<Guard>,
    /// Ordered child pagelets.
    pub pagelets: Vec<Arc<PageletBlueprint>>,
    /// Set on fallback blueprints registered for a status code (404, 500).
    pub status: Option<u16>,
}

impl fmt::Debug for PageBlueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageBlueprint")
            .field("id", &self.id)
            .field("path_pattern", &self.path_pattern)
            .field("methods", &self.methods)
            .field("view", &self.view)
            .field("mode", &self.mode)
            .field("guarded", &self.guard.is_some())
            .field("pagelets", &self.pagelets.len())
            .field("status", &self.status)
            .finish()
    }
}

impl PageBlueprint {
    pub fn builder(id: impl Into<String>, path_pattern: impl Into<String>) -> PageBuilder {
        PageBuilder {
            id: id.into(),
            path_pattern: path_pattern.into(),
            methods: Vec::new(),
            view: None,
            mode: RenderMode::AsyncFlush,
            guard: None,
            pagelets: Vec::new(),
            status: None,
        }
    }

    /// Look up a direct child pagelet by name.
    pub fn pagelet(&self, name: &str) -> Option<&Arc<PageletBlueprint>> {
        self.pagelets.iter().find(|p| p.name.as_ref() == name)
    }

    /// Whether this blueprint accepts the method. An empty list accepts all.
    pub fn allows_method(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }
}

/// Builder for [`PageBlueprint`].
pub struct PageBuilder {
    id: String,
    path_pattern: String,
    methods: Vec<Method>,
    view: Option<String>,
    mode: RenderMode,
    guard: Option<Guard>,
    pagelets: Vec<Arc<PageletBlueprint>>,
    status: Option<u16>,
}

impl PageBuilder {
    pub fn method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    pub fn view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }

    pub fn mode(mut self, mode: RenderMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn guard<F>(mut self, guard: F) -> Self
    where
        F: Fn(&RequestContext) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub fn pagelet(mut self, pagelet: Arc<PageletBlueprint>) -> Self {
        self.pagelets.push(pagelet);
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn build(self) -> PageBlueprint {
        let view = self.view.unwrap_or_else(|| format!("{}.html", self.id));
        PageBlueprint {
            id: Arc::from(self.id),
            path_pattern: Arc::from(self.path_pattern),
            methods: self.methods,
            view,
            mode: self.mode,
            guard: self.guard,
            pagelets: self.pagelets,
            status: self.status,
        }
    }
}
