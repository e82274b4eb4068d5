//! # Render Collaborators Module
//!
//! Seams to the template engine and the asset pipeline. The engine only ever
//! sees these traits: template compilation/caching and asset bundling live
//! behind them.
//!
//! - [`ViewEngine`]: render a named view with data into markup. The bundled
//!   implementation is [`JinjaEngine`], which registers every template once at
//!   startup so rendering is synchronous from the caller's perspective.
//! - [`AssetResolver`]: map a logical asset path to its public URL, falling
//!   back to the logical path itself when unresolved.

use anyhow::Context;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Template engine seam: `render(view, data) → markup`.
pub trait ViewEngine: Send + Sync {
    fn render(&self, view: &str, data: &Value) -> anyhow::Result<String>;
}

/// MiniJinja-backed view engine with templates registered at startup.
pub struct JinjaEngine {
    env: minijinja::Environment<'static>,
}

impl JinjaEngine {
    /// Load every regular file under `dir` (non-recursive) as a template,
    /// keyed by file name.
    pub fn from_dir(dir: &Path) -> anyhow::Result<Self> {
        let mut env = minijinja::Environment::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("template directory {} not readable", dir.display()))?;
        let mut count = 0usize;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let source = std::fs::read_to_string(entry.path())
                .with_context(|| format!("template {} not readable", entry.path().display()))?;
            env.add_template_owned(name, source)?;
            count += 1;
        }
        tracing::info!(dir = %dir.display(), templates = count, "View templates loaded");
        Ok(JinjaEngine { env })
    }

    /// Build from inline `(name, source)` pairs. Used by tests and the demo
    /// page table.
    pub fn from_templates<I, S>(templates: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let mut env = minijinja::Environment::new();
        for (name, source) in templates {
            env.add_template_owned(name.into(), source.into())?;
        }
        Ok(JinjaEngine { env })
    }
}

impl ViewEngine for JinjaEngine {
    fn render(&self, view: &str, data: &Value) -> anyhow::Result<String> {
        let template = self
            .env
            .get_template(view)
            .with_context(|| format!("view {view:?} is not registered"))?;
        let markup = template
            .render(data)
            .with_context(|| format!("view {view:?} failed to render"))?;
        Ok(markup)
    }
}

/// Asset pipeline seam: `resolve(logical) → public URL`.
pub trait AssetResolver: Send + Sync {
    /// Resolve a logical path. Implementations fall back to returning the
    /// logical path unchanged when they cannot resolve it.
    fn resolve(&self, logical_path: &str) -> String;
}

/// Resolver backed by a manifest mapping logical paths to published URLs.
///
/// Unknown paths resolve to themselves, so an unhashed development setup keeps
/// working without a manifest entry per file.
#[derive(Default)]
pub struct ManifestAssets {
    manifest: HashMap<String, String>,
}

impl ManifestAssets {
    pub fn from_map(manifest: HashMap<String, String>) -> Self {
        ManifestAssets { manifest }
    }

    /// Load a YAML manifest of `logical: public` pairs.
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("asset manifest {} not readable", path.display()))?;
        let manifest: HashMap<String, String> =
            serde_yaml::from_str(&raw).context("asset manifest is not a string map")?;
        tracing::info!(path = %path.display(), entries = manifest.len(), "Asset manifest loaded");
        Ok(ManifestAssets { manifest })
    }
}

impl AssetResolver for ManifestAssets {
    fn resolve(&self, logical_path: &str) -> String {
        self.manifest
            .get(logical_path)
            .cloned()
            .unwrap_or_else(|| logical_path.to_string())
    }
}
