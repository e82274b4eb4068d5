//! Router core - hot path for page resolution.

use crate::blueprint::PageBlueprint;
use crate::dispatcher::RequestContext;
use crate::registry::ExpiringRegistry;
use regex::Regex;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum number of path parameters before heap allocation.
/// Most routes have ≤4 path params (e.g., /users/{id}/posts/{post_id}).
pub const MAX_INLINE_PARAMS: usize = 8;

/// Stack-allocated parameter storage for the hot path.
///
/// Param names use `Arc<str>` instead of `String` because names come from the
/// static route table (known at startup) and `Arc::clone()` is O(1); values
/// remain `String` as they are per-request data from the URL.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// A page pattern compiled for matching.
struct CompiledPage {
    blueprint: Arc<PageBlueprint>,
    regex: Regex,
    param_names: Vec<Arc<str>>,
}

impl CompiledPage {
    fn compile(blueprint: Arc<PageBlueprint>) -> Self {
        let (regex, param_names) = path_to_regex(blueprint.path_pattern.as_ref());
        CompiledPage {
            blueprint,
            regex,
            param_names,
        }
    }

    /// Extract path parameters if the pattern matches `path`, else empty.
    fn extract_params(&self, path: &str) -> ParamVec {
        let mut params = ParamVec::new();
        if let Some(caps) = self.regex.captures(path) {
            for (i, name) in self.param_names.iter().enumerate() {
                if let Some(value) = caps.get(i + 1) {
                    params.push((Arc::clone(name), value.as_str().to_string()));
                }
            }
        }
        params
    }
}

/// Result of resolving a request to a page blueprint.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub blueprint: Arc<PageBlueprint>,
    /// Path parameters extracted from the URL (e.g., `{id}` → `("id", "123")`)
    pub params: ParamVec,
    /// Whether the winner was the appended "not found" fallback rather than a
    /// registered candidate. Live rebinds treat this as an unknown page id.
    pub is_fallback: bool,
}

/// Resolves requests to page blueprints with deterministic first-match
/// semantics over an ordered candidate list.
pub struct Router {
    /// Registered pages, in registration order.
    pages: Vec<Arc<CompiledPage>>,
    /// Fallback blueprints keyed by status code (404 and 500 at minimum).
    fallbacks: HashMap<u16, Arc<CompiledPage>>,
    /// Cached candidate lists keyed by `method@path` or explicit id.
    cache: ExpiringRegistry<Vec<Arc<CompiledPage>>>,
}

impl Router {
    pub fn new(cache_ttl: Duration) -> Self {
        Router {
            pages: Vec::new(),
            fallbacks: HashMap::new(),
            cache: ExpiringRegistry::new(cache_ttl),
        }
    }

    /// Register a page blueprint. Registration order is match order.
    pub fn register(&mut self, blueprint: PageBlueprint) -> Arc<PageBlueprint> {
        let blueprint = Arc::new(blueprint);
        info!(
            page = %blueprint.id,
            pattern = %blueprint.path_pattern,
            methods = ?blueprint.methods,
            pagelets = blueprint.pagelets.len(),
            "Page registered"
        );
        self.pages.push(Arc::new(CompiledPage::compile(Arc::clone(&blueprint))));
        blueprint
    }

    /// Register the fallback page for a status code (404, 500, …).
    pub fn register_fallback(&mut self, status: u16, blueprint: PageBlueprint) -> Arc<PageBlueprint> {
        let blueprint = Arc::new(PageBlueprint {
            status: Some(status),
            ..blueprint
        });
        info!(status = status, page = %blueprint.id, "Fallback page registered");
        self.fallbacks.insert(
            status,
            Arc::new(CompiledPage::compile(Arc::clone(&blueprint))),
        );
        blueprint
    }

    /// The fallback blueprint for a status code, if one is registered.
    ///
    /// Requesting a status with no registered blueprint is a configuration
    /// error; the engine validates 404/500 presence at construction.
    pub fn fallback(&self, status: u16) -> Option<Arc<PageBlueprint>> {
        self.fallbacks.get(&status).map(|c| Arc::clone(&c.blueprint))
    }

    /// Resolve a request to a page blueprint. Never yields "no result": the
    /// worst case is the 404 fallback.
    ///
    /// Guard errors abort the scan and propagate; guard rejections move on to
    /// the next candidate.
    pub fn resolve(
        &self,
        ctx: &RequestContext,
        explicit_id: Option<&str>,
    ) -> anyhow::Result<Resolution> {
        let key = match explicit_id {
            Some(id) => id.to_string(),
            None => format!("{}@{}", ctx.method, ctx.path),
        };

        let candidates = match self.cache.get(&key) {
            Some(cached) => {
                debug!(key = %key, candidates = cached.len(), "Route cache hit");
                cached
            }
            None => {
                let scanned = self.scan(ctx, explicit_id);
                debug!(key = %key, candidates = scanned.len(), "Route cache miss, table scanned");
                if !scanned.is_empty() {
                    self.cache.insert(key.clone(), scanned.clone());
                }
                scanned
            }
        };

        // Sequential, in-order guard evaluation: first accept wins. Guards
        // may suspend their coroutine, so issuing them concurrently would
        // make the winner nondeterministic.
        for candidate in &candidates {
            let params = candidate.extract_params(&ctx.path);
            let accepted = match &candidate.blueprint.guard {
                None => true,
                Some(guard) => {
                    let mut scoped = ctx.clone();
                    scoped.path_params = params.clone();
                    guard(&scoped)?
                }
            };
            if accepted {
                debug!(
                    key = %key,
                    page = %candidate.blueprint.id,
                    params = ?params,
                    "Route resolved"
                );
                return Ok(Resolution {
                    blueprint: Arc::clone(&candidate.blueprint),
                    params,
                    is_fallback: false,
                });
            }
        }

        // Every candidate rejected (or none matched): the guaranteed final
        // candidate is the unconditional 404 fallback.
        let fallback = self
            .fallbacks
            .get(&404)
            .ok_or_else(|| anyhow::anyhow!("no 404 fallback page registered"))?;
        warn!(key = %key, "No candidate accepted, resolving to fallback");
        Ok(Resolution {
            blueprint: Arc::clone(&fallback.blueprint),
            params: ParamVec::new(),
            is_fallback: true,
        })
    }

    /// Scan the page table in registration order.
    fn scan(&self, ctx: &RequestContext, explicit_id: Option<&str>) -> Vec<Arc<CompiledPage>> {
        match explicit_id {
            Some(id) => self
                .pages
                .iter()
                .find(|p| p.blueprint.id.as_ref() == id)
                .map(|p| vec![Arc::clone(p)])
                .unwrap_or_default(),
            None => self
                .pages
                .iter()
                .filter(|p| {
                    p.blueprint.allows_method(&ctx.method) && p.regex.is_match(&ctx.path)
                })
                .map(Arc::clone)
                .collect(),
        }
    }

    /// Print all registered pages to stdout. Useful for startup debugging.
    pub fn dump_pages(&self) {
        println!("[pages] count={}", self.pages.len());
        for page in &self.pages {
            println!(
                "[page] {} {} ({:?})",
                page.blueprint.id, page.blueprint.path_pattern, page.blueprint.methods
            );
        }
        for (status, page) in &self.fallbacks {
            println!("[fallback] {} -> {}", status, page.blueprint.id);
        }
    }

    /// Number of registered (non-fallback) pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Number of live route cache entries.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

/// Convert a route pattern to a regex and extract parameter names.
///
/// `/users/{id}` becomes `^/users/([^/]+)$` with parameter names `["id"]`.
fn path_to_regex(path: &str) -> (Regex, Vec<Arc<str>>) {
    if path == "/" {
        return (
            Regex::new(r"^/$").expect("failed to compile path regex"),
            Vec::new(),
        );
    }

    let mut pattern = String::with_capacity(path.len() + 5);
    pattern.push('^');
    let mut param_names: Vec<Arc<str>> = Vec::with_capacity(path.matches('{').count());

    for segment in path.split('/') {
        if segment.starts_with('{') && segment.ends_with('}') {
            let param_name = segment.trim_start_matches('{').trim_end_matches('}');
            pattern.push_str("/([^/]+)");
            param_names.push(Arc::from(param_name));
        } else if !segment.is_empty() {
            pattern.push('/');
            pattern.push_str(segment);
        }
    }

    pattern.push('$');
    let regex = Regex::new(&pattern).expect("failed to compile path regex");

    (regex, param_names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_to_regex() {
        let (regex, params) = path_to_regex("/users/{id}");
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].as_ref(), "id");
        assert!(regex.is_match("/users/123"));
        assert!(!regex.is_match("/users/123/posts"));
    }

    #[test]
    fn test_root_pattern() {
        let (regex, params) = path_to_regex("/");
        assert!(params.is_empty());
        assert!(regex.is_match("/"));
        assert!(!regex.is_match("/x"));
    }

    #[test]
    fn test_multi_param_extraction() {
        let bp = PageBlueprint::builder("post", "/users/{user_id}/posts/{post_id}").build();
        let compiled = CompiledPage::compile(Arc::new(bp));
        let params = compiled.extract_params("/users/u1/posts/p9");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0], (Arc::from("user_id"), "u1".to_string()));
        assert_eq!(params[1], (Arc::from("post_id"), "p9".to_string()));
    }
}
