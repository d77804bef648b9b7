//! Specificity-ordered path router implementing [`GatewayRouter`].
//!
//! Routes are kept sorted so that the first match is the most specific one:
//! exact routes before wildcard routes, deeper templates before shallower
//! ones, and literal segments before `{param}` captures. Equal ranks keep
//! registration order. Resolution is a linear scan with a segment matcher,
//! O(R × D) for R routes of depth D, which is fine for module tables.

use std::collections::HashMap;
use wagi_kernel::gateway::{
    GatewayError, GatewayRouter, HttpMethod, RouteConfig, RouteMatch, WILDCARD_SUFFIX,
    routes_conflict, validate_path_pattern,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture(String),
}

/// A registered route with its template pre-split into segments.
#[derive(Debug, Clone)]
struct CompiledRoute {
    config: RouteConfig,
    segments: Vec<Segment>,
    wildcard: bool,
}

impl CompiledRoute {
    fn compile(config: RouteConfig) -> Self {
        let (body, wildcard) = match config.path_pattern.strip_suffix(WILDCARD_SUFFIX) {
            Some(body) => (body.to_string(), true),
            None => (config.path_pattern.clone(), false),
        };
        let segments = split_path(&body)
            .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => Segment::Capture(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();
        Self {
            config,
            segments,
            wildcard,
        }
    }

    /// Sort key; larger is more specific.
    fn rank(&self) -> (bool, usize, usize) {
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        (!self.wildcard, self.segments.len(), literals)
    }

    /// Match a concrete path, returning captures and the wildcard remainder.
    fn match_path(&self, path: &str) -> Option<(HashMap<String, String>, Option<String>)> {
        let parts: Vec<&str> = split_path(path).collect();

        if self.wildcard {
            if parts.len() < self.segments.len() {
                return None;
            }
        } else if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts.iter()) {
            match segment {
                Segment::Capture(name) => {
                    params.insert(name.clone(), (*part).to_string());
                }
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
            }
        }

        let rest = self
            .wildcard
            .then(|| parts[self.segments.len()..].join("/"));
        Some((params, rest))
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// [`GatewayRouter`] implementation using specificity-sorted linear lookup
/// with `{param}` and trailing `/...` template matching.
#[derive(Default)]
pub struct TrieRouter {
    routes: Vec<CompiledRoute>,
}

impl TrieRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl GatewayRouter for TrieRouter {
    fn register(&mut self, route: RouteConfig) -> Result<(), GatewayError> {
        if self.routes.iter().any(|r| r.config.id == route.id) {
            return Err(GatewayError::DuplicateRoute(route.id));
        }
        validate_path_pattern(&route.id, &route.path_pattern)?;
        if let Some(existing) = self.routes.iter().find(|r| routes_conflict(&r.config, &route)) {
            return Err(GatewayError::ConflictingRoute(
                existing.config.id.clone(),
                route.id.clone(),
                route.path_pattern.clone(),
            ));
        }

        let compiled = CompiledRoute::compile(route);
        let rank = compiled.rank();
        // After every route of equal or higher rank: ties keep registration order.
        let pos = self.routes.partition_point(|r| r.rank() >= rank);
        self.routes.insert(pos, compiled);
        Ok(())
    }

    fn resolve(&self, path: &str, method: &HttpMethod) -> Option<RouteMatch> {
        self.routes
            .iter()
            .filter(|route| route.config.accepts(method))
            .find_map(|route| {
                let (path_params, wildcard) = route.match_path(path)?;
                Some(RouteMatch {
                    route_id: route.config.id.clone(),
                    path_params,
                    wildcard,
                    timeout_ms: route.config.timeout_ms,
                })
            })
    }

    fn matches_path(&self, path: &str) -> bool {
        self.routes.iter().any(|r| r.match_path(path).is_some())
    }

    fn routes(&self) -> Vec<&RouteConfig> {
        self.routes.iter().map(|r| &r.config).collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
