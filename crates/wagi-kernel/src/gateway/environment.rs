//! Per-module environment binding.
//!
//! A module sees exactly the keys declared in its route's `Environment`
//! block and nothing from the host process. Values may embed `${NAME}`
//! placeholders which are resolved against a [`DeploymentVars`] snapshot
//! captured once at startup. An unresolved placeholder is a
//! [`GatewayError::UnresolvedPlaceholder`].

use super::error::GatewayError;
use super::router::RouteConfig;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, trace};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

// ─────────────────────────────────────────────────────────────────────────────
// Deployment variables
// ─────────────────────────────────────────────────────────────────────────────

/// Variables available for placeholder substitution.
///
/// Captured once and never mutated; modules never see this map directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentVars {
    vars: BTreeMap<String, String>,
}

impl DeploymentVars {
    /// An empty variable set: every placeholder is unresolved.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot the current process environment.
    pub fn from_process_env() -> Self {
        std::env::vars().collect()
    }

    /// Builder: add one variable.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DeploymentVars {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable, resolved environment handed to one module invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    vars: Arc<BTreeMap<String, String>>,
}

impl EnvironmentSnapshot {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvironmentSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: Arc::new(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Binder
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves route templates against a shared [`DeploymentVars`] snapshot.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentBinder {
    deployment: Arc<DeploymentVars>,
}

impl EnvironmentBinder {
    pub fn new(deployment: DeploymentVars) -> Self {
        Self {
            deployment: Arc::new(deployment),
        }
    }

    pub fn deployment(&self) -> &DeploymentVars {
        &self.deployment
    }

    /// Produce the environment snapshot for `route`.
    ///
    /// Only keys declared on the route appear in the result.
    pub fn resolve(&self, route: &RouteConfig) -> Result<EnvironmentSnapshot, GatewayError> {
        let mut resolved = BTreeMap::new();
        for (key, template) in &route.environment {
            let value = self.substitute(&route.id, key, template)?;
            resolved.insert(key.clone(), value);
        }
        trace!(route = %route.id, keys = resolved.len(), "environment resolved");
        Ok(EnvironmentSnapshot {
            vars: Arc::new(resolved),
        })
    }

    /// Resolve placeholders in the route's path pattern and allowlist.
    ///
    /// The environment block is left templated; it is resolved per request by
    /// [`resolve`](Self::resolve).
    pub fn bind_route(&self, route: &RouteConfig) -> Result<RouteConfig, GatewayError> {
        let mut bound = route.clone();
        bound.path_pattern = self.substitute(&route.id, "Route", &route.path_pattern)?;
        bound.allowed_hosts = route
            .allowed_hosts
            .iter()
            .map(|entry| self.substitute(&route.id, "AllowedHosts", entry))
            .collect::<Result<_, _>>()?;
        debug!(
            route = %route.id,
            path = %bound.path_pattern,
            allowed_hosts = bound.allowed_hosts.len(),
            "route placeholders bound"
        );
        Ok(bound)
    }

    /// Replace every `${NAME}` in `template`, failing on the first unknown name.
    pub fn substitute(&self, route_id: &str, key: &str, template: &str) -> Result<String, GatewayError> {
        if let Some(missing) = PLACEHOLDER
            .captures_iter(template)
            .map(|caps| caps[1].to_string())
            .find(|name| self.deployment.get(name).is_none())
        {
            return Err(GatewayError::UnresolvedPlaceholder {
                route: route_id.to_string(),
                key: key.to_string(),
                variable: missing,
            });
        }
        Ok(PLACEHOLDER
            .replace_all(template, |caps: &Captures| {
                self.deployment.get(&caps[1]).unwrap_or_default().to_string()
            })
            .into_owned())
    }
}
