//! The module table: every route the gateway serves, fully prepared.
//!
//! Loading runs in three passes:
//!
//! 1. **Bind**: resolve `${NAME}` placeholders in each route's path, allowlist
//!    and environment. An unresolved placeholder disables that route.
//! 2. **Validate**: structural checks over the bound routes (path syntax,
//!    allowlist entries, duplicate or conflicting routes). Any failure here
//!    aborts the load.
//! 3. **Compile**: resolve each module reference to an executor. A compile
//!    failure disables that route.
//!
//! Disabled routes are never registered, so requests to them get 404. They
//! are listed in the [`LoadReport`].
//!
//! The table is immutable once built and shared by `Arc` across requests.

use crate::executor::ModuleResolver;
use crate::router::TrieRouter;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use wagi_kernel::gateway::{
    AllowList, EnvironmentBinder, GatewayConfig, GatewayError, GatewayRouter, HttpMethod,
    ModuleExecutor, ModuleKind, RouteConfig, RouteMatch,
};

/// A route ready to serve.
pub struct LoadedModule {
    /// Route with path and allowlist placeholders resolved. The environment
    /// stays templated and is resolved per request.
    pub route: RouteConfig,
    pub allowlist: Arc<AllowList>,
    pub executor: Arc<dyn ModuleExecutor>,
    /// Effective deadline in milliseconds.
    pub timeout_ms: u64,
}

/// A route that was declared but will not be served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisabledRoute {
    pub route_id: String,
    pub reason: String,
}

/// Outcome of loading the module table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub disabled: Vec<DisabledRoute>,
}

impl LoadReport {
    pub fn is_disabled(&self, route_id: &str) -> bool {
        self.disabled.iter().any(|d| d.route_id == route_id)
    }

    fn disable(&mut self, route_id: &str, err: &GatewayError) {
        warn!(route = %route_id, error = %err, "route disabled");
        self.disabled.push(DisabledRoute {
            route_id: route_id.to_string(),
            reason: err.to_string(),
        });
    }
}

/// Public summary of one served route.
#[derive(Debug, Clone, Serialize)]
pub struct RouteSummary {
    pub id: String,
    pub route: String,
    pub methods: Vec<HttpMethod>,
    pub module: String,
    pub kind: ModuleKind,
    pub allowed_hosts: Vec<String>,
    pub timeout_ms: u64,
}

pub struct ModuleTable {
    router: TrieRouter,
    modules: HashMap<String, Arc<LoadedModule>>,
    binder: EnvironmentBinder,
    report: LoadReport,
}

impl ModuleTable {
    /// Build the table from `config`. Returns `Err` only for structural errors.
    pub fn load(
        config: &GatewayConfig,
        binder: EnvironmentBinder,
        resolver: &ModuleResolver,
    ) -> Result<Self, GatewayError> {
        let mut report = LoadReport::default();

        // Pass 1: bind.
        let mut bound = Vec::with_capacity(config.routes.len());
        for route in &config.routes {
            let prepared = binder
                .bind_route(route)
                .and_then(|b| binder.resolve(&b).map(|_| b));
            match prepared {
                Ok(route) => bound.push(route),
                Err(err) if err.is_route_scoped() => report.disable(&route.id, &err),
                Err(err) => return Err(err),
            }
        }

        // Pass 2: validate.
        let bound_config = GatewayConfig {
            id: config.id.clone(),
            routes: bound,
            request_timeout_ms: config.request_timeout_ms,
        };
        bound_config.validate()?;
        let mut allowlists = Vec::with_capacity(bound_config.routes.len());
        for route in &bound_config.routes {
            allowlists.push(Arc::new(AllowList::parse(&route.id, &route.allowed_hosts)?));
        }

        // Pass 3: compile and register.
        let mut router = TrieRouter::new();
        let mut modules = HashMap::new();
        for (route, allowlist) in bound_config.routes.iter().zip(allowlists) {
            let executor = match resolver.resolve(&route.id, &route.module_reference) {
                Ok(executor) => executor,
                Err(err) if err.is_route_scoped() => {
                    report.disable(&route.id, &err);
                    continue;
                }
                Err(err) => return Err(err),
            };
            router.register(route.clone())?;
            info!(
                route = %route.id,
                path = %route.path_pattern,
                kind = %executor.kind(),
                allowed_hosts = allowlist.entries().len(),
                "route registered"
            );
            report.loaded.push(route.id.clone());
            modules.insert(
                route.id.clone(),
                Arc::new(LoadedModule {
                    route: route.clone(),
                    allowlist,
                    executor,
                    timeout_ms: bound_config.timeout_for(route),
                }),
            );
        }

        Ok(Self {
            router,
            modules,
            binder,
            report,
        })
    }

    /// Most specific route for `(path, method)` and its module.
    pub fn resolve(&self, path: &str, method: &HttpMethod) -> Option<(RouteMatch, Arc<LoadedModule>)> {
        let route_match = self.router.resolve(path, method)?;
        let module = self.modules.get(&route_match.route_id)?.clone();
        Some((route_match, module))
    }

    /// Whether some route serves `path` under any method.
    pub fn matches_path(&self, path: &str) -> bool {
        self.router.matches_path(path)
    }

    pub fn binder(&self) -> &EnvironmentBinder {
        &self.binder
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Served routes in resolution order.
    pub fn summaries(&self) -> Vec<RouteSummary> {
        self.router
            .routes()
            .into_iter()
            .filter_map(|route| self.modules.get(&route.id))
            .map(|m| RouteSummary {
                id: m.route.id.clone(),
                route: m.route.path_pattern.clone(),
                methods: m.route.methods.clone(),
                module: m.route.module_reference.clone(),
                kind: m.executor.kind(),
                allowed_hosts: m.allowlist.entries().iter().map(|h| h.to_string()).collect(),
                timeout_ms: m.timeout_ms,
            })
            .collect()
    }
}
