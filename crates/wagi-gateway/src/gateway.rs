//! The assembled gateway: module table, dispatcher and settings.
//!
//! ```rust,no_run
//! use wagi_gateway::{Gateway, GatewaySettings};
//! use wagi_kernel::gateway::{DeploymentVars, ModuleDocument};
//!
//! # fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let document = ModuleDocument::load("modules.json")?;
//! let gateway = Gateway::builder(document)
//!     .deployment(DeploymentVars::from_process_env())
//!     .settings(GatewaySettings::default())
//!     .build()?;
//! for disabled in &gateway.report().disabled {
//!     eprintln!("{} disabled: {}", disabled.route_id, disabled.reason);
//! }
//! # Ok(())
//! # }
//! ```

use crate::dispatcher::{DispatchSink, Dispatcher, TracingSink};
use crate::error::{DispatchResult, LoadError};
use crate::executor::{ModuleResolver, NativeRegistry, WasmRuntime};
use crate::settings::GatewaySettings;
use crate::table::{LoadReport, ModuleTable, RouteSummary};
use crate::transport::ReqwestTransport;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use wagi_kernel::gateway::{
    DeploymentVars, EnvironmentBinder, GatewayConfig, GatewayRequest, GatewayResponse,
    HttpTransport, ModuleDocument, ModuleExecutor,
};

const DEFAULT_GATEWAY_ID: &str = "wagi-gateway";

pub struct Gateway {
    id: String,
    settings: GatewaySettings,
    dispatcher: Dispatcher,
}

impl Gateway {
    pub fn builder(document: ModuleDocument) -> GatewayBuilder {
        GatewayBuilder::new(document)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Dispatch one request.
    pub async fn dispatch(&self, request: GatewayRequest) -> DispatchResult<GatewayResponse> {
        self.dispatcher.dispatch(request).await
    }

    pub fn report(&self) -> &LoadReport {
        self.dispatcher.table().report()
    }

    pub fn routes(&self) -> Vec<RouteSummary> {
        self.dispatcher.table().summaries()
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }
}

pub struct GatewayBuilder {
    document: ModuleDocument,
    id: String,
    deployment: DeploymentVars,
    settings: GatewaySettings,
    natives: NativeRegistry,
    transport: Option<Arc<dyn HttpTransport>>,
    sink: Arc<dyn DispatchSink>,
}

impl GatewayBuilder {
    fn new(document: ModuleDocument) -> Self {
        Self {
            document,
            id: DEFAULT_GATEWAY_ID.to_string(),
            deployment: DeploymentVars::empty(),
            settings: GatewaySettings::default(),
            natives: NativeRegistry::default(),
            transport: None,
            sink: Arc::new(TracingSink),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Deployment variables `${NAME}` placeholders resolve against.
    pub fn deployment(mut self, deployment: DeploymentVars) -> Self {
        self.deployment = deployment;
        self
    }

    pub fn settings(mut self, settings: GatewaySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the outbound transport. Defaults to [`ReqwestTransport`].
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn DispatchSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Register an extra `builtin:<name>` module.
    pub fn native(mut self, name: impl Into<String>, module: Arc<dyn ModuleExecutor>) -> Self {
        self.natives.register(name, module);
        self
    }

    /// Validate, bind and compile everything.
    ///
    /// Structural document errors fail the build. Route-scoped problems
    /// (unresolved placeholders, modules that fail to compile) disable that
    /// route and are listed in [`Gateway::report`].
    pub fn build(self) -> Result<Gateway, LoadError> {
        let config = GatewayConfig::from_document(&self.id, &self.document)?
            .with_timeout_ms(self.settings.request_timeout_ms);

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let timeout = Duration::from_millis(self.settings.outbound_timeout_ms);
                Arc::new(ReqwestTransport::new(timeout).map_err(|e| LoadError::Transport(e.to_string()))?)
            }
        };
        let wasm = WasmRuntime::new(self.settings.wasm.clone()).map_err(|e| LoadError::Runtime(e.to_string()))?;
        let resolver = ModuleResolver::new(
            self.settings.effective_module_dir(),
            self.natives,
            Arc::new(wasm),
            self.settings.script.clone(),
        );

        let table = ModuleTable::load(&config, EnvironmentBinder::new(self.deployment), &resolver)?;
        info!(
            gateway = %self.id,
            loaded = table.report().loaded.len(),
            disabled = table.report().disabled.len(),
            "module table loaded"
        );

        Ok(Gateway {
            id: self.id,
            settings: self.settings,
            dispatcher: Dispatcher::new(Arc::new(table), transport, self.sink),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wagi_kernel::gateway::{DocumentFormat, GatewayError, HttpMethod};

    const DOC: &str = r#"{
        "Wagi": {
            "Modules": {
                "Echo": { "Route": "/test", "Module": "builtin:echo", "Methods": ["POST"] },
                "Write": {
                    "Route": "/writeblob",
                    "Module": "builtin:blob-write",
                    "Environment": { "STORAGE_ACCOUNT": "${ACCOUNT}" },
                    "AllowedHosts": ["https://${ACCOUNT}.blob.core.windows.net"]
                }
            }
        }
    }"#;

    fn document() -> ModuleDocument {
        ModuleDocument::from_str(DOC, DocumentFormat::Json).unwrap()
    }

    #[tokio::test]
    async fn builds_and_dispatches() {
        let gw = Gateway::builder(document())
            .deployment(DeploymentVars::empty().with("ACCOUNT", "acct"))
            .build()
            .unwrap();
        assert_eq!(gw.id(), DEFAULT_GATEWAY_ID);
        assert!(gw.report().disabled.is_empty());
        assert_eq!(gw.routes().len(), 2);

        let resp = gw
            .dispatch(GatewayRequest::new("r", HttpMethod::Post, "/test").with_body("x"))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
    }

    #[test]
    fn missing_deployment_var_disables_route() {
        let gw = Gateway::builder(document()).build().unwrap();
        assert_eq!(gw.report().loaded, vec!["Echo".to_string()]);
        assert!(gw.report().is_disabled("Write"));
    }

    #[test]
    fn settings_timeout_becomes_default_deadline() {
        let settings = GatewaySettings {
            request_timeout_ms: 1234,
            ..Default::default()
        };
        let gw = Gateway::builder(document())
            .deployment(DeploymentVars::empty().with("ACCOUNT", "acct"))
            .settings(settings)
            .build()
            .unwrap();
        assert!(gw.routes().iter().all(|r| r.timeout_ms == 1234));
    }

    #[test]
    fn structural_errors_fail_build() {
        let doc = ModuleDocument::from_str(
            r#"{ "Wagi": { "Modules": { "A": { "Route": "no-slash", "Module": "builtin:echo" } } } }"#,
            DocumentFormat::Json,
        )
        .unwrap();
        let err = Gateway::builder(doc).build().err().unwrap();
        assert!(matches!(err, LoadError::Document(GatewayError::InvalidPathPattern(..))));
    }
}
