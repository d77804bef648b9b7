//! Gateway process settings.
//!
//! Loaded with [`wagi_kernel::config::load_with_env`]: an optional settings
//! file (TOML / YAML / JSON), then `WAGI_`-prefixed environment variables
//! with `__` for nesting, e.g. `WAGI_REQUEST_TIMEOUT_MS=5000` or
//! `WAGI_WASM__MAX_FUEL=1000000`. Command-line flags override both.

use crate::executor::{ScriptLimits, WasmLimits};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use wagi_kernel::config::{ConfigResult, load_with_env};

/// Environment variable prefix for settings overrides.
pub const ENV_PREFIX: &str = "WAGI";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Socket address to listen on.
    pub listen: String,
    /// Module documents, merged in order.
    pub modules: Vec<PathBuf>,
    /// Base directory for relative module references. Defaults to the
    /// directory of the first module document.
    pub module_dir: Option<PathBuf>,
    /// Default execution deadline per request.
    pub request_timeout_ms: u64,
    /// Timeout applied by the outbound transport to each call.
    pub outbound_timeout_ms: u64,
    /// Largest accepted inbound request body.
    pub max_body_bytes: usize,
    pub wasm: WasmLimits,
    pub script: ScriptLimits,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3000".to_string(),
            modules: Vec::new(),
            module_dir: None,
            request_timeout_ms: 30_000,
            outbound_timeout_ms: 30_000,
            max_body_bytes: 2 * 1024 * 1024,
            wasm: WasmLimits::default(),
            script: ScriptLimits::default(),
        }
    }
}

impl GatewaySettings {
    /// Load from an optional file plus `WAGI_*` environment overrides.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        load_with_env(path, ENV_PREFIX)
    }

    /// Directory relative module references resolve against.
    pub fn effective_module_dir(&self) -> PathBuf {
        if let Some(dir) = &self.module_dir {
            return dir.clone();
        }
        self.modules
            .first()
            .and_then(|doc| doc.parent())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sensible() {
        let s = GatewaySettings::default();
        assert_eq!(s.request_timeout_ms, 30_000);
        assert!(s.modules.is_empty());
        assert_eq!(s.effective_module_dir(), PathBuf::from("."));
    }

    #[test]
    fn module_dir_defaults_to_first_document_dir() {
        let s = GatewaySettings {
            modules: vec![PathBuf::from("/srv/wagi/modules.json"), PathBuf::from("/etc/overlay.json")],
            ..Default::default()
        };
        assert_eq!(s.effective_module_dir(), PathBuf::from("/srv/wagi"));
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
listen = "0.0.0.0:8080"
modules = ["modules.json"]
request_timeout_ms = 1500

[wasm]
max_fuel = 5000
"#
        )
        .unwrap();

        let s = GatewaySettings::load(Some(file.path())).unwrap();
        assert_eq!(s.listen, "0.0.0.0:8080");
        assert_eq!(s.modules, vec![PathBuf::from("modules.json")]);
        assert_eq!(s.request_timeout_ms, 1500);
        assert_eq!(s.wasm.max_fuel, 5000);
        // Unset nested fields keep their defaults.
        assert_eq!(s.wasm.max_memory_bytes, WasmLimits::default().max_memory_bytes);
        assert_eq!(s.script.max_operations, ScriptLimits::default().max_operations);
    }
}
