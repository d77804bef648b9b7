//! Module executors and reference resolution.
//!
//! A route's `Module` reference picks the execution technology:
//!
//! | Reference | Executor |
//! |-----------|----------|
//! | `builtin:<name>` | [`native`] registry |
//! | `*.rhai` | [`script::ScriptModule`] |
//! | `*.wasm`, `*.wat` | [`wasm::WasmModule`] |
//!
//! Relative file references resolve against the configured module directory.
//! Everything is compiled once at load; a failure disables only that route.

pub mod native;
pub mod script;
pub mod shared_key;
pub mod wasm;

pub use native::{BUILTIN_PREFIX, NativeRegistry};
pub use script::{ScriptLimits, ScriptModule};
pub use wasm::{WasmLimits, WasmModule, WasmRuntime};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use wagi_kernel::gateway::{GatewayError, ModuleExecutor};

/// Turns module references into ready-to-run executors.
pub struct ModuleResolver {
    module_dir: PathBuf,
    natives: NativeRegistry,
    wasm: Arc<WasmRuntime>,
    script_limits: ScriptLimits,
}

impl ModuleResolver {
    pub fn new(
        module_dir: impl Into<PathBuf>,
        natives: NativeRegistry,
        wasm: Arc<WasmRuntime>,
        script_limits: ScriptLimits,
    ) -> Self {
        Self {
            module_dir: module_dir.into(),
            natives,
            wasm,
            script_limits,
        }
    }

    /// Resolve and compile `reference` for `route_id`.
    pub fn resolve(&self, route_id: &str, reference: &str) -> Result<Arc<dyn ModuleExecutor>, GatewayError> {
        let load_err = |msg: String| GatewayError::ModuleLoad(route_id.to_string(), msg);
        let reference = reference.trim();

        if let Some(name) = reference.strip_prefix(BUILTIN_PREFIX) {
            return self.natives.get(name).ok_or_else(|| {
                load_err(format!(
                    "unknown builtin module '{name}' (available: {})",
                    self.natives.names().join(", ")
                ))
            });
        }

        let path = self.path_for(reference);
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        debug!(route = %route_id, path = %path.display(), "compiling module");
        match ext.as_deref() {
            Some("rhai") => Ok(Arc::new(ScriptModule::load(route_id, &path, self.script_limits.clone())?)),
            Some("wasm") | Some("wat") => Ok(Arc::new(WasmModule::load(route_id, self.wasm.clone(), &path)?)),
            _ => Err(load_err(format!("unrecognised module reference '{reference}'"))),
        }
    }

    fn path_for(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.module_dir.join(path)
        }
    }
}
