//! WebAssembly modules (`*.wasm` / `*.wat`) run in wasmtime.
//!
//! # Host ABI
//!
//! Imports live in the `wagi` module. Pointers and lengths are `i32` offsets
//! into the guest's exported `memory`.
//!
//! | Import | Signature | Meaning |
//! |--------|-----------|---------|
//! | `input_len` | `() -> i32` | request body length |
//! | `input_read` | `(ptr, cap) -> i32` | copy the body, returns bytes copied |
//! | `env_get` | `(kptr, klen, out, cap) -> i32` | value length, or `-1` when the key is not configured |
//! | `http_send` | `(mptr, mlen, uptr, ulen, bptr, blen) -> i32` | upstream status, or `-1` denied, `-2` transport, `-3` cancelled, `-4` bad method |
//! | `http_body_read` | `(ptr, cap) -> i32` | copy the last response body |
//! | `set_status` | `(code)` | response status (default 200) |
//! | `set_header` | `(kptr, klen, vptr, vlen)` | add a response header |
//! | `output_write` | `(ptr, len) -> i32` | append to the response body |
//!
//! The guest exports `handle() -> i32`; zero means success.
//!
//! Fuel bounds compute and [`SandboxLimits`] bounds linear memory plus the
//! bytes buffered on the host for the response. An epoch ticker lets the
//! store observe cancellation between instructions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use wagi_kernel::gateway::{
    EnvironmentSnapshot, GatewayError, HttpMethod, ModuleCapabilities, ModuleExecutor, ModuleFault,
    ModuleInput, ModuleKind, ModuleOutput, OutboundError, OutboundHttp, OutboundRequest,
};
use wasmtime::{
    Caller, Config, Engine, Linker, Memory, Module, ResourceLimiter, Store, Trap, UpdateDeadline,
};

/// Import module name for the host ABI.
pub const HOST_MODULE: &str = "wagi";

/// Resource bounds for wasm modules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WasmLimits {
    /// Maximum linear memory per instance, in bytes.
    pub max_memory_bytes: usize,
    /// Maximum response bytes (body plus headers) buffered on the host.
    pub max_output_bytes: usize,
    /// Fuel granted per request (roughly one unit per instruction).
    pub max_fuel: u64,
    /// Epoch tick period; bounds how quickly cancellation is observed.
    pub epoch_tick_ms: u64,
}

impl Default for WasmLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: 16 * 1024 * 1024, // 16MB
            max_output_bytes: 16 * 1024 * 1024, // 16MB
            max_fuel: 100_000_000,              // ~100M instructions
            epoch_tick_ms: 10,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime
// ─────────────────────────────────────────────────────────────────────────────

/// Shared wasmtime engine plus its epoch ticker.
pub struct WasmRuntime {
    engine: Engine,
    limits: WasmLimits,
    ticker: OnceLock<JoinHandle<()>>,
}

impl WasmRuntime {
    pub fn new(limits: WasmLimits) -> wasmtime::Result<Self> {
        let mut config = Config::new();
        config.consume_fuel(true);
        config.epoch_interruption(true);
        let engine = Engine::new(&config)?;
        Ok(Self {
            engine,
            limits,
            ticker: OnceLock::new(),
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn limits(&self) -> &WasmLimits {
        &self.limits
    }

    /// Start the epoch ticker on the current tokio runtime, once.
    fn ensure_ticker(&self) {
        self.ticker.get_or_init(|| {
            let engine = self.engine.clone();
            let tick = Duration::from_millis(self.limits.epoch_tick_ms.max(1));
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(tick);
                loop {
                    interval.tick().await;
                    engine.increment_epoch();
                }
            })
        });
    }
}

impl Drop for WasmRuntime {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get() {
            ticker.abort();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store state
// ─────────────────────────────────────────────────────────────────────────────

/// Memory and output limiter; remembers which ceiling the guest hit.
pub struct SandboxLimits {
    max_memory_bytes: usize,
    exceeded: bool,
    max_output_bytes: usize,
    output_used: usize,
    output_exceeded: bool,
}

impl SandboxLimits {
    fn new(limits: &WasmLimits) -> Self {
        Self {
            max_memory_bytes: limits.max_memory_bytes,
            exceeded: false,
            max_output_bytes: limits.max_output_bytes,
            output_used: 0,
            output_exceeded: false,
        }
    }

    /// Reserve `bytes` of response output. Fails once the budget is spent.
    fn charge_output(&mut self, bytes: usize) -> wasmtime::Result<()> {
        match self.output_used.checked_add(bytes) {
            Some(total) if total <= self.max_output_bytes => {
                self.output_used = total;
                Ok(())
            }
            _ => {
                self.output_exceeded = true;
                Err(wasmtime::Error::msg("response output limit exceeded"))
            }
        }
    }
}

impl ResourceLimiter for SandboxLimits {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        let allowed = desired <= self.max_memory_bytes && maximum.is_none_or(|max| desired <= max);
        if !allowed {
            self.exceeded = true;
        }
        Ok(allowed)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(maximum.is_none_or(|max| desired <= max))
    }
}

/// Per-request store data visible to host functions.
struct HostState {
    input: Vec<u8>,
    env: EnvironmentSnapshot,
    http: Arc<dyn OutboundHttp>,
    runtime: Handle,
    last_body: Vec<u8>,
    status: u16,
    headers: HashMap<String, String>,
    output: Vec<u8>,
    limits: SandboxLimits,
}

// ─────────────────────────────────────────────────────────────────────────────
// Module
// ─────────────────────────────────────────────────────────────────────────────

/// A compiled wasm module bound to one route.
pub struct WasmModule {
    module: Module,
    runtime: Arc<WasmRuntime>,
}

impl WasmModule {
    /// Compile binary or text wasm. The module must export `handle` and `memory`.
    pub fn compile(route_id: &str, runtime: Arc<WasmRuntime>, bytes: &[u8]) -> Result<Self, GatewayError> {
        let load_err = |msg: String| GatewayError::ModuleLoad(route_id.to_string(), msg);
        let module = Module::new(runtime.engine(), bytes).map_err(|e| load_err(format!("{e:#}")))?;
        for required in ["handle", "memory"] {
            if module.get_export(required).is_none() {
                return Err(load_err(format!("module does not export '{required}'")));
            }
        }
        Ok(Self { module, runtime })
    }

    pub fn load(route_id: &str, runtime: Arc<WasmRuntime>, path: &Path) -> Result<Self, GatewayError> {
        let bytes = std::fs::read(path).map_err(|e| {
            GatewayError::ModuleLoad(route_id.to_string(), format!("{}: {e}", path.display()))
        })?;
        Self::compile(route_id, runtime, &bytes)
    }
}

#[async_trait]
impl ModuleExecutor for WasmModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Wasm
    }

    #[instrument(skip_all, fields(request_id = %input.request_id))]
    async fn execute(
        &self,
        caps: ModuleCapabilities,
        input: ModuleInput,
    ) -> Result<ModuleOutput, ModuleFault> {
        self.runtime.ensure_ticker();

        let engine = self.runtime.engine().clone();
        let module = self.module.clone();
        let limits = self.runtime.limits().clone();
        let runtime = Handle::current();

        let task = tokio::task::spawn_blocking(move || run_instance(&engine, &module, &limits, caps, input, runtime));
        match task.await {
            Ok(result) => result,
            Err(join) if join.is_panic() => Err(ModuleFault::Crashed("wasm worker panicked".into())),
            Err(_) => Err(ModuleFault::Interrupted),
        }
    }
}

fn run_instance(
    engine: &Engine,
    module: &Module,
    limits: &WasmLimits,
    caps: ModuleCapabilities,
    input: ModuleInput,
    runtime: Handle,
) -> Result<ModuleOutput, ModuleFault> {
    let state = HostState {
        input: input.body,
        env: caps.env,
        http: caps.http,
        runtime,
        last_body: Vec::new(),
        status: 200,
        headers: HashMap::new(),
        output: Vec::new(),
        limits: SandboxLimits::new(limits),
    };

    let mut store = Store::new(engine, state);
    store.limiter(|s| &mut s.limits);
    store
        .set_fuel(limits.max_fuel)
        .map_err(|e| ModuleFault::Crashed(e.to_string()))?;
    store.set_epoch_deadline(1);
    store.epoch_deadline_callback(interrupt_on(caps.cancel));

    let outcome = (|| -> wasmtime::Result<i32> {
        let mut linker = Linker::new(engine);
        add_host_functions(&mut linker)?;
        let instance = linker.instantiate(&mut store, module)?;
        let handle = instance.get_typed_func::<(), i32>(&mut store, "handle")?;
        handle.call(&mut store, ())
    })();

    let code = match outcome {
        Ok(code) => code,
        Err(err) if store.data().limits.exceeded => {
            debug!(error = %err, "wasm module hit memory limit");
            return Err(ModuleFault::ResourceExhausted("memory limit exceeded".into()));
        }
        Err(err) if store.data().limits.output_exceeded => {
            debug!(error = %err, "wasm module hit output limit");
            return Err(ModuleFault::ResourceExhausted("output limit exceeded".into()));
        }
        Err(err) => return Err(fault_from(err)),
    };
    if code != 0 {
        return Err(ModuleFault::Trap(format!("handle() returned {code}")));
    }

    let state = store.into_data();
    Ok(ModuleOutput {
        status: state.status,
        headers: state.headers,
        body: state.output,
    })
}

fn interrupt_on(
    cancel: CancellationToken,
) -> impl FnMut(wasmtime::StoreContextMut<'_, HostState>) -> wasmtime::Result<UpdateDeadline> + Send + Sync + 'static {
    move |_store| {
        if cancel.is_cancelled() {
            Err(Trap::Interrupt.into())
        } else {
            Ok(UpdateDeadline::Continue(1))
        }
    }
}

fn fault_from(err: wasmtime::Error) -> ModuleFault {
    match err.downcast_ref::<Trap>() {
        Some(Trap::OutOfFuel) => ModuleFault::ResourceExhausted("fuel exhausted".into()),
        Some(Trap::Interrupt) => ModuleFault::Interrupted,
        Some(trap) => ModuleFault::Trap(trap.to_string()),
        None => ModuleFault::Trap(format!("{err:#}")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host functions
// ─────────────────────────────────────────────────────────────────────────────

fn memory(caller: &mut Caller<'_, HostState>) -> wasmtime::Result<Memory> {
    caller
        .get_export("memory")
        .and_then(|e| e.into_memory())
        .ok_or_else(|| wasmtime::Error::msg("module does not export memory"))
}

fn offset(value: i32) -> wasmtime::Result<usize> {
    usize::try_from(value).map_err(|_| wasmtime::Error::msg(format!("negative offset {value}")))
}

/// Copy `len` bytes at `ptr` out of guest memory. Out-of-bounds ranges are
/// rejected before anything is allocated.
fn read_guest(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> wasmtime::Result<Vec<u8>> {
    let mem = memory(caller)?;
    let start = offset(ptr)?;
    let end = start
        .checked_add(offset(len)?)
        .ok_or_else(|| wasmtime::Error::msg("guest range overflows"))?;
    mem.data(&*caller)
        .get(start..end)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| wasmtime::Error::msg(format!("guest range {start}..{end} out of bounds")))
}

fn read_guest_str(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> wasmtime::Result<String> {
    String::from_utf8(read_guest(caller, ptr, len)?).map_err(|e| wasmtime::Error::msg(e.to_string()))
}

/// Copy as much of `data` as fits in `cap` bytes at `ptr`; returns bytes copied.
fn write_guest(caller: &mut Caller<'_, HostState>, ptr: i32, cap: i32, data: &[u8]) -> wasmtime::Result<i32> {
    let mem = memory(caller)?;
    let n = data.len().min(offset(cap)?);
    mem.write(&mut *caller, offset(ptr)?, &data[..n])?;
    Ok(i32::try_from(n)?)
}

fn add_host_functions(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap(HOST_MODULE, "input_len", |caller: Caller<'_, HostState>| -> wasmtime::Result<i32> {
        Ok(i32::try_from(caller.data().input.len())?)
    })?;

    linker.func_wrap(
        HOST_MODULE,
        "input_read",
        |mut caller: Caller<'_, HostState>, ptr: i32, cap: i32| -> wasmtime::Result<i32> {
            let input = std::mem::take(&mut caller.data_mut().input);
            let copied = write_guest(&mut caller, ptr, cap, &input);
            caller.data_mut().input = input;
            copied
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "env_get",
        |mut caller: Caller<'_, HostState>, kptr: i32, klen: i32, out: i32, cap: i32| -> wasmtime::Result<i32> {
            let key = read_guest_str(&mut caller, kptr, klen)?;
            let Some(value) = caller.data().env.get(&key).map(str::to_owned) else {
                return Ok(-1);
            };
            write_guest(&mut caller, out, cap, value.as_bytes())?;
            Ok(i32::try_from(value.len())?)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "http_send",
        |mut caller: Caller<'_, HostState>,
         mptr: i32,
         mlen: i32,
         uptr: i32,
         ulen: i32,
         bptr: i32,
         blen: i32|
         -> wasmtime::Result<i32> {
            let method = read_guest_str(&mut caller, mptr, mlen)?;
            let url = read_guest_str(&mut caller, uptr, ulen)?;
            let body = read_guest(&mut caller, bptr, blen)?;
            let Some(method) = HttpMethod::from_str_ci(&method) else {
                return Ok(-4);
            };

            let (http, runtime) = {
                let state = caller.data();
                (state.http.clone(), state.runtime.clone())
            };
            let request = OutboundRequest::new(method, url).with_body(body);
            let (code, body) = match runtime.block_on(http.send(request)) {
                Ok(resp) => (i32::from(resp.status), resp.body),
                Err(OutboundError::Denied(_)) => (-1, Vec::new()),
                Err(OutboundError::Cancelled) => (-3, Vec::new()),
                Err(_) => (-2, Vec::new()),
            };
            caller.data_mut().last_body = body;
            Ok(code)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "http_body_read",
        |mut caller: Caller<'_, HostState>, ptr: i32, cap: i32| -> wasmtime::Result<i32> {
            let body = std::mem::take(&mut caller.data_mut().last_body);
            let copied = write_guest(&mut caller, ptr, cap, &body);
            caller.data_mut().last_body = body;
            copied
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "set_status",
        |mut caller: Caller<'_, HostState>, code: i32| -> wasmtime::Result<()> {
            let status = u16::try_from(code)
                .ok()
                .filter(|s| (100..=599).contains(s))
                .ok_or_else(|| wasmtime::Error::msg(format!("invalid status {code}")))?;
            caller.data_mut().status = status;
            Ok(())
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "set_header",
        |mut caller: Caller<'_, HostState>, kptr: i32, klen: i32, vptr: i32, vlen: i32| -> wasmtime::Result<()> {
            caller
                .data_mut()
                .limits
                .charge_output(offset(klen)?.saturating_add(offset(vlen)?))?;
            let key = read_guest_str(&mut caller, kptr, klen)?;
            let value = read_guest_str(&mut caller, vptr, vlen)?;
            caller.data_mut().headers.insert(key.to_lowercase(), value);
            Ok(())
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "output_write",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> wasmtime::Result<i32> {
            caller.data_mut().limits.charge_output(offset(len)?)?;
            let bytes = read_guest(&mut caller, ptr, len)?;
            caller.data_mut().output.extend_from_slice(&bytes);
            Ok(len)
        },
    )?;

    Ok(())
}
