mod common;

use async_trait::async_trait;
use axum::http::StatusCode;
use common::{HarnessBuilder, STALLED_HOST};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use wagi_gateway::{DispatchOutcome, GatewaySettings};
use wagi_kernel::gateway::{
    GatewayRequest, HttpMethod, ModuleCapabilities, ModuleExecutor, ModuleFault, ModuleInput,
    ModuleKind, ModuleOutput, OutboundError, OutboundRequest,
};

/// Reports its environment keys, then tries the URL in the request body.
struct Inspector;

#[async_trait]
impl ModuleExecutor for Inspector {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Native
    }

    async fn execute(&self, caps: ModuleCapabilities, input: ModuleInput) -> Result<ModuleOutput, ModuleFault> {
        let keys: Vec<&str> = caps.env.keys().collect();
        let target = String::from_utf8_lossy(&input.body).into_owned();
        let outcome = match caps.http.send(OutboundRequest::get(target)).await {
            Ok(resp) => resp.status.to_string(),
            Err(OutboundError::Denied(_)) => "denied".to_string(),
            Err(other) => other.to_string(),
        };
        Ok(ModuleOutput::ok(format!("{}|{}", keys.join(","), outcome)))
    }
}

/// Never finishes on its own.
struct Stall;

#[async_trait]
impl ModuleExecutor for Stall {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Native
    }

    async fn execute(&self, _caps: ModuleCapabilities, _input: ModuleInput) -> Result<ModuleOutput, ModuleFault> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ModuleOutput::new(200))
    }
}

/// Fires its outbound call from a detached task, then waits to be cancelled.
struct Detached {
    cancel: Mutex<Option<CancellationToken>>,
    reply: Mutex<Option<oneshot::Sender<Result<u16, OutboundError>>>>,
}

impl Detached {
    fn new(reply: oneshot::Sender<Result<u16, OutboundError>>) -> Self {
        Self {
            cancel: Mutex::new(None),
            reply: Mutex::new(Some(reply)),
        }
    }
}

#[async_trait]
impl ModuleExecutor for Detached {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Native
    }

    async fn execute(&self, caps: ModuleCapabilities, _input: ModuleInput) -> Result<ModuleOutput, ModuleFault> {
        *self.cancel.lock() = Some(caps.cancel.clone());
        let http = caps.http.clone();
        let reply = self.reply.lock().take();
        tokio::spawn(async move {
            let url = format!("https://{STALLED_HOST}/c/b");
            let result = http.send(OutboundRequest::get(url)).await.map(|resp| resp.status);
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        });
        caps.cancel.cancelled().await;
        Err(ModuleFault::Interrupted)
    }
}

#[tokio::test]
async fn modules_see_only_their_own_environment_and_allowlist() {
    let doc = r#"{
      "Wagi": { "Modules": {
        "A": { "Module": "builtin:inspect", "Route": "/a",
               "Environment": { "ONLY_A": "1" },
               "AllowedHosts": [ "https://a.example.com" ] },
        "B": { "Module": "builtin:inspect", "Route": "/b",
               "Environment": { "ONLY_B": "${SECRET}" },
               "AllowedHosts": [ "https://b.example.com" ] }
      } }
    }"#;
    let h = HarnessBuilder::new(doc)
        .var("SECRET", "s3cr3t")
        .var("UNRELATED", "leak")
        .native("inspect", Arc::new(Inspector))
        .build();

    let a = h.send("POST", "/a", "https://b.example.com/x").await;
    assert_eq!(a.text(), "ONLY_A|denied");

    let b = h.send("POST", "/b", "https://b.example.com/x").await;
    assert_eq!(b.text(), "ONLY_B|404");
    assert_eq!(h.store.request_count(), 1);
}

#[tokio::test]
async fn unresolved_placeholder_disables_only_its_route() {
    let doc = r#"{
      "Wagi": { "Modules": {
        "Echo": { "Module": "builtin:echo", "Route": "/test" },
        "Broken": { "Module": "builtin:blob-write", "Route": "/writeblob",
                    "Environment": { "STORAGE_ACCOUNT": "${NOT_SET_ANYWHERE}" } }
      } }
    }"#;
    let h = HarnessBuilder::new(doc).build();

    assert!(h.gateway.report().is_disabled("Broken"));
    assert_eq!(h.send("POST", "/writeblob?container=c&blob=b", "x").await.status, StatusCode::NOT_FOUND);
    assert_eq!(h.send("POST", "/test", "x").await.status, StatusCode::OK);

    let routes = h.send("GET", "/_wagi/routes", "").await.json();
    assert_eq!(routes["disabled"][0]["route_id"], "Broken");
    assert!(
        routes["disabled"][0]["reason"]
            .as_str()
            .is_some_and(|r| r.contains("NOT_SET_ANYWHERE"))
    );
}

#[tokio::test]
async fn deadline_overrun_is_gateway_timeout() {
    let doc = r#"{ "Wagi": { "Modules": {
        "Slow": { "Module": "builtin:stall", "Route": "/slow", "TimeoutMs": 50 }
    } } }"#;
    let h = HarnessBuilder::new(doc).native("stall", Arc::new(Stall)).build();

    let reply = h.send("GET", "/slow", "").await;
    assert_eq!(reply.status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(reply.json()["error"]["code"], "TIMED_OUT");
    assert_eq!(h.sink.records()[0].outcome, DispatchOutcome::TimedOut);
}

#[tokio::test]
async fn script_modules_run_with_env_and_request() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("greet.rhai"),
        r#"
            let who = request.body;
            #{
                status: 201,
                body: env.GREETING + ", " + who + " (" + request.params.id + ")",
                headers: #{ "x-module": "script" }
            }
        "#,
    )
    .unwrap();
    std::fs::write(dir.path().join("spin.rhai"), "loop { }").unwrap();

    let doc = r#"{ "Wagi": { "Modules": {
        "Greet": { "Module": "greet.rhai", "Route": "/greet/{id}", "Environment": { "GREETING": "hello" } },
        "Spin": { "Module": "spin.rhai", "Route": "/spin" }
    } } }"#;
    let mut settings = GatewaySettings {
        module_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    settings.script.max_operations = 10_000;
    let h = HarnessBuilder::new(doc).settings(settings).build();

    let reply = h.send("POST", "/greet/42", "world").await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.text(), "hello, world (42)");
    assert_eq!(reply.headers["x-module"], "script");

    let spin = h.send("GET", "/spin", "").await;
    assert_eq!(spin.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(spin.json()["error"]["code"], "MODULE_FAULT");
}

#[tokio::test]
async fn wasm_modules_echo_and_trap() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("echo.wat"),
        r#"
        (module
          (import "wagi" "input_len" (func $input_len (result i32)))
          (import "wagi" "input_read" (func $input_read (param i32 i32) (result i32)))
          (import "wagi" "output_write" (func $output_write (param i32 i32) (result i32)))
          (memory (export "memory") 1)
          (func (export "handle") (result i32)
            (local $n i32)
            (local.set $n (call $input_read (i32.const 0) (call $input_len)))
            (drop (call $output_write (i32.const 0) (local.get $n)))
            (i32.const 0)))
        "#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("trap.wat"),
        r#"(module (memory (export "memory") 1) (func (export "handle") (result i32) unreachable))"#,
    )
    .unwrap();

    let doc = r#"{ "Wagi": { "Modules": {
        "Echo": { "Module": "echo.wat", "Route": "/wasm/echo" },
        "Trap": { "Module": "trap.wat", "Route": "/wasm/trap" },
        "Missing": { "Module": "absent.wasm", "Route": "/wasm/missing" }
    } } }"#;
    let settings = GatewaySettings {
        module_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let h = HarnessBuilder::new(doc).settings(settings).build();

    let echo = h.send("POST", "/wasm/echo", "bytes in, bytes out").await;
    assert_eq!(echo.status, StatusCode::OK);
    assert_eq!(echo.text(), "bytes in, bytes out");

    let trap = h.send("GET", "/wasm/trap", "").await;
    assert_eq!(trap.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(h.sink.records()[1].outcome, DispatchOutcome::Faulted);

    assert!(h.gateway.report().is_disabled("Missing"));
    assert_eq!(h.send("GET", "/wasm/missing", "").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_bodies_are_rejected_before_dispatch() {
    let doc = r#"{ "Wagi": { "Modules": { "Echo": { "Module": "builtin:echo", "Route": "/test" } } } }"#;
    let settings = GatewaySettings {
        max_body_bytes: 16,
        ..Default::default()
    };
    let h = HarnessBuilder::new(doc).settings(settings).build();

    let reply = h.send("POST", "/test", "x".repeat(64)).await;
    assert_eq!(reply.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(h.sink.records().is_empty());
}

#[tokio::test]
async fn client_disconnect_cancels_module_and_in_flight_call() {
    let doc = r#"{ "Wagi": { "Modules": {
        "Detached": { "Module": "builtin:detached", "Route": "/detached",
                      "AllowedHosts": [ "https://stall.example.com" ] }
    } } }"#;
    let (tx, rx) = oneshot::channel();
    let module = Arc::new(Detached::new(tx));
    let h = HarnessBuilder::new(doc).native("detached", module.clone()).build();

    let request = GatewayRequest::new("gone", HttpMethod::Get, "/detached");
    let abandoned = tokio::time::timeout(Duration::from_millis(50), h.gateway.dispatch(request)).await;
    assert!(abandoned.is_err());

    let cancel = module.cancel.lock().clone().expect("module ran");
    assert!(cancel.is_cancelled());
    assert_eq!(rx.await.unwrap(), Err(OutboundError::Cancelled));
    assert_eq!(h.store.request_count(), 1);

    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, DispatchOutcome::Cancelled);
    assert_eq!(records[0].calls.len(), 1);
    assert!(records[0].calls[0].permitted);
    assert_eq!(records[0].calls[0].status, None);
}

#[tokio::test]
async fn repeated_requests_get_identical_responses() {
    let doc = r#"{ "Wagi": { "Modules": { "Echo": { "Module": "builtin:echo", "Route": "/test" } } } }"#;
    let h = HarnessBuilder::new(doc).build();

    let first = h.send("POST", "/test", "same input").await;
    for _ in 0..3 {
        let again = h.send("POST", "/test", "same input").await;
        assert_eq!(again.status, first.status);
        assert_eq!(again.body, first.body);
        assert_eq!(again.headers.get("content-type"), first.headers.get("content-type"));
    }

    let direct = |id: &str| GatewayRequest::new(id, HttpMethod::Post, "/test").with_body("same input");
    let a = h.gateway.dispatch(direct("a")).await.unwrap();
    let b = h.gateway.dispatch(direct("b")).await.unwrap();
    assert_eq!((a.status, &a.headers, &a.body), (b.status, &b.headers, &b.body));
    assert_eq!(a.body, first.body);
}
