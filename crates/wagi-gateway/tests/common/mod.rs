#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;
use wagi_gateway::{DispatchRecord, DispatchSink, Gateway, GatewaySettings, server};
use wagi_kernel::gateway::{
    DeploymentVars, DocumentFormat, HttpMethod, HttpTransport, ModuleDocument, ModuleExecutor,
    OutboundError, OutboundRequest, OutboundResponse,
};

/// Requests to this host are accepted and never answered.
pub const STALLED_HOST: &str = "stall.example.com";

/// In-memory stand-in for a blob storage account, keyed by URL path.
#[derive(Default)]
pub struct FakeBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<(HttpMethod, String)>>,
}

impl FakeBlobStore {
    pub fn blob(&self, path: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(path).cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl HttpTransport for FakeBlobStore {
    async fn execute(&self, request: OutboundRequest) -> Result<OutboundResponse, OutboundError> {
        self.requests.lock().push((request.method, request.url.clone()));
        let url = url::Url::parse(&request.url).map_err(|e| OutboundError::Transport(e.to_string()))?;
        if url.host_str() == Some(STALLED_HOST) {
            std::future::pending::<()>().await;
        }
        let key = format!("{}{}", url.host_str().unwrap_or_default(), url.path());
        match request.method {
            HttpMethod::Put => {
                self.blobs.lock().insert(key, request.body);
                Ok(OutboundResponse::new(201))
            }
            HttpMethod::Get => match self.blobs.lock().get(&key) {
                Some(bytes) => Ok(OutboundResponse::new(200)
                    .with_body(bytes.clone())
                    .with_header("content-type", "application/octet-stream")),
                None => Ok(OutboundResponse::new(404)),
            },
            _ => Ok(OutboundResponse::new(405)),
        }
    }
}

/// Collects dispatch records for assertions.
#[derive(Default)]
pub struct CaptureSink {
    records: Mutex<Vec<DispatchRecord>>,
}

impl CaptureSink {
    pub fn records(&self) -> Vec<DispatchRecord> {
        self.records.lock().clone()
    }
}

impl DispatchSink for CaptureSink {
    fn record(&self, record: DispatchRecord) {
        self.records.lock().push(record);
    }
}

pub struct Harness {
    pub app: Router,
    pub gateway: Arc<Gateway>,
    pub store: Arc<FakeBlobStore>,
    pub sink: Arc<CaptureSink>,
}

pub struct HarnessBuilder {
    document: String,
    deployment: DeploymentVars,
    settings: GatewaySettings,
    natives: Vec<(String, Arc<dyn ModuleExecutor>)>,
}

impl HarnessBuilder {
    pub fn new(document: &str) -> Self {
        Self {
            document: document.to_string(),
            deployment: DeploymentVars::empty(),
            settings: GatewaySettings::default(),
            natives: Vec::new(),
        }
    }

    pub fn var(mut self, name: &str, value: &str) -> Self {
        self.deployment = self.deployment.with(name, value);
        self
    }

    pub fn settings(mut self, settings: GatewaySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn native(mut self, name: &str, module: Arc<dyn ModuleExecutor>) -> Self {
        self.natives.push((name.to_string(), module));
        self
    }

    pub fn build(self) -> Harness {
        let document = ModuleDocument::from_str(&self.document, DocumentFormat::Json).expect("document");
        let store = Arc::new(FakeBlobStore::default());
        let sink = Arc::new(CaptureSink::default());
        let mut builder = Gateway::builder(document)
            .deployment(self.deployment)
            .settings(self.settings)
            .transport(store.clone())
            .sink(sink.clone());
        for (name, module) in self.natives {
            builder = builder.native(name, module);
        }
        let gateway = Arc::new(builder.build().expect("gateway"));
        Harness {
            app: server::build_app(gateway.clone()),
            gateway,
            store,
            sink,
        }
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("json body")
    }
}

impl Harness {
    pub async fn send(&self, method: &str, uri: &str, body: impl Into<Body>) -> Reply {
        let response = self
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(body.into())
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("read body");
        Reply {
            status,
            headers,
            body: body.to_vec(),
        }
    }
}
