#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use std::io::Write;
use std::sync::Arc;
use telemon_common::security::{sign_base64, REAL_IP_HEADER, SIGNATURE_HEADER};
use telemon_server::app;
use telemon_server::state::AppState;
use telemon_storage::{FileDumpStore, MemoryStore, RelationalStore};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

impl TestContext {
    pub fn new(state: AppState) -> Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let app = app::build_http_app(state.clone());
        Ok(Self {
            temp_dir,
            state,
            app,
        })
    }
}

pub fn memory_context() -> Result<TestContext> {
    TestContext::new(AppState::new(Arc::new(MemoryStore::new())))
}

/// File-backed context; the dump lives inside the context's temp dir.
pub fn file_context(sync_dump: bool) -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let store = Arc::new(FileDumpStore::new(temp_dir.path().join("metrics.dump")));
    let state = AppState::with_dump(store, sync_dump);
    let app = app::build_http_app(state.clone());
    Ok(TestContext {
        temp_dir,
        state,
        app,
    })
}

pub async fn relational_context() -> Result<TestContext> {
    let store = RelationalStore::connect("sqlite::memory:", CancellationToken::new()).await?;
    TestContext::new(AppState::new(Arc::new(store)))
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.headers.get("x-trace-id").and_then(|h| h.to_str().ok())
    }
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("gzip write should succeed");
    encoder.finish().expect("gzip finish should succeed")
}

/// Options for an outgoing request, mirroring what the agent sends.
#[derive(Default)]
pub struct RequestOpts<'a> {
    pub gzip: bool,
    pub key: Option<&'a [u8]>,
    pub real_ip: Option<&'a str>,
    pub accept_gzip: bool,
}

pub async fn request(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Vec<u8>>,
    opts: RequestOpts<'_>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(raw) => {
            builder = builder.header("Content-Type", "application/json");
            if opts.gzip {
                builder = builder.header("Content-Encoding", "gzip");
                gzip(&raw)
            } else {
                raw
            }
        }
        None => Vec::new(),
    };
    if let Some(key) = opts.key {
        let signature = sign_base64(&body, key).expect("signing should succeed");
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    if let Some(ip) = opts.real_ip {
        builder = builder.header(REAL_IP_HEADER, ip);
    }
    if opts.accept_gzip {
        builder = builder.header("Accept-Encoding", "gzip");
    }

    let req = builder
        .body(Body::from(body))
        .expect("request should build");
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read")
        .to_vec();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn post_json(app: &axum::Router, uri: &str, body: Value) -> TestResponse {
    request(
        app,
        "POST",
        uri,
        Some(body.to_string().into_bytes()),
        RequestOpts::default(),
    )
    .await
}

pub async fn post_empty(app: &axum::Router, uri: &str) -> TestResponse {
    request(app, "POST", uri, None, RequestOpts::default()).await
}

pub async fn get(app: &axum::Router, uri: &str) -> TestResponse {
    request(app, "GET", uri, None, RequestOpts::default()).await
}
