#![allow(dead_code)]

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use hostprobe_common::types::{MetricName, Sample};
use hostprobe_sender::cipher::PayloadCipher;
use hostprobe_sender::client::{ApiSettings, DeliveryClient};
use hostprobe_sender::codec::gunzip;
use hostprobe_sender::payload::MachineIdentity;
use hostprobe_sender::ConfigSink;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_KEY: &str = "0123456789abcdef0123456789abcdef";
pub const TEST_TOKEN: &str = "test-token";
pub const TEST_PROJECT: &str = "acme";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub project: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn is_gzip(&self) -> bool {
        self.headers
            .get("content-encoding")
            .is_some_and(|v| v == "gzip")
    }

    /// Body as JSON, undoing gzip when the header says so.
    pub fn json(&self) -> Value {
        let raw = if self.is_gzip() {
            gunzip(&self.body).expect("gzip body should decompress")
        } else {
            self.body.clone()
        };
        serde_json::from_slice(&raw).expect("body should be JSON")
    }

    /// Inner payload, unsealing the envelope when encrypted.
    pub fn payload(&self) -> Value {
        let outer = self.json();
        if outer["encrypted"] == true {
            let cipher = PayloadCipher::new(TEST_KEY.as_bytes()).expect("test key is valid");
            let data = outer["data"].as_str().expect("envelope should carry data");
            let inner = cipher.open(data).expect("envelope should decrypt");
            serde_json::from_slice(&inner).expect("inner payload should be JSON")
        } else {
            outer
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
    pub delay: Option<Duration>,
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
            delay: None,
        }
    }

    /// Hold the response back for `delay` before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in self.headers {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_str(&value).expect("header value should be valid"),
            );
        }
        let status = StatusCode::from_u16(self.status).expect("status should be valid");
        (status, headers, self.body).into_response()
    }
}

/// In-process stand-in for the metrics API.
#[derive(Clone, Default)]
pub struct MockApi {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    replies: Arc<Mutex<VecDeque<Reply>>>,
    config_replies: Arc<Mutex<VecDeque<Reply>>>,
    config_hits: Arc<Mutex<usize>>,
    reject_encrypted: Arc<Mutex<bool>>,
}

impl MockApi {
    pub fn reply(&self, reply: Reply) -> &Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn config_reply(&self, reply: Reply) -> &Self {
        self.config_replies.lock().unwrap().push_back(reply);
        self
    }

    /// Answer 412 to every sealed payload, like a server without a key.
    pub fn reject_encrypted(&self) -> &Self {
        *self.reject_encrypted.lock().unwrap() = true;
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn config_hits(&self) -> usize {
        *self.config_hits.lock().unwrap()
    }
}

async fn ingest(
    State(api): State<MockApi>,
    Path(project): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = RecordedRequest {
        project,
        headers,
        body: body.to_vec(),
    };
    let sealed = request.json()["encrypted"] == true;
    api.requests.lock().unwrap().push(request);
    if sealed && *api.reject_encrypted.lock().unwrap() {
        return Reply::status(412).into_response();
    }
    let reply = api.replies.lock().unwrap().pop_front();
    let reply = reply.unwrap_or_else(|| Reply::status(200));
    if let Some(delay) = reply.delay {
        tokio::time::sleep(delay).await;
    }
    reply.into_response()
}

async fn config(State(api): State<MockApi>, Path(_project): Path<String>) -> Response {
    *api.config_hits.lock().unwrap() += 1;
    let reply = api.config_replies.lock().unwrap().pop_front();
    reply
        .unwrap_or_else(|| Reply::status(404))
        .into_response()
}

/// Starts the mock API on an ephemeral port and returns its base URL.
pub async fn spawn_mock_api() -> Result<(MockApi, String)> {
    let api = MockApi::default();
    let app = Router::new()
        .route("/ingest/:project", post(ingest))
        .route("/ingest/:project/config", get(config))
        .with_state(api.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((api, format!("http://{addr}/ingest")))
}

pub fn settings(base_url: &str, encryption_key: Option<&str>) -> ApiSettings {
    ApiSettings {
        base_url: base_url.to_string(),
        project_id: TEST_PROJECT.to_string(),
        token: TEST_TOKEN.to_string(),
        encryption_key: encryption_key.map(str::to_string),
        timeout: Duration::from_secs(5),
        send_interval: Duration::from_secs(60),
        config_last_update: None,
    }
}

pub fn identity() -> MachineIdentity {
    MachineIdentity {
        machine_name: "web-01".to_string(),
        boot_time: Some(1_700_000_000),
    }
}

pub fn client(base_url: &str, encryption_key: Option<&str>) -> DeliveryClient {
    DeliveryClient::new(settings(base_url, encryption_key), identity())
        .expect("client should build")
}

pub fn samples(n: usize) -> Vec<Sample> {
    (0..n)
        .map(|i| {
            Sample::system(MetricName::Disk, serde_json::json!({ "used": i, "total": 1000 }))
                .with_metadata("mount", format!("/mnt/volume{i}"))
        })
        .collect()
}

/// Config sink that keeps what it was given.
#[derive(Default)]
pub struct RecordingSink {
    pub persisted: Mutex<Vec<(Value, DateTime<Utc>)>>,
}

impl ConfigSink for RecordingSink {
    fn persist(&self, document: &[u8], updated_at: DateTime<Utc>) -> anyhow::Result<()> {
        let value: Value = serde_json::from_slice(document)?;
        self.persisted.lock().unwrap().push((value, updated_at));
        Ok(())
    }
}
