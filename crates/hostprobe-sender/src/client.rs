//! HTTP delivery of batches to the metrics API.
//!
//! The client negotiates encryption lazily: it seals payloads whenever a key
//! is configured until the server answers `412 Precondition Failed`, then
//! retries that batch once in the clear and never encrypts again for the
//! lifetime of the instance.

use crate::cipher::PayloadCipher;
use crate::error::{Result, SendError};
use crate::payload::{self, EncodedBody, MachineIdentity};
use crate::restart::{RestartReason, RestartSignal};
use crate::{ConfigSink, Sender};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hostprobe_common::context::Context;
use hostprobe_common::types::Sample;
use reqwest::header::{HeaderMap, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// Response header announcing when the server-side configuration changed.
pub const CONFIG_LAST_UPDATE_HEADER: &str = "x-configuration-last-update";

/// Response header on 429 carrying the recommended back-off in seconds.
pub const RATE_LIMIT_HEADER: &str = "x-rate-limit-seconds";

const MAX_ERROR_BODY_CHARS: usize = 256;

/// Connection settings for [`DeliveryClient`].
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub project_id: String,
    pub token: String,
    /// Raw key material, exactly 32 bytes when present.
    pub encryption_key: Option<String>,
    pub timeout: Duration,
    pub send_interval: Duration,
    /// Configuration version already applied locally.
    pub config_last_update: Option<DateTime<Utc>>,
}

enum Attempt {
    Delivered,
    EncryptionRejected,
}

pub struct DeliveryClient {
    http: reqwest::Client,
    endpoint: String,
    config_endpoint: String,
    token: String,
    identity: MachineIdentity,
    cipher: Option<PayloadCipher>,
    encryption_unavailable: AtomicBool,
    fallback_warned: AtomicBool,
    config_last_update: Mutex<Option<DateTime<Utc>>>,
    send_interval: watch::Sender<Duration>,
    config_sink: Option<Arc<dyn ConfigSink>>,
    restart: Option<RestartSignal>,
}

impl DeliveryClient {
    /// # Errors
    ///
    /// Fails with [`SendError::InvalidKey`] when the key is not 32 bytes, or
    /// with a transport error if the HTTP client cannot be built.
    pub fn new(settings: ApiSettings, identity: MachineIdentity) -> Result<Self> {
        let cipher = settings
            .encryption_key
            .as_deref()
            .map(|key| PayloadCipher::new(key.as_bytes()))
            .transpose()?;

        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("hostprobe-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let base = settings.base_url.trim_end_matches('/');
        let endpoint = format!("{base}/{}", settings.project_id);
        let config_endpoint = format!("{endpoint}/config");
        let (send_interval, _) = watch::channel(settings.send_interval);

        Ok(Self {
            http,
            endpoint,
            config_endpoint,
            token: settings.token,
            identity,
            cipher,
            encryption_unavailable: AtomicBool::new(false),
            fallback_warned: AtomicBool::new(false),
            config_last_update: Mutex::new(settings.config_last_update),
            send_interval,
            config_sink: None,
            restart: None,
        })
    }

    pub fn with_config_sink(mut self, sink: Arc<dyn ConfigSink>) -> Self {
        self.config_sink = Some(sink);
        self
    }

    pub fn with_restart_signal(mut self, signal: RestartSignal) -> Self {
        self.restart = Some(signal);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether the next send will be sealed.
    pub fn encryption_enabled(&self) -> bool {
        self.cipher.is_some() && !self.encryption_unavailable.load(Ordering::Acquire)
    }

    /// Send interval, updated when the API pushes a new configuration.
    pub fn send_interval(&self) -> watch::Receiver<Duration> {
        self.send_interval.subscribe()
    }

    pub fn config_last_update(&self) -> Option<DateTime<Utc>> {
        *self
            .config_last_update
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn deliver(&self, ctx: &Context, batch: &[Sample]) -> Result<()> {
        ctx.check()?;

        match self.attempt(ctx, batch, self.encryption_enabled()).await? {
            Attempt::Delivered => Ok(()),
            Attempt::EncryptionRejected => {
                // Must be set before the retry: the retry then cannot be
                // sealed and cannot come back here.
                self.disable_encryption();
                match self.attempt(ctx, batch, false).await? {
                    Attempt::Delivered => Ok(()),
                    Attempt::EncryptionRejected => Err(SendError::PreconditionFailed),
                }
            }
        }
    }

    fn disable_encryption(&self) {
        if self
            .fallback_warned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::warn!(
                endpoint = %self.endpoint,
                "Server cannot accept encrypted payloads (HTTP 412), falling back to unencrypted delivery"
            );
        }
        self.encryption_unavailable.store(true, Ordering::Release);
    }

    async fn attempt(&self, ctx: &Context, batch: &[Sample], encrypt: bool) -> Result<Attempt> {
        let cipher = if encrypt { self.cipher.as_ref() } else { None };
        let EncodedBody {
            bytes,
            encrypted,
            compressed,
        } = payload::encode(&self.identity, batch, cipher)?;
        let size = bytes.len();

        let mut request = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/json");
        if compressed {
            request = request.header(CONTENT_ENCODING, "gzip");
        }

        let response = within(ctx, async { Ok(request.body(bytes).send().await?) }).await?;
        let status = response.status();

        if status.is_success() {
            tracing::debug!(
                count = batch.len(),
                size,
                encrypted,
                compressed,
                "Batch delivered"
            );
            let pushed = config_update_from(response.headers());
            self.apply_config_update(ctx, pushed).await;
            return Ok(Attempt::Delivered);
        }

        match status {
            StatusCode::PRECONDITION_FAILED if encrypted => Ok(Attempt::EncryptionRejected),
            StatusCode::PRECONDITION_FAILED => Err(SendError::PreconditionFailed),
            StatusCode::UNAUTHORIZED => {
                tracing::error!(endpoint = %self.endpoint, "API token rejected");
                Err(SendError::Unauthorized)
            }
            StatusCode::NOT_FOUND => {
                tracing::error!(endpoint = %self.endpoint, "Project or server id not found");
                Err(SendError::ServerNotFound)
            }
            StatusCode::PAYLOAD_TOO_LARGE => {
                tracing::warn!(count = batch.len(), size, "Batch exceeds the plan's payload limit");
                Err(SendError::PayloadTooLarge)
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_secs = response
                    .headers()
                    .get(RATE_LIMIT_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok());
                match retry_after_secs {
                    Some(secs) => tracing::warn!(
                        retry_after_secs = secs,
                        "Rate limited, recommended send interval is {secs} seconds"
                    ),
                    None => tracing::warn!("Rate limited"),
                }
                Err(SendError::RateLimited { retry_after_secs })
            }
            StatusCode::SERVICE_UNAVAILABLE => {
                tracing::warn!("API under maintenance");
                Err(SendError::Maintenance)
            }
            other => {
                let text = within(ctx, async { Ok(response.text().await?) })
                    .await
                    .unwrap_or_default();
                Err(SendError::UnexpectedStatus {
                    status: other.as_u16(),
                    body: truncate(&text, MAX_ERROR_BODY_CHARS),
                })
            }
        }
    }

    /// Fetches and applies the remote configuration when `pushed` is newer
    /// than the version applied locally. Failures are logged, never returned.
    async fn apply_config_update(&self, ctx: &Context, pushed: Option<DateTime<Utc>>) {
        let Some(pushed) = pushed else {
            return;
        };
        if self.config_last_update().is_some_and(|current| pushed <= current) {
            return;
        }

        tracing::info!(updated_at = %pushed, "Remote configuration changed, fetching");
        let document = match self.fetch_config(ctx).await {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch remote configuration");
                return;
            }
        };

        if let Some(sink) = &self.config_sink {
            if let Err(e) = sink.persist(&document, pushed) {
                tracing::warn!(error = %e, "Failed to persist remote configuration");
                return;
            }
        }

        *self
            .config_last_update
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(pushed);

        if let Some(interval) = pushed_send_interval(&document) {
            self.send_interval.send_if_modified(|current| {
                if *current == interval {
                    false
                } else {
                    *current = interval;
                    true
                }
            });
        }

        if self.config_sink.is_some() {
            if let Some(restart) = &self.restart {
                restart.notify(RestartReason::RemoteConfig);
            }
        }
    }

    async fn fetch_config(&self, ctx: &Context) -> Result<Vec<u8>> {
        let request = self.http.get(&self.config_endpoint).bearer_auth(&self.token);
        within(ctx, async {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(SendError::UnexpectedStatus {
                    status: status.as_u16(),
                    body: truncate(&text, MAX_ERROR_BODY_CHARS),
                });
            }
            Ok(response.bytes().await?.to_vec())
        })
        .await
    }
}

#[async_trait]
impl Sender for DeliveryClient {
    async fn send_with_context(&self, ctx: &Context, batch: &[Sample]) -> Result<()> {
        self.deliver(ctx, batch).await
    }

    fn kind(&self) -> &str {
        "api"
    }
}

/// Runs `fut` unless `ctx` finishes first.
async fn within<T>(ctx: &Context, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        reason = ctx.done() => Err(reason.into()),
        res = fut => res,
    }
}

fn config_update_from(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    let raw = headers.get(CONFIG_LAST_UPDATE_HEADER)?.to_str().ok()?;
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            tracing::warn!(value = raw, error = %e, "Ignoring malformed configuration timestamp");
            None
        }
    }
}

fn pushed_send_interval(document: &[u8]) -> Option<Duration> {
    let value: serde_json::Value = serde_json::from_slice(document).ok()?;
    value
        .get("send_interval_secs")?
        .as_u64()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

/// Truncates to at most `max` bytes on a char boundary.
fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
