use hostprobe_common::context::ContextError;

/// Errors returned by a [`crate::Sender`].
///
/// Variants map onto the delivery failure classes: transport and context
/// failures are transient, policy responses (413/429/503) wait for the next
/// scheduled send, and [`SendError::is_fatal`] marks misconfiguration that no
/// retry can fix.
///
/// # Examples
///
/// ```rust
/// use hostprobe_sender::error::SendError;
///
/// let err = SendError::RateLimited { retry_after_secs: Some(60) };
/// assert!(err.to_string().contains("60 seconds"));
/// assert!(!err.is_fatal());
/// assert!(SendError::ServerNotFound.is_fatal());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// 401: the API token was rejected.
    #[error("unauthorized: the API token was rejected (HTTP 401)")]
    Unauthorized,

    /// 404: unknown project or server id.
    #[error("server not found: check the project id and server id (HTTP 404)")]
    ServerNotFound,

    /// The configured encryption key is not exactly 32 bytes.
    #[error("invalid encryption key: expected 32 bytes, got {0}")]
    InvalidKey(usize),

    /// 412 on a request that was already unencrypted.
    #[error("server rejected the payload with 412 Precondition Failed")]
    PreconditionFailed,

    /// 413: the batch exceeds what the plan accepts.
    #[error("payload too large for the current plan (HTTP 413)")]
    PayloadTooLarge,

    /// 429: rate limited; the server may say how long to back off.
    #[error("{}", rate_limited_message(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// 503: the API is in maintenance.
    #[error("service unavailable, API under maintenance (HTTP 503)")]
    Maintenance,

    /// Any other non-2xx status.
    #[error("unexpected response status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// DNS, connect, TLS or body-read failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller cancelled or the deadline passed.
    #[error("send aborted: {0}")]
    Context(#[from] ContextError),
}

fn rate_limited_message(retry_after_secs: &Option<u64>) -> String {
    match retry_after_secs {
        Some(secs) => format!("rate limited (HTTP 429): retry in {secs} seconds"),
        None => "rate limited (HTTP 429)".to_string(),
    }
}

impl SendError {
    /// Errors that indicate misconfiguration; the process should stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SendError::Unauthorized | SendError::ServerNotFound | SendError::InvalidKey(_)
        )
    }
}

/// Convenience `Result` alias for send operations.
pub type Result<T> = std::result::Result<T, SendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(SendError::Unauthorized.is_fatal());
        assert!(SendError::ServerNotFound.is_fatal());
        assert!(SendError::InvalidKey(16).is_fatal());
        assert!(!SendError::PayloadTooLarge.is_fatal());
        assert!(!SendError::Maintenance.is_fatal());
        assert!(!SendError::Context(ContextError::Cancelled).is_fatal());
    }

    #[test]
    fn rate_limit_message_without_hint() {
        let err = SendError::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(err.to_string(), "rate limited (HTTP 429)");
    }

    #[test]
    fn unexpected_status_embeds_code() {
        let err = SendError::UnexpectedStatus {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert!(err.to_string().contains("502"));
    }
}
