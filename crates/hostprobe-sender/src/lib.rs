//! Buffering and delivery of collected samples.
//!
//! The [`batcher::Batcher`] accumulates samples from the collectors and
//! flushes them on a timer through a [`Sender`]. Two senders are provided:
//! [`client::DeliveryClient`] posts batches to the remote API (with optional
//! AES-256-GCM sealing and gzip compression), and [`file::FileSender`]
//! appends them to a local JSON Lines file.

pub mod batcher;
pub mod cipher;
pub mod client;
pub mod codec;
pub mod error;
pub mod file;
pub mod payload;
pub mod restart;

use async_trait::async_trait;
use hostprobe_common::context::Context;
use hostprobe_common::types::Sample;

pub use error::{Result, SendError};

/// Delivers a batch of samples somewhere.
///
/// Implementations never mutate the batch, so calling them again with the
/// same slice after a failure is always valid.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Sends without a deadline.
    ///
    /// # Errors
    ///
    /// See [`Sender::send_with_context`].
    async fn send(&self, batch: &[Sample]) -> Result<()> {
        self.send_with_context(&Context::background(), batch).await
    }

    /// Sends the batch, giving up with [`SendError::Context`] as soon as
    /// `ctx` is cancelled or its deadline passes.
    ///
    /// # Errors
    ///
    /// Returns the first unrecoverable failure of the attempt.
    async fn send_with_context(&self, ctx: &Context, batch: &[Sample]) -> Result<()>;

    /// Short name used in logs (`"api"`, `"log_file"`).
    fn kind(&self) -> &str;
}

/// Persists a configuration document pushed by the API.
pub trait ConfigSink: Send + Sync {
    /// `document` is the raw JSON body returned by the config endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is invalid or cannot be written.
    fn persist(&self, document: &[u8], updated_at: chrono::DateTime<chrono::Utc>)
        -> anyhow::Result<()>;
}
