use crate::error::Result;
use crate::Sender;
use async_trait::async_trait;
use hostprobe_common::context::Context;
use hostprobe_common::types::Sample;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Samples encoded between two yields and cancellation checks.
const CANCEL_CHECK_EVERY: usize = 256;

/// Appends each sample as one JSON line to a local file.
#[derive(Debug, Clone)]
pub struct FileSender {
    path: PathBuf,
}

impl FileSender {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sender for FileSender {
    async fn send_with_context(&self, ctx: &Context, batch: &[Sample]) -> Result<()> {
        ctx.check()?;

        let mut buf = Vec::with_capacity(batch.len() * 128);
        for (i, sample) in batch.iter().enumerate() {
            if i > 0 && i % CANCEL_CHECK_EVERY == 0 {
                // Let a cancel issued by another task land before checking.
                tokio::task::yield_now().await;
                ctx.check()?;
            }
            serde_json::to_writer(&mut buf, sample)?;
            buf.push(b'\n');
        }
        ctx.check()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;

        tracing::debug!(path = %self.path.display(), count = batch.len(), "Batch written");
        Ok(())
    }

    fn kind(&self) -> &str {
        "log_file"
    }
}
