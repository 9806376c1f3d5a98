//! Timer-driven batching between the collectors and a [`Sender`].
//!
//! Samples are appended to one pending batch as they arrive. Every send
//! interval the whole batch is handed to the sender; it is cleared only when
//! the sender reports success, so a failed flush is retried on the next tick
//! together with whatever arrived in between. On shutdown one last flush is
//! attempted under its own deadline and the batch is then dropped.

use crate::error::{Result, SendError};
use crate::Sender;
use hostprobe_common::context::Context;
use hostprobe_common::types::Sample;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

pub struct Batcher {
    sender: Arc<dyn Sender>,
    pending: Vec<Sample>,
    send_interval: Duration,
    interval_updates: Option<watch::Receiver<Duration>>,
    final_flush_timeout: Duration,
}

fn ticker(every: Duration) -> Interval {
    let mut tick = interval_at(Instant::now() + every, every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick
}

impl Batcher {
    pub fn new(sender: Arc<dyn Sender>, send_interval: Duration) -> Self {
        Self {
            sender,
            pending: Vec::new(),
            send_interval,
            interval_updates: None,
            final_flush_timeout: Duration::from_secs(5),
        }
    }

    /// Follow interval changes published by the sender (remote config push).
    pub fn with_interval_updates(mut self, updates: watch::Receiver<Duration>) -> Self {
        self.interval_updates = Some(updates);
        self
    }

    pub fn with_final_flush_timeout(mut self, timeout: Duration) -> Self {
        self.final_flush_timeout = timeout;
        self
    }

    pub fn pending(&self) -> &[Sample] {
        &self.pending
    }

    pub fn accumulate(&mut self, samples: Vec<Sample>) {
        self.pending.extend(samples);
    }

    /// Sends the pending batch. An empty batch is a no-op. On failure the
    /// batch is kept for the next flush.
    ///
    /// # Errors
    ///
    /// Returns the sender's error unchanged.
    pub async fn flush(&mut self, ctx: &Context) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.sender.send_with_context(ctx, &self.pending).await?;
        tracing::debug!(sender = self.sender.kind(), count = self.pending.len(), "Batch flushed");
        self.pending.clear();
        Ok(())
    }

    /// Consumes samples from `rx` until `ctx` is done or every producer is
    /// gone, flushing on each tick.
    ///
    /// # Errors
    ///
    /// Returns only fatal send errors ([`SendError::is_fatal`]); everything
    /// else is logged and retried on the next tick.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Vec<Sample>>, ctx: Context) -> Result<()> {
        let mut tick = ticker(self.send_interval);
        tracing::info!(
            sender = self.sender.kind(),
            interval_secs = self.send_interval.as_secs(),
            "Batch loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = ctx.done() => break,
                received = rx.recv() => match received {
                    Some(samples) => self.accumulate(samples),
                    None => break,
                },
                _ = tick.tick() => {
                    let flush_ctx = ctx.with_timeout(self.send_interval);
                    if let Err(e) = self.flush(&flush_ctx).await {
                        if e.is_fatal() {
                            tracing::error!(error = %e, "Fatal delivery error, stopping batch loop");
                            return Err(e);
                        }
                        self.log_retained(&e);
                    }
                }
                Some(every) = next_interval(&mut self.interval_updates) => {
                    if every != self.send_interval {
                        tracing::info!(interval_secs = every.as_secs(), "Send interval updated");
                        self.send_interval = every;
                        tick = ticker(every);
                    }
                }
            }
        }

        while let Ok(samples) = rx.try_recv() {
            self.accumulate(samples);
        }
        self.shutdown_flush().await
    }

    async fn shutdown_flush(&mut self) -> Result<()> {
        let count = self.pending.len();
        let ctx = Context::background().with_timeout(self.final_flush_timeout);
        let result = self.flush(&ctx).await;
        match &result {
            Ok(()) => tracing::info!(count, "Final flush complete"),
            Err(e) => tracing::warn!(error = %e, dropped = count, "Final flush failed, dropping batch"),
        }
        self.pending.clear();
        match result {
            Err(e) if e.is_fatal() => Err(e),
            _ => Ok(()),
        }
    }

    fn log_retained(&self, e: &SendError) {
        tracing::warn!(
            sender = self.sender.kind(),
            error = %e,
            retained = self.pending.len(),
            "Flush failed, keeping batch for the next tick"
        );
    }
}

/// Next value from the interval watch, or never when there is none.
async fn next_interval(updates: &mut Option<watch::Receiver<Duration>>) -> Option<Duration> {
    let Some(rx) = updates else {
        return std::future::pending().await;
    };
    if rx.changed().await.is_ok() {
        return Some(*rx.borrow_and_update());
    }
    // Publisher dropped: stop polling it.
    *updates = None;
    None
}
