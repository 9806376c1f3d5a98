use crate::Collector;
use hostprobe_common::context::Context;
use hostprobe_common::types::Sample;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Spawns the polling loop for one collector.
///
/// Non-empty results are forwarded into `tx`. When the channel stays full
/// for a whole interval the tick's samples are dropped, so a stalled sender
/// slows collection down instead of growing memory. The task exits when
/// `ctx` is done or the receiving side is gone.
pub fn spawn_collector(
    collector: Box<dyn Collector>,
    every: Duration,
    tx: mpsc::Sender<Vec<Sample>>,
    ctx: Context,
) -> JoinHandle<()> {
    tokio::spawn(run_collector(collector, every, tx, ctx))
}

pub async fn run_collector(
    mut collector: Box<dyn Collector>,
    every: Duration,
    tx: mpsc::Sender<Vec<Sample>>,
    ctx: Context,
) {
    let name = collector.name().to_string();
    tracing::info!(collector = %name, interval_secs = every.as_secs(), "Collector started");

    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ctx.done() => break,
            _ = tick.tick() => {}
        }

        let samples = match collector.collect() {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!(collector = %name, error = %e, "Collection failed");
                continue;
            }
        };
        if samples.is_empty() {
            continue;
        }

        let count = samples.len();
        tokio::select! {
            _ = ctx.done() => {
                tracing::debug!(collector = %name, dropped = count, "Shutdown while forwarding samples");
                break;
            }
            res = tx.send_timeout(samples, every) => match res {
                Ok(()) => tracing::debug!(collector = %name, count, "Samples queued"),
                Err(SendTimeoutError::Timeout(_)) => {
                    tracing::warn!(collector = %name, dropped = count, "Inbound channel full, dropping samples");
                }
                Err(SendTimeoutError::Closed(_)) => break,
            }
        }
    }

    tracing::info!(collector = %name, "Collector stopped");
}
