use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Why the agent asked for its pipeline to be rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// The API pushed a newer configuration that has been persisted.
    RemoteConfig,
    /// The configuration file changed on disk.
    ConfigFileChanged,
}

/// Single-slot restart notification. A request made while another one is
/// still pending is coalesced into it.
#[derive(Debug, Clone)]
pub struct RestartSignal {
    tx: mpsc::Sender<RestartReason>,
}

pub fn restart_channel() -> (RestartSignal, mpsc::Receiver<RestartReason>) {
    let (tx, rx) = mpsc::channel(1);
    (RestartSignal { tx }, rx)
}

impl RestartSignal {
    /// Returns `true` when this call queued a new request.
    pub fn notify(&self, reason: RestartReason) -> bool {
        match self.tx.try_send(reason) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!(?reason, "Restart already pending");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_request_is_coalesced() {
        let (signal, mut rx) = restart_channel();
        assert!(signal.notify(RestartReason::RemoteConfig));
        assert!(!signal.notify(RestartReason::ConfigFileChanged));

        assert_eq!(rx.try_recv().unwrap(), RestartReason::RemoteConfig);
        assert!(rx.try_recv().is_err());

        assert!(signal.notify(RestartReason::ConfigFileChanged));
    }

    #[test]
    fn closed_receiver_is_ignored() {
        let (signal, rx) = restart_channel();
        drop(rx);
        assert!(!signal.notify(RestartReason::RemoteConfig));
    }
}
