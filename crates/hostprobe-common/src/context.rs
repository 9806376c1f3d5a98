//! Cancellation and deadline propagation for probe tasks.
//!
//! A [`Context`] is handed to every long-running task and to every send
//! attempt. It resolves [`Context::done`] when its root is cancelled through
//! the matching [`CancelHandle`] or when its deadline passes, whichever comes
//! first. Child contexts inherit the parent's cancellation and may only
//! shorten its deadline.

use std::future::pending;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a context stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context cancelled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Owner side of a cancellable context. Dropping it without calling
/// [`CancelHandle::cancel`] leaves the context running.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A new root context together with the handle that cancels it.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                cancel: Some(rx),
                deadline: None,
            },
            CancelHandle { tx },
        )
    }

    /// Child context that additionally expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            cancel: self.cancel.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check; `None` while the context is still live.
    pub fn err(&self) -> Option<ContextError> {
        if let Some(rx) = &self.cancel {
            if *rx.borrow() {
                return Some(ContextError::Cancelled);
            }
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn check(&self) -> Result<(), ContextError> {
        match self.err() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        let cancelled = async {
            match &self.cancel {
                Some(rx) => {
                    let mut rx = rx.clone();
                    loop {
                        if *rx.borrow_and_update() {
                            return;
                        }
                        // Handle dropped without cancelling: never fires.
                        if rx.changed().await.is_err() {
                            pending::<()>().await;
                        }
                    }
                }
                None => pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => ContextError::Cancelled,
            _ = expired => ContextError::DeadlineExceeded,
        }
    }
}
