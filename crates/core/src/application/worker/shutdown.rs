// Worker Shutdown Token

use tokio::sync::watch;

/// Stop level requested for a worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StopSignal {
    Run,
    /// Finish the in-flight chunk, then exit
    Drain,
    /// Stop scanning between IDs and give the chunk back
    Abandon,
}

/// Shutdown signal for graceful termination
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<StopSignal>,
}

impl ShutdownToken {
    /// Check if shutdown was requested (drain or abandon)
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow() != StopSignal::Run
    }

    /// Check if the in-flight chunk must be abandoned
    pub fn should_abandon(&self) -> bool {
        *self.rx.borrow() == StopSignal::Abandon
    }

    /// Wait for any shutdown signal
    ///
    /// Returns immediately if one was already sent. Once the sender is gone
    /// no signal can arrive, so this never completes.
    pub async fn wait(&mut self) {
        if self.rx.wait_for(|s| *s != StopSignal::Run).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Wait for the abandon signal
    ///
    /// Never completes once the sender is gone without having abandoned.
    pub async fn wait_abandon(&mut self) {
        if self.rx.wait_for(|s| *s == StopSignal::Abandon).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Shutdown sender
pub struct ShutdownSender {
    tx: watch::Sender<StopSignal>,
}

impl ShutdownSender {
    /// Ask workers to finish their current chunk and stop
    pub fn shutdown(&self) {
        self.escalate(StopSignal::Drain);
    }

    /// Ask workers to drop their current chunk and stop
    pub fn abandon(&self) {
        self.escalate(StopSignal::Abandon);
    }

    /// Stop levels only go up
    fn escalate(&self, level: StopSignal) {
        self.tx.send_if_modified(|current| {
            if level > *current {
                *current = level;
                true
            } else {
                false
            }
        });
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(StopSignal::Run);
    (ShutdownSender { tx }, ShutdownToken { rx })
}
