use tokio::sync::broadcast;

/// Process-wide shutdown signal.
///
/// Every long-running task subscribes and exits its loop when the channel
/// fires; the controller stays alive for the lifetime of the process so
/// late subscribers still observe the signal.
#[derive(Clone)]
pub struct ShutdownController {
    tx: broadcast::Sender<()>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Signals all subscribers to stop. Safe to call more than once.
    pub fn begin(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_observe_the_signal() {
        let shutdown = ShutdownController::new();
        let mut rx = shutdown.subscribe();
        shutdown.begin();
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn begin_without_subscribers_is_harmless() {
        let shutdown = ShutdownController::new();
        shutdown.begin();
        shutdown.begin();
    }
}
