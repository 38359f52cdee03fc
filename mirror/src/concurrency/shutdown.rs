//! Broadcast shutdown signal shared by all workers of a pipeline.
//!
//! The signal is level triggered: once requested it stays requested, so receivers created or
//! polled after the request still observe it.

use tokio::sync::watch;

/// Transmitter side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Requests shutdown of every worker holding a receiver.
    ///
    /// The request is recorded even when it fails. An error only means that no receiver was
    /// alive at the time of the request.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<bool>> {
        self.0.send_replace(true);

        if self.0.receiver_count() == 0 {
            return Err(watch::error::SendError(true));
        }

        Ok(())
    }

    /// Creates a new receiver.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiver side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Completes once shutdown was requested, or once every transmitter was dropped.
    pub async fn requested(&mut self) {
        let _ = self.0.wait_for(|requested| *requested).await;
    }

    /// Returns whether shutdown was requested.
    pub fn is_requested(&self) -> bool {
        *self.0.borrow()
    }
}

/// Creates a new shutdown channel.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn late_receivers_observe_an_earlier_request() {
        let (tx, rx) = create_shutdown_channel();
        assert!(!rx.is_requested());

        tx.shutdown().unwrap();

        let mut late = tx.subscribe();
        assert!(late.is_requested());
        late.requested().await;
    }

    #[tokio::test]
    async fn request_without_receivers_is_still_recorded() {
        let (tx, rx) = create_shutdown_channel();
        drop(rx);

        assert!(tx.shutdown().is_err());
        assert!(tx.subscribe().is_requested());
    }
}
