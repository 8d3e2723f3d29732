//! Coalescing wake signal
//!
//! A capacity-1 channel: any number of `wake()` calls made before the loop
//! observes the signal collapse into a single pending wake.

use tokio::sync::mpsc;

/// Sending half, cheap to clone and hand to other components
#[derive(Clone, Debug)]
pub struct Waker {
    tx: mpsc::Sender<()>,
}

/// Receiving half owned by one loop
#[derive(Debug)]
pub struct WakeReceiver {
    rx: mpsc::Receiver<()>,
}

pub fn wake_channel() -> (Waker, WakeReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (Waker { tx }, WakeReceiver { rx })
}

impl Waker {
    /// Request a run. Never blocks; a wake already pending absorbs this one.
    pub fn wake(&self) {
        let _ = self.tx.try_send(());
    }
}

impl WakeReceiver {
    /// Clear a pending wake without waiting
    pub fn reset(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }

    /// Wait for the next wake. Pends forever once every `Waker` is gone, so
    /// callers select it against a timer and the stop signal.
    pub async fn wait(&mut self) {
        if self.rx.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_repeated_wakes_coalesce() {
        let (waker, mut rx) = wake_channel();
        waker.wake();
        waker.wake();
        waker.clone().wake();

        tokio::time::timeout(Duration::from_millis(100), rx.wait())
            .await
            .expect("first wake delivered");
        assert!(
            tokio::time::timeout(Duration::from_millis(50), rx.wait())
                .await
                .is_err(),
            "extra wakes must collapse into one"
        );
    }

    #[tokio::test]
    async fn test_reset_discards_pending() {
        let (waker, mut rx) = wake_channel();
        waker.wake();
        rx.reset();
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.wait())
            .await
            .is_err());
    }
}
