//! Cooperative cancellation for store and engine operations
//!
//! A [`CancelSource`] is held by whoever may give up on an operation; the
//! operation receives a cloned [`CancelSignal`] and checks it at I/O
//! boundaries.

use tokio::sync::watch;

/// Owner side: flips every derived signal to cancelled
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: Some(self.tx.subscribe()),
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver side passed into operations
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Wrap an existing shutdown channel
    pub fn from_receiver(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested; pends forever otherwise
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_never_is_not_cancelled() {
        assert!(!CancelSignal::never().is_cancelled());
    }

    #[test]
    fn test_cancel_reaches_every_signal() {
        let source = CancelSource::new();
        let a = source.signal();
        let b = a.clone();
        source.cancel();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_wakes() {
        let source = CancelSource::new();
        let signal = source.signal();
        let waiter = tokio::spawn(async move { signal.cancelled().await });
        source.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("signal should fire")
            .unwrap();
    }

    #[tokio::test]
    async fn test_never_pends() {
        let signal = CancelSignal::never();
        let res = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_dropped_source_does_not_fire() {
        let signal = CancelSource::new().signal();
        let res = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(res.is_err());
    }
}
