//! External abort signalling.

use tokio::sync::watch;

/// Raises the abort flag for every [`AbortSignal`] cloned from its pair.
#[derive(Debug)]
pub struct AbortController {
    tx: watch::Sender<bool>,
}

/// Cloneable receiving side of an abort flag.
#[derive(Clone, Debug)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

pub fn abort_pair() -> (AbortController, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortController { tx }, AbortSignal { rx })
}

impl AbortController {
    pub fn abort(&self) {
        // Fails only when every signal is gone, in which case nobody listens.
        let _ = self.tx.send(true);
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once abort is requested. Pends forever if the controller is
    /// dropped without aborting.
    pub async fn aborted(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_fires_after_abort() {
        let (controller, mut signal) = abort_pair();
        assert!(!signal.is_aborted());
        let waiter = tokio::spawn(async move {
            signal.aborted().await;
        });
        controller.abort();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn never_signal_stays_pending() {
        let mut signal = AbortSignal::never();
        let result = tokio::time::timeout(Duration::from_secs(5), signal.aborted()).await;
        assert!(result.is_err());
    }
}
