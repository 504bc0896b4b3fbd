use std::time::Duration;

use tokio::sync::watch;

/// Process-level shutdown signal observed by the poll loop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration` unless shutdown is requested first.
    ///
    /// Returns `true` if the full duration elapsed.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_requested() {
            return false;
        }

        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        // Sender gone: nobody can request shutdown any more.
                        (&mut sleep).await;
                        return true;
                    }
                    if *self.rx.borrow() {
                        return false;
                    }
                }
            }
        }
    }
}
