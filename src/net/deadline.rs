//! Re-armable deadline timer.
//!
//! One `Deadline` guards a connection. The connection driver races its I/O
//! future against [`Deadline::expired`]; dropping the I/O future on expiry
//! closes the socket and cancels whatever operation was pending.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};

/// A deadline shared between a connection driver and its request handling.
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Arc<watch::Sender<Instant>>,
    period: Duration,
}

impl Deadline {
    /// Create a deadline that expires `period` from now.
    pub fn new(period: Duration) -> Self {
        let (tx, _) = watch::channel(Instant::now() + period);
        Self {
            at: Arc::new(tx),
            period,
        }
    }

    /// Push the deadline `period` into the future.
    pub fn rearm(&self) {
        self.at.send_replace(Instant::now() + self.period);
    }

    /// When the deadline currently fires.
    pub fn expires_at(&self) -> Instant {
        *self.at.borrow()
    }

    /// Resolves once the deadline passes without being re-armed.
    pub async fn expired(&self) {
        let mut rx = self.at.subscribe();
        loop {
            let at = *rx.borrow_and_update();
            if at <= Instant::now() {
                return;
            }
            tokio::select! {
                _ = time::sleep_until(at) => {}
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_period() {
        let deadline = Deadline::new(Duration::from_secs(5));
        let start = Instant::now();
        deadline.expired().await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_pushes_expiry_back() {
        let deadline = Deadline::new(Duration::from_secs(5));
        let start = Instant::now();

        let rearm = deadline.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(3)).await;
            rearm.rearm();
        });

        deadline.expired().await;
        assert!(start.elapsed() >= Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn expires_at_tracks_rearm() {
        let deadline = Deadline::new(Duration::from_secs(5));
        let first = deadline.expires_at();
        assert_eq!(first, Instant::now() + Duration::from_secs(5));

        time::advance(Duration::from_secs(2)).await;
        deadline.rearm();
        assert_eq!(deadline.expires_at(), first + Duration::from_secs(2));
    }
}
