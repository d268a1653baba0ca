//! Layer readiness.
//!
//! A layer starts [`LayerStatus::NotReady`], may pass through any number of
//! [`LayerStatus::Readying`] steps and reaches [`LayerStatus::Ready`] once its
//! network-dependent setup completes. Progress only moves forward; the only
//! way back is [`ReadinessTracker::reset`], called from a layer's `clear()`.
//!
//! Waiters park on a watch channel and are woken by the transition to ready.

use std::fmt;

use tokio::sync::watch;
use tracing::debug;

/// A layer's readiness.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LayerStatus {
    /// Setup has not started.
    NotReady,
    /// Setup in progress, with a readiness fraction in `[0, 1]`.
    Readying(f64),
    /// Usable.
    Ready,
}

impl LayerStatus {
    /// Readiness as a fraction: 0 for not ready, 1 for ready.
    pub fn readiness(&self) -> f64 {
        match self {
            LayerStatus::NotReady => 0.0,
            LayerStatus::Readying(fraction) => *fraction,
            LayerStatus::Ready => 1.0,
        }
    }

    /// Whether the layer is usable.
    pub fn is_ready(&self) -> bool {
        matches!(self, LayerStatus::Ready)
    }

    /// A readying status with the fraction clamped into `[0, 1]`.
    pub fn readying(fraction: f64) -> Self {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        LayerStatus::Readying(fraction)
    }
}

impl fmt::Display for LayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerStatus::NotReady => f.write_str("not ready"),
            LayerStatus::Readying(fraction) => write!(f, "readying ({:.0}%)", fraction * 100.0),
            LayerStatus::Ready => f.write_str("ready"),
        }
    }
}

/// Monotonic status holder with parked waiters.
pub struct ReadinessTracker {
    tx: watch::Sender<LayerStatus>,
}

impl ReadinessTracker {
    /// A tracker starting at [`LayerStatus::NotReady`].
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LayerStatus::NotReady);
        Self { tx }
    }

    /// A tracker that is ready from the start, for layers with no setup.
    pub fn ready() -> Self {
        let (tx, _rx) = watch::channel(LayerStatus::Ready);
        Self { tx }
    }

    /// Current status.
    pub fn status(&self) -> LayerStatus {
        *self.tx.borrow()
    }

    /// Move forward to `status`. Regressions are ignored.
    ///
    /// Returns whether the status changed.
    pub fn advance(&self, status: LayerStatus) -> bool {
        self.tx.send_if_modified(|current| {
            let forward = match (*current, status) {
                (LayerStatus::Ready, _) => false,
                (_, LayerStatus::Ready) => true,
                (_, LayerStatus::NotReady) => false,
                (current, next) => next.readiness() > current.readiness(),
            };
            if forward {
                debug!(from = %current, to = %status, "layer status advanced");
                *current = status;
            }
            forward
        })
    }

    /// Mark ready and wake all waiters.
    pub fn mark_ready(&self) {
        self.advance(LayerStatus::Ready);
    }

    /// Return to [`LayerStatus::NotReady`].
    pub fn reset(&self) {
        self.tx.send_if_modified(|current| {
            let changed = *current != LayerStatus::NotReady;
            *current = LayerStatus::NotReady;
            changed
        });
    }

    /// Park until the status is ready.
    pub async fn wait_until_ready(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only ends on ready.
        let _ = rx.wait_for(LayerStatus::is_ready).await;
    }

    /// A receiver for callers that want to observe every transition.
    pub fn subscribe(&self) -> watch::Receiver<LayerStatus> {
        self.tx.subscribe()
    }
}

impl Default for ReadinessTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_progress_is_monotonic() {
        let tracker = ReadinessTracker::new();
        assert!(tracker.advance(LayerStatus::readying(0.3)));
        assert!(!tracker.advance(LayerStatus::readying(0.1)));
        assert!(!tracker.advance(LayerStatus::NotReady));
        assert_eq!(tracker.status(), LayerStatus::Readying(0.3));

        tracker.mark_ready();
        assert!(!tracker.advance(LayerStatus::readying(0.9)));
        assert!(tracker.status().is_ready());
    }

    #[test]
    fn test_reset_returns_to_not_ready() {
        let tracker = ReadinessTracker::ready();
        tracker.reset();
        assert_eq!(tracker.status(), LayerStatus::NotReady);
        tracker.reset();
        assert_eq!(tracker.status(), LayerStatus::NotReady);
    }

    #[test]
    fn test_readying_clamps() {
        assert_eq!(LayerStatus::readying(1.7).readiness(), 1.0);
        assert_eq!(LayerStatus::readying(-2.0).readiness(), 0.0);
        assert_eq!(LayerStatus::readying(f64::NAN).readiness(), 0.0);
        assert_eq!(LayerStatus::readying(0.5).to_string(), "readying (50%)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_wake_on_ready() {
        let tracker = Arc::new(ReadinessTracker::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move { tracker.wait_until_ready().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        for waiter in &waiters {
            assert!(!waiter.is_finished());
        }

        tracker.advance(LayerStatus::readying(0.5));
        tracker.mark_ready();
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter woke")
                .expect("waiter task");
        }
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_ready() {
        let tracker = ReadinessTracker::ready();
        tokio::time::timeout(Duration::from_millis(100), tracker.wait_until_ready())
            .await
            .expect("already ready");
    }
}
