//! Capacity publication.
//!
//! Each tick the controller sums elevated capacity across online instances
//! and publishes it, floored at a configured minimum so the published
//! number is never implausibly low.

use tokio::sync::watch;
use tracing::debug;

/// Sink for the aggregate fleet capacity.
pub trait CapacityPublisher: Send + Sync {
    fn publish(&self, total: u32);
}

/// Watch-channel backed capacity gauge.
///
/// Consumers hold the receiver and always observe the latest published
/// value; a dropped receiver set makes `publish` a no-op.
pub struct CapacityGauge {
    tx: watch::Sender<u32>,
}

impl CapacityGauge {
    pub fn new(initial: u32) -> (Self, watch::Receiver<u32>) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, rx)
    }
}

impl CapacityPublisher for CapacityGauge {
    fn publish(&self, total: u32) {
        debug!(total, "capacity published");
        let _ = self.tx.send(total);
    }
}
