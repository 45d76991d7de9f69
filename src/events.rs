//! Fan-out of dashboard snapshots to live viewers
//!
//! The dashboard writer publishes after every applied batch of readings.
//! Subscribers that fall behind lose the oldest snapshots, which is harmless:
//! each snapshot carries the full state.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

use crate::dashboard::Snapshot;

#[derive(Clone)]
pub struct EventBus {
    snapshots: broadcast::Sender<Arc<Snapshot>>,
}

impl EventBus {
    /// `capacity` snapshots are buffered per subscriber
    pub fn with_capacity(capacity: usize) -> Self {
        let (snapshots, _) = broadcast::channel(capacity);
        Self { snapshots }
    }

    /// Number of viewers the snapshot reached
    pub fn publish(&self, snapshot: Snapshot) -> usize {
        match self.snapshots.send(Arc::new(snapshot)) {
            Ok(viewers) => viewers,
            Err(_) => {
                trace!("No dashboard viewers connected");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Snapshot>> {
        self.snapshots.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_snapshot() -> Snapshot {
        Snapshot {
            metrics: Default::default(),
            clock: None,
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_viewer() {
        let bus = EventBus::with_capacity(4);
        assert_eq!(bus.publish(empty_snapshot()), 0);

        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.publish(empty_snapshot()), 2);

        assert!(first.recv().await.is_ok());
        assert!(second.recv().await.is_ok());
    }
}
