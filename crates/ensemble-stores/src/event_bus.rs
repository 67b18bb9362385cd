//! In-process EventBus backed by tokio broadcast channels.

use async_trait::async_trait;
use tokio::sync::broadcast;

use ensemble_core::event::{EngineEvent, EventBus};
use ensemble_core::store::StoreError;

/// Broadcast bus for realtime lifecycle notifications.
pub struct BroadcastEventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl BroadcastEventBus {
    /// Create a new broadcast bus with channel capacity.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Return the configured channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        // Default capacity for local realtime consumers.
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, event: EngineEvent) -> Result<(), StoreError> {
        // "No receivers" is a non-error; the bus is best-effort.
        match self.tx.send(event) {
            Ok(_) => Ok(()),
            Err(broadcast::error::SendError(_)) => Ok(()),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}
