//! Everything that reaches the event loop goes through one channel.

use tokio::sync::mpsc;

use rift_domain::WorkshopEvent;
use rift_shared::BroadcastMessage;

/// Buffer size for a workshop's event channel.
pub const EVENT_CHANNEL_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A frame received from the relay
    Inbound(BroadcastMessage),
    /// Hardware, timer or background-task input for the state machine
    Workshop(WorkshopEvent),
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("Workshop runtime is not running")]
pub struct RuntimeClosed;

/// Cloneable handle for feeding events into a running workshop.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<RuntimeEvent>,
}

impl EventSender {
    pub(crate) fn new(tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, event: WorkshopEvent) -> Result<(), RuntimeClosed> {
        self.tx
            .send(RuntimeEvent::Workshop(event))
            .await
            .map_err(|_| RuntimeClosed)
    }

    pub async fn inbound(&self, message: BroadcastMessage) -> Result<(), RuntimeClosed> {
        self.tx
            .send(RuntimeEvent::Inbound(message))
            .await
            .map_err(|_| RuntimeClosed)
    }
}
