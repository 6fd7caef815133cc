use async_trait::async_trait;

use rift_shared::BroadcastMessage;

/// Outbound side of the relay connection.
///
/// Publishing is fire-and-forget: when the link is down the message is
/// dropped with a warning, never queued.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BroadcastPort: Send + Sync {
    async fn publish(&self, message: BroadcastMessage);
}
