//! Connection management for WebSocket clients.
//!
//! Tracks connected devices and fans broadcasts out to every peer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Information about a connected device.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connection_id: Uuid,
    pub connected_at: DateTime<Utc>,
    /// Learned from the first valid broadcast the device sends
    pub device_id: Option<String>,
}

/// Manages all active WebSocket connections.
pub struct ConnectionManager {
    /// Map of connection_id -> (ConnectionInfo, sender channel)
    connections: RwLock<HashMap<Uuid, (ConnectionInfo, mpsc::Sender<String>)>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection.
    pub async fn register(&self, connection_id: Uuid, sender: mpsc::Sender<String>) {
        let info = ConnectionInfo {
            connection_id,
            connected_at: Utc::now(),
            device_id: None,
        };
        let mut connections = self.connections.write().await;
        connections.insert(connection_id, (info, sender));
        tracing::debug!(connection_id = %connection_id, "Connection registered");
    }

    /// Unregister a connection.
    pub async fn unregister(&self, connection_id: Uuid) {
        let mut connections = self.connections.write().await;
        if let Some((info, _)) = connections.remove(&connection_id) {
            tracing::debug!(
                connection_id = %connection_id,
                device_id = info.device_id.as_deref().unwrap_or("unknown"),
                "Connection unregistered"
            );
        }
    }

    pub async fn get(&self, connection_id: Uuid) -> Option<ConnectionInfo> {
        let connections = self.connections.read().await;
        connections.get(&connection_id).map(|(info, _)| info.clone())
    }

    /// Remember which device sits behind a connection.
    pub async fn identify(&self, connection_id: Uuid, device_id: &str) -> Result<(), ConnectionError> {
        let mut connections = self.connections.write().await;
        let (info, _) = connections
            .get_mut(&connection_id)
            .ok_or(ConnectionError::NotFound)?;
        if info.device_id.as_deref() != Some(device_id) {
            tracing::info!(
                connection_id = %connection_id,
                device_id = %device_id,
                "Device identified"
            );
            info.device_id = Some(device_id.to_string());
        }
        Ok(())
    }

    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Forward `text` to every connection except `sender_id`. Returns how many peers accepted it.
    pub async fn broadcast_except(&self, sender_id: Uuid, text: &str) -> usize {
        let connections = self.connections.read().await;
        let mut delivered = 0;
        for (info, sender) in connections.values() {
            if info.connection_id == sender_id {
                continue;
            }
            match sender.try_send(text.to_string()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        connection_id = %info.connection_id,
                        error = %e,
                        "Failed to broadcast message"
                    );
                }
            }
        }
        delivered
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur during connection operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection not found")]
    NotFound,
}
