//! Relay connection over tokio-tungstenite.

mod client;

pub use client::{BroadcastClient, ConnectionState, TransportError};
