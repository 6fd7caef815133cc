//! Adapters behind the ports, plus the hardware input bridge.

pub mod generation;
pub mod hardware;
pub mod websocket;
