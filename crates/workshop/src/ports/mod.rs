//! Port traits for infrastructure boundaries.
//!
//! Ports exist for:
//! - The broadcast relay (could swap WebSocket -> MQTT)
//! - Image generation (could swap the HTTP service -> a local model)

mod broadcast;
mod generation;

pub use broadcast::BroadcastPort;
pub use generation::{GeneratedImage, GenerationError, GenerationPort};

#[cfg(test)]
pub use broadcast::MockBroadcastPort;
#[cfg(test)]
pub use generation::MockGenerationPort;
