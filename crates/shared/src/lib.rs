//! Rift Operation Protocol - the broadcast envelope shared by every device
//!
//! Every message on the relay is one flat JSON object per text frame. The only
//! required key is `device_id`; everything else is game state.
//!
//! # Design Principles
//!
//! 1. **Minimal dependencies** - Only serde, serde_json and thiserror
//! 2. **No business logic** - the relay and the workshops decide what keys mean
//! 3. **No versioning** - the envelope is the bare object, as the props expect it

pub mod messages;

pub use messages::{BroadcastMessage, ProtocolError, DEVICE_ID_KEY};
