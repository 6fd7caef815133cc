//! Rift Operation Workshop - one workshop state machine on the broadcast bus
//!
//! - `ports` - traits for the relay link and the generation service
//! - `application` - the event loop, timers and event channel
//! - `infrastructure` - WebSocket client, HTTP generation client, hardware bridge
//! - `config` - environment configuration

pub mod application;
pub mod config;
pub mod infrastructure;
pub mod ports;
