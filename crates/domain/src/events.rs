//! Workshop events and effects
//!
//! Events are everything a workshop reacts to: inbound broadcasts, hardware
//! callbacks, timer expiries and completed background work. Effects are
//! everything a workshop asks the runtime to do. The state machines never
//! perform I/O themselves.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::role::Role;

/// A phase timer, tagged with the epoch of the phase that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timer {
    pub name: &'static str,
    pub epoch: u64,
}

/// Inputs consumed by a workshop state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkshopEvent {
    /// A broadcast from another device, already merged into the shared state
    StateUpdate(Map<String, Value>),
    /// RFID tag read by a named reader
    Rfid { uid: String, reader: String },
    /// Physical button pressed at a role's station
    Button { role: Role },
    /// Distance sensor sample in centimetres
    Distance { cm: f32 },
    /// Drawing recognizer result for a role
    Recognition {
        role: Role,
        label: String,
        distance: f32,
    },
    /// Camera frame submitted for generation
    ClientFrame { role: Role, image: Vec<u8> },
    /// Background generation finished (`image` is `None` on failure)
    GenerationFinished {
        role: Role,
        epoch: u64,
        image: Option<Vec<u8>>,
    },
    TimerElapsed(Timer),
    /// Operator reset
    Reset,
}

impl WorkshopEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateUpdate(_) => "state_update",
            Self::Rfid { .. } => "rfid",
            Self::Button { .. } => "button",
            Self::Distance { .. } => "distance",
            Self::Recognition { .. } => "recognition",
            Self::ClientFrame { .. } => "client_frame",
            Self::GenerationFinished { .. } => "generation_finished",
            Self::TimerElapsed(_) => "timer_elapsed",
            Self::Reset => "reset",
        }
    }
}

/// A generation pipeline call requested by a workshop.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub role: Role,
    pub image: Vec<u8>,
    pub prompt: String,
    /// Epoch of the phase that issued the request; results from older epochs are discarded
    pub epoch: u64,
}

/// Side effects requested by a workshop, executed by the runtime in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Merge these fields into the shared state and broadcast the full document
    Publish(Map<String, Value>),
    StartTimer { timer: Timer, after: Duration },
    /// Abort every pending phase timer
    CancelTimers,
    Generate(GenerationRequest),
    /// Artwork that should drive the shared animation
    Showcase { role: Role, image: Option<Vec<u8>> },
    /// Human readable status line for operators and UIs
    Status(String),
}
