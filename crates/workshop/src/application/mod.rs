//! Application layer: the per-workshop event loop and its plumbing.

pub mod events;
pub mod runtime;
pub mod timers;

pub use events::{EventSender, RuntimeClosed, RuntimeEvent};
pub use runtime::{Showcase, WorkshopRuntime};
pub use timers::TimerSet;
