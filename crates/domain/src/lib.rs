//! Rift Operation domain: the shared game document, role synchronization and
//! the workshop state machines. Everything here is pure; time is passed in
//! and side effects are returned as [`Effect`]s.

pub mod battle;
pub mod error;
pub mod events;
pub mod game_state;
pub mod machine;
pub mod rift;
pub mod role;
pub mod sync;

pub use battle::{Attack, BattleConfig, BattlePhase, BattleWorkshop};
pub use error::DomainError;
pub use events::{Effect, GenerationRequest, Timer, WorkshopEvent};
pub use game_state::{is_reset_request, keys, SharedGameState, Update};
pub use machine::{
    Context, Dispatch, Outcome, StateMachine, Transition, Workshop, MAX_TRANSITION_HOPS,
};
pub use rift::{RiftConfig, RiftPhase, RiftWorkshop};
pub use role::{Role, RolePair, RoleState};
pub use sync::RoleSyncTracker;
