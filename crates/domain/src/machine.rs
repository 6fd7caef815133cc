//! Generic workshop state machine driver.
//!
//! A [`Workshop`] describes its phases as a closed enum and reacts to events
//! through `match`. [`StateMachine`] owns one workshop and its single active
//! phase, runs `exit`/`enter` hooks around every transition and collects the
//! resulting [`Effect`]s for the runtime to execute.
//!
//! # Dispatch guarantees
//!
//! - Exactly one phase is active at any observation point.
//! - `exit` and `enter` run to completion before the next event is accepted
//!   (`&mut self`, no re-entrancy).
//! - A handler error is caught here: the partial effects are dropped, the
//!   phase and epoch observed before the dispatch are restored and the
//!   machine freezes. Workshop data already changed by the failing hooks is
//!   not rolled back; it stays frozen until a reset calls [`Workshop::reset`].
//!   A frozen machine ignores everything except a reset.
//! - Timers carry the epoch of the phase that started them. The epoch is
//!   bumped on every transition, so a timer from an earlier phase is stale.
//!
//! ```text
//! dispatch(event) ──▶ handle(phase, event) ──▶ Stay
//!                                         └──▶ Goto(p) ──▶ exit(phase) ──▶ enter(p) ──▶ Stay | Goto(..)
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use crate::error::DomainError;
use crate::events::{Effect, GenerationRequest, Timer, WorkshopEvent};
use crate::game_state::{is_reset_request, SharedGameState, Update};
use crate::role::Role;

/// Upper bound on chained `enter` transitions within a single dispatch.
pub const MAX_TRANSITION_HOPS: usize = 8;

/// What a hook wants the machine to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<P> {
    Stay,
    Goto(P),
}

/// Per-dispatch view handed to workshop hooks.
pub struct Context<'a> {
    state: &'a SharedGameState,
    now: Instant,
    epoch: u64,
    effects: Vec<Effect>,
}

impl<'a> Context<'a> {
    fn new(state: &'a SharedGameState, now: Instant, epoch: u64) -> Self {
        Self {
            state,
            now,
            epoch,
            effects: Vec::new(),
        }
    }

    /// Last-known shared state (as of the start of this dispatch).
    pub fn state(&self) -> &SharedGameState {
        self.state
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Epoch of the currently active phase.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn publish(&mut self, update: Update) {
        if !update.is_empty() {
            self.effects.push(Effect::Publish(update.into_map()));
        }
    }

    /// Start a timer bound to the current phase.
    pub fn start_timer(&mut self, name: &'static str, after: Duration) {
        let timer = Timer {
            name,
            epoch: self.epoch,
        };
        self.effects.push(Effect::StartTimer { timer, after });
    }

    pub fn generate(&mut self, role: Role, image: Vec<u8>, prompt: impl Into<String>) {
        self.effects.push(Effect::Generate(GenerationRequest {
            role,
            image,
            prompt: prompt.into(),
            epoch: self.epoch,
        }));
    }

    pub fn showcase(&mut self, role: Role, image: Option<Vec<u8>>) {
        self.effects.push(Effect::Showcase { role, image });
    }

    pub fn status(&mut self, message: impl Into<String>) {
        self.effects.push(Effect::Status(message.into()));
    }

    fn push(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    fn into_effects(self) -> Vec<Effect> {
        self.effects
    }
}

/// One interactive installation module.
pub trait Workshop {
    type Phase: Copy + Eq + fmt::Debug + fmt::Display;

    fn name(&self) -> &'static str;

    fn initial_phase(&self) -> Self::Phase;

    /// Runs after the machine switched to `phase`.
    fn enter(
        &mut self,
        phase: Self::Phase,
        ctx: &mut Context<'_>,
    ) -> Result<Transition<Self::Phase>, DomainError>;

    /// Runs before the machine leaves `phase`.
    fn exit(&mut self, _phase: Self::Phase, _ctx: &mut Context<'_>) {}

    fn handle(
        &mut self,
        phase: Self::Phase,
        event: &WorkshopEvent,
        ctx: &mut Context<'_>,
    ) -> Result<Transition<Self::Phase>, DomainError>;

    /// Clear all workshop data (operator reset). Runs before the machine re-enters the initial phase.
    fn reset(&mut self);
}

/// How a dispatch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    /// Timer from an earlier phase, dropped
    Stale,
    /// Machine is frozen after an earlier failure, event dropped
    Frozen,
    /// Handler failed; the machine is now frozen
    Failed(DomainError),
}

/// Result of a dispatch: the phase change it caused and the effects to execute.
#[derive(Debug)]
pub struct Dispatch<P> {
    pub from: P,
    pub to: P,
    pub outcome: Outcome,
    pub effects: Vec<Effect>,
}

impl<P: PartialEq> Dispatch<P> {
    pub fn changed_phase(&self) -> bool {
        self.from != self.to
    }
}

pub struct StateMachine<W: Workshop> {
    workshop: W,
    phase: W::Phase,
    epoch: u64,
    fault: Option<DomainError>,
}

impl<W: Workshop> StateMachine<W> {
    pub fn new(workshop: W) -> Self {
        let phase = workshop.initial_phase();
        Self {
            workshop,
            phase,
            epoch: 0,
            fault: None,
        }
    }

    pub fn phase(&self) -> W::Phase {
        self.phase
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn workshop(&self) -> &W {
        &self.workshop
    }

    pub fn is_frozen(&self) -> bool {
        self.fault.is_some()
    }

    pub fn fault(&self) -> Option<&DomainError> {
        self.fault.as_ref()
    }

    /// Run the initial phase's `enter` hook.
    pub fn start(&mut self, state: &SharedGameState, now: Instant) -> Dispatch<W::Phase> {
        let from = self.phase;
        let epoch = self.epoch;
        let mut ctx = Context::new(state, now, self.epoch);
        let result = match self.workshop.enter(self.phase, &mut ctx) {
            Ok(Transition::Stay) => Ok(()),
            Ok(Transition::Goto(next)) => self.run_transition(next, &mut ctx),
            Err(e) => Err(e),
        };
        self.finish(from, epoch, ctx, result)
    }

    /// Force a transition to `to` (operator override).
    pub fn transition(
        &mut self,
        to: W::Phase,
        state: &SharedGameState,
        now: Instant,
    ) -> Dispatch<W::Phase> {
        let from = self.phase;
        let epoch = self.epoch;
        let mut ctx = Context::new(state, now, self.epoch);
        let result = self.run_transition(to, &mut ctx);
        self.finish(from, epoch, ctx, result)
    }

    /// Forward one event to the active phase.
    pub fn dispatch(
        &mut self,
        event: &WorkshopEvent,
        state: &SharedGameState,
        now: Instant,
    ) -> Dispatch<W::Phase> {
        let from = self.phase;
        let epoch = self.epoch;
        let mut ctx = Context::new(state, now, self.epoch);

        if is_reset(event) {
            self.workshop.reset();
            self.fault = None;
            let initial = self.workshop.initial_phase();
            let result = self.run_transition(initial, &mut ctx);
            return self.finish(from, epoch, ctx, result);
        }

        if self.fault.is_some() {
            return Dispatch {
                from,
                to: from,
                outcome: Outcome::Frozen,
                effects: Vec::new(),
            };
        }

        if let WorkshopEvent::TimerElapsed(timer) = event {
            if timer.epoch != self.epoch {
                return Dispatch {
                    from,
                    to: from,
                    outcome: Outcome::Stale,
                    effects: Vec::new(),
                };
            }
        }

        let result = match self.workshop.handle(self.phase, event, &mut ctx) {
            Ok(Transition::Stay) => Ok(()),
            Ok(Transition::Goto(next)) => self.run_transition(next, &mut ctx),
            Err(e) => Err(e),
        };
        self.finish(from, epoch, ctx, result)
    }

    fn run_transition(&mut self, to: W::Phase, ctx: &mut Context<'_>) -> Result<(), DomainError> {
        let mut next = to;
        for _ in 0..MAX_TRANSITION_HOPS {
            ctx.push(Effect::CancelTimers);
            self.workshop.exit(self.phase, ctx);

            self.epoch += 1;
            ctx.epoch = self.epoch;
            self.phase = next;

            match self.workshop.enter(next, ctx)? {
                Transition::Stay => return Ok(()),
                Transition::Goto(following) => next = following,
            }
        }
        Err(DomainError::TransitionLoop {
            hops: MAX_TRANSITION_HOPS,
            phase: next.to_string(),
        })
    }

    fn finish(
        &mut self,
        from: W::Phase,
        epoch: u64,
        ctx: Context<'_>,
        result: Result<(), DomainError>,
    ) -> Dispatch<W::Phase> {
        match result {
            Ok(()) => Dispatch {
                from,
                to: self.phase,
                outcome: Outcome::Handled,
                effects: ctx.into_effects(),
            },
            Err(e) => {
                self.phase = from;
                self.epoch = epoch;
                self.fault = Some(e.clone());
                Dispatch {
                    from,
                    to: from,
                    outcome: Outcome::Failed(e),
                    effects: Vec::new(),
                }
            }
        }
    }
}

fn is_reset(event: &WorkshopEvent) -> bool {
    match event {
        WorkshopEvent::Reset => true,
        WorkshopEvent::StateUpdate(update) => is_reset_request(update),
        _ => false,
    }
}
