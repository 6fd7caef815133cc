//! Rift workshop: players collect the scattered rift parts.
//!
//! ```text
//! Idle ──presence / known part tag──▶ Collecting ──all parts──▶ Complete
//! any ──reset──▶ Idle
//! ```
//!
//! The part count it publishes is what wakes the battle boss.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::events::WorkshopEvent;
use crate::game_state::{keys, Update};
use crate::machine::{Context, Transition, Workshop};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiftPhase {
    Idle,
    Collecting,
    Complete,
}

impl RiftPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Collecting => "collecting",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for RiftPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RiftConfig {
    /// Known part tags; empty accepts any tag
    pub part_uids: Vec<String>,
    pub required_parts: u64,
    /// A visitor closer than this wakes the rift
    pub wake_distance_cm: f32,
}

impl Default for RiftConfig {
    fn default() -> Self {
        Self {
            part_uids: Vec::new(),
            required_parts: 4,
            wake_distance_cm: 50.0,
        }
    }
}

impl RiftConfig {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.required_parts == 0 {
            return Err(DomainError::validation("rift needs at least one part"));
        }
        let known = self.part_uids.iter().collect::<BTreeSet<_>>().len() as u64;
        if !self.part_uids.is_empty() && known < self.required_parts {
            return Err(DomainError::validation(format!(
                "rift requires {} parts but only {known} part tags are configured",
                self.required_parts
            )));
        }
        Ok(())
    }
}

pub struct RiftWorkshop {
    config: RiftConfig,
    collected: BTreeSet<String>,
}

impl RiftWorkshop {
    pub fn new(config: RiftConfig) -> Result<Self, DomainError> {
        config.validate()?;
        Ok(Self {
            config,
            collected: BTreeSet::new(),
        })
    }

    pub fn part_count(&self) -> u64 {
        self.collected.len() as u64
    }

    fn is_known_part(&self, uid: &str) -> bool {
        self.config.part_uids.is_empty() || self.config.part_uids.iter().any(|u| u == uid)
    }

    /// Returns whether the tag was a new part.
    fn collect(&mut self, uid: &str, ctx: &mut Context<'_>) -> bool {
        if uid.is_empty() || !self.is_known_part(uid) {
            ctx.status(format!("tag {uid} is not a rift part"));
            return false;
        }
        if !self.collected.insert(uid.to_string()) {
            ctx.status(format!("part {uid} already placed"));
            return false;
        }
        true
    }

    fn publish_count(&self, ctx: &mut Context<'_>) {
        ctx.publish(Update::new().set(keys::RIFT_PART_COUNT, self.part_count()));
    }
}

impl Workshop for RiftWorkshop {
    type Phase = RiftPhase;

    fn name(&self) -> &'static str {
        "rift"
    }

    fn initial_phase(&self) -> RiftPhase {
        RiftPhase::Idle
    }

    fn enter(
        &mut self,
        phase: RiftPhase,
        ctx: &mut Context<'_>,
    ) -> Result<Transition<RiftPhase>, DomainError> {
        ctx.publish(
            Update::new()
                .set(keys::RIFT_STATE, phase.as_str())
                .set(keys::RIFT_PART_COUNT, self.part_count()),
        );
        match phase {
            RiftPhase::Collecting if self.part_count() >= self.config.required_parts => {
                Ok(Transition::Goto(RiftPhase::Complete))
            }
            RiftPhase::Complete => {
                ctx.status("rift sealed, all parts placed");
                Ok(Transition::Stay)
            }
            _ => Ok(Transition::Stay),
        }
    }

    fn handle(
        &mut self,
        phase: RiftPhase,
        event: &WorkshopEvent,
        ctx: &mut Context<'_>,
    ) -> Result<Transition<RiftPhase>, DomainError> {
        let next = match (phase, event) {
            (RiftPhase::Idle, WorkshopEvent::Distance { cm })
                if *cm <= self.config.wake_distance_cm =>
            {
                Transition::Goto(RiftPhase::Collecting)
            }
            (RiftPhase::Idle, WorkshopEvent::Rfid { uid, .. }) => {
                if self.collect(uid, ctx) {
                    Transition::Goto(RiftPhase::Collecting)
                } else {
                    Transition::Stay
                }
            }
            (RiftPhase::Collecting, WorkshopEvent::Rfid { uid, .. }) => {
                if !self.collect(uid, ctx) {
                    return Ok(Transition::Stay);
                }
                self.publish_count(ctx);
                if self.part_count() >= self.config.required_parts {
                    Transition::Goto(RiftPhase::Complete)
                } else {
                    Transition::Stay
                }
            }
            _ => Transition::Stay,
        };
        Ok(next)
    }

    fn reset(&mut self) {
        self.collected.clear();
    }
}
