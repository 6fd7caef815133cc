//! Battle workshop: two players defeat a boss by drawing counters to its attacks.
//!
//! # State Transitions
//!
//! ```text
//! Idle ──rift_part_count >= N / operator button──▶ Appearing
//! Appearing ──appear timer──▶ Fighting
//! Fighting ──both roles drew the counter──▶ Hit
//! Hit ──hit timer, hp > 0──▶ Fighting
//! Hit ──hit timer, hp == 0──▶ Weakened
//! Weakened ──both cages closed (RFID)──▶ Captured ──captured timer──▶ Done
//! any ──reset──▶ Idle
//! ```
//!
//! Boss HP is set when the boss appears, decreases by exactly one on every
//! hit and is only restored by an operator reset.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::events::WorkshopEvent;
use crate::game_state::{keys, Update};
use crate::machine::{Context, Transition, Workshop};
use crate::role::{Role, RolePair};
use crate::sync::RoleSyncTracker;

pub const APPEAR_TIMER: &str = "battle.appear";
pub const HIT_TIMER: &str = "battle.hit";
pub const CAPTURED_TIMER: &str = "battle.captured";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattlePhase {
    Idle,
    Appearing,
    Fighting,
    Hit,
    Weakened,
    Captured,
    Done,
}

impl BattlePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Appearing => "appearing",
            Self::Fighting => "fighting",
            Self::Hit => "hit",
            Self::Weakened => "weakened",
            Self::Captured => "captured",
            Self::Done => "done",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for BattlePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A boss attack and the drawing that neutralizes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Attack {
    pub name: String,
    pub counter: String,
    /// Prompt handed to the generation pipeline while this attack is active
    pub prompt: String,
}

impl Attack {
    pub fn new(name: &str, counter: &str, prompt: &str) -> Self {
        Self {
            name: name.to_string(),
            counter: counter.to_string(),
            prompt: prompt.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BattleConfig {
    pub roles: RolePair,
    /// `rift_part_count` that wakes the boss
    pub start_part_count: u64,
    pub initial_hp: u32,
    pub appear_duration: Duration,
    pub hit_duration: Duration,
    pub captured_duration: Duration,
    /// Minimum delay between two generation requests of one role
    pub generation_cooldown: Duration,
    /// Recognitions farther than this never count as a counter
    pub max_recognition_distance: f32,
    /// Attack rotation; the boss cycles through it in order
    pub attacks: Vec<Attack>,
    /// Accepted cage tag uids; empty accepts any tag
    pub cage_uids: Vec<String>,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            roles: RolePair::default(),
            start_part_count: 4,
            initial_hp: 3,
            appear_duration: Duration::from_secs(10),
            hit_duration: Duration::from_secs(2),
            captured_duration: Duration::from_secs(5),
            generation_cooldown: Duration::from_secs(2),
            max_recognition_distance: 0.6,
            attacks: vec![
                Attack::new("fire", "water", "a wave of water crashing over flames"),
                Attack::new("shadow", "sun", "a blazing sun piercing the darkness"),
                Attack::new("storm", "shield", "a glowing shield deflecting lightning"),
            ],
            cage_uids: Vec::new(),
        }
    }
}

impl BattleConfig {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.attacks.is_empty() {
            return Err(DomainError::validation("battle needs at least one attack"));
        }
        if self.initial_hp == 0 {
            return Err(DomainError::validation("boss initial hp must be at least 1"));
        }
        if !self.max_recognition_distance.is_finite() || self.max_recognition_distance < 0.0 {
            return Err(DomainError::validation(
                "max recognition distance must be a non-negative number",
            ));
        }
        Ok(())
    }
}

pub struct BattleWorkshop {
    config: BattleConfig,
    sync: RoleSyncTracker,
    hp: u32,
    next_attack: usize,
    current_attack: Option<usize>,
    last_validated: Option<Role>,
    /// Last value of each remote `battle_drawing_<role>_recognised` flag seen this phase
    remote_flags: BTreeMap<Role, bool>,
    caged: BTreeSet<Role>,
}

impl BattleWorkshop {
    pub fn new(config: BattleConfig) -> Result<Self, DomainError> {
        config.validate()?;
        let sync = RoleSyncTracker::new(config.roles.clone());
        Ok(Self {
            config,
            sync,
            hp: 0,
            next_attack: 0,
            current_attack: None,
            last_validated: None,
            remote_flags: BTreeMap::new(),
            caged: BTreeSet::new(),
        })
    }

    pub fn config(&self) -> &BattleConfig {
        &self.config
    }

    pub fn hp(&self) -> u32 {
        self.hp
    }

    pub fn current_attack(&self) -> Option<&Attack> {
        self.current_attack.and_then(|i| self.config.attacks.get(i))
    }

    pub fn sync(&self) -> &RoleSyncTracker {
        &self.sync
    }

    pub fn caged(&self) -> &BTreeSet<Role> {
        &self.caged
    }

    fn require_attack(&self) -> Result<&Attack, DomainError> {
        self.current_attack().ok_or_else(|| {
            DomainError::invalid_state_transition("fighting without an active boss attack")
        })
    }

    fn start_condition_met(&self, ctx: &Context<'_>) -> bool {
        ctx.state()
            .rift_part_count()
            .is_some_and(|count| count >= self.config.start_part_count)
    }

    /// Recognizer result for one role while fighting.
    fn on_recognition(
        &mut self,
        role: &Role,
        label: &str,
        distance: f32,
        ctx: &mut Context<'_>,
    ) -> Result<Transition<BattlePhase>, DomainError> {
        let counter = self.require_attack()?.counter.clone();
        let max_distance = self.config.max_recognition_distance;
        let Some(state) = self.sync.state_mut(role) else {
            ctx.status(format!("ignoring recognition for unknown role '{role}'"));
            return Ok(Transition::Stay);
        };

        state.label = Some(label.to_string());
        state.distance = Some(distance);
        let is_valid_counter = label.eq_ignore_ascii_case(&counter) && distance <= max_distance;

        if !is_valid_counter {
            if !state.validated {
                ctx.publish(Update::new().set(keys::drawing_recognised(role), false));
            }
            ctx.status(format!(
                "{role} drew '{label}' ({distance:.2}), the counter is '{counter}'"
            ));
            return Ok(Transition::Stay);
        }

        ctx.publish(Update::new().set(keys::drawing_recognised(role), true));
        ctx.status(format!("{role} countered with '{label}'"));
        self.last_validated = Some(role.clone());

        if self.sync.check_dual_validation(role, true) {
            return Ok(Transition::Goto(BattlePhase::Hit));
        }
        Ok(Transition::Stay)
    }

    /// Validations from the other station arrive as broadcast flags.
    fn on_remote_flags(
        &mut self,
        update: &serde_json::Map<String, serde_json::Value>,
    ) -> Transition<BattlePhase> {
        let mut fire = false;
        for (key, value) in update {
            let Some(role) = keys::parse_drawing_recognised(key) else {
                continue;
            };
            if !self.sync.roles().contains(&role) {
                continue;
            }
            let flag = value.as_bool().unwrap_or(false);
            let previous = self.remote_flags.insert(role.clone(), flag).unwrap_or(false);
            // Only a rising edge counts; full-state echoes repeat old flags
            if flag && !previous {
                self.last_validated.get_or_insert_with(|| role.clone());
                fire |= self.sync.check_dual_validation(&role, true);
            }
        }
        if fire {
            Transition::Goto(BattlePhase::Hit)
        } else {
            Transition::Stay
        }
    }

    /// Rate-limited hand-off of a camera frame to the generation pipeline.
    pub fn process_client_frame(&mut self, role: &Role, image: &[u8], ctx: &mut Context<'_>) {
        if !self.sync.roles().contains(role) {
            ctx.status(format!("ignoring frame for unknown role '{role}'"));
            return;
        }
        if !self
            .sync
            .can_generate(role, ctx.now(), self.config.generation_cooldown)
        {
            return;
        }
        let prompt = self
            .current_attack()
            .map(|a| a.prompt.clone())
            .unwrap_or_default();
        self.sync.begin_generation(role, ctx.now());
        ctx.generate(role.clone(), image.to_vec(), prompt);
    }

    fn on_generation_finished(
        &mut self,
        phase: BattlePhase,
        role: &Role,
        epoch: u64,
        image: &Option<Vec<u8>>,
        ctx: &mut Context<'_>,
    ) {
        let current = phase == BattlePhase::Fighting && epoch == ctx.epoch();
        match (current, image) {
            (true, Some(image)) => self.sync.finish_generation(role, Some(image.clone())),
            (true, None) => {
                self.sync.finish_generation(role, None);
                ctx.status(format!("generation for {role} failed, skipping frame"));
            }
            (false, _) => {
                self.sync.finish_generation(role, None);
                ctx.status(format!("discarding generation for {role} from an earlier phase"));
            }
        }
    }

    fn on_cage(&mut self, uid: &str, reader: &str, ctx: &mut Context<'_>) -> Transition<BattlePhase> {
        let Some(role) = Role::new(reader)
            .ok()
            .filter(|r| self.sync.roles().contains(r))
        else {
            ctx.status(format!("tag {uid} read on unmapped reader '{reader}'"));
            return Transition::Stay;
        };
        if !self.config.cage_uids.is_empty() && !self.config.cage_uids.iter().any(|u| u == uid) {
            ctx.status(format!("tag {uid} is not a cage"));
            return Transition::Stay;
        }
        if self.caged.insert(role.clone()) {
            ctx.status(format!("{role} cage closed"));
        }
        if self.caged.len() == 2 {
            Transition::Goto(BattlePhase::Captured)
        } else {
            Transition::Stay
        }
    }
}

impl Workshop for BattleWorkshop {
    type Phase = BattlePhase;

    fn name(&self) -> &'static str {
        "battle"
    }

    fn initial_phase(&self) -> BattlePhase {
        BattlePhase::Idle
    }

    fn enter(
        &mut self,
        phase: BattlePhase,
        ctx: &mut Context<'_>,
    ) -> Result<Transition<BattlePhase>, DomainError> {
        let mut update = Update::new().set(keys::BATTLE_STATE, phase.as_str());

        match phase {
            BattlePhase::Idle => {
                ctx.publish(update);
                if self.start_condition_met(ctx) {
                    return Ok(Transition::Goto(BattlePhase::Appearing));
                }
            }
            BattlePhase::Appearing => {
                self.hp = self.config.initial_hp;
                update.insert(keys::BATTLE_BOSS_HP, self.hp);
                ctx.publish(update);
                ctx.start_timer(APPEAR_TIMER, self.config.appear_duration);
            }
            BattlePhase::Fighting => {
                self.sync.reset();
                self.last_validated = None;
                self.remote_flags.clear();

                let index = self.next_attack % self.config.attacks.len();
                self.next_attack = self.next_attack.wrapping_add(1);
                self.current_attack = Some(index);
                let attack = self.require_attack()?.clone();

                update.insert(keys::BATTLE_BOSS_HP, self.hp);
                update.insert(keys::BATTLE_BOSS_ATTACK, attack.name.as_str());
                update.insert(keys::BATTLE_HIT_CONFIRMED, false);
                for role in self.config.roles.iter() {
                    update.insert(keys::drawing_recognised(role), false);
                }
                ctx.publish(update);
                ctx.status(format!(
                    "boss attacks with {}, draw {} to counter",
                    attack.name, attack.counter
                ));
            }
            BattlePhase::Hit => {
                self.hp = self.hp.saturating_sub(1);
                update.insert(keys::BATTLE_BOSS_HP, self.hp);
                update.insert(keys::BATTLE_HIT_CONFIRMED, true);
                ctx.publish(update);

                let role = self
                    .last_validated
                    .clone()
                    .unwrap_or_else(|| self.config.roles.first().clone());
                let image = self.sync.get_best_image(&role, None);
                ctx.showcase(role, image);
                ctx.start_timer(HIT_TIMER, self.config.hit_duration);
            }
            BattlePhase::Weakened => {
                self.caged.clear();
                ctx.publish(update);
                ctx.status("boss weakened, close both cages");
            }
            BattlePhase::Captured => {
                ctx.publish(update);
                ctx.start_timer(CAPTURED_TIMER, self.config.captured_duration);
            }
            BattlePhase::Done => {
                ctx.publish(update);
                ctx.status("battle complete");
            }
        }
        Ok(Transition::Stay)
    }

    fn handle(
        &mut self,
        phase: BattlePhase,
        event: &WorkshopEvent,
        ctx: &mut Context<'_>,
    ) -> Result<Transition<BattlePhase>, DomainError> {
        use BattlePhase::*;

        // Completions are accepted in every phase so the processing flag always clears
        if let WorkshopEvent::GenerationFinished { role, epoch, image } = event {
            self.on_generation_finished(phase, role, *epoch, image, ctx);
            return Ok(Transition::Stay);
        }

        let next = match (phase, event) {
            (Idle, WorkshopEvent::StateUpdate(_)) if self.start_condition_met(ctx) => {
                Transition::Goto(Appearing)
            }
            (Idle, WorkshopEvent::Button { role }) => {
                ctx.status(format!("manual start from {role}"));
                Transition::Goto(Appearing)
            }
            (Appearing, WorkshopEvent::TimerElapsed(t)) if t.name == APPEAR_TIMER => {
                Transition::Goto(Fighting)
            }
            (Fighting, WorkshopEvent::Recognition { role, label, distance }) => {
                self.on_recognition(role, label, *distance, ctx)?
            }
            (Fighting, WorkshopEvent::StateUpdate(update)) => self.on_remote_flags(update),
            (Fighting, WorkshopEvent::ClientFrame { role, image }) => {
                self.process_client_frame(role, image, ctx);
                Transition::Stay
            }
            (Hit, WorkshopEvent::TimerElapsed(t)) if t.name == HIT_TIMER => {
                if self.hp == 0 {
                    Transition::Goto(Weakened)
                } else {
                    Transition::Goto(Fighting)
                }
            }
            (Weakened, WorkshopEvent::Rfid { uid, reader }) => self.on_cage(uid, reader, ctx),
            (Captured, WorkshopEvent::TimerElapsed(t)) if t.name == CAPTURED_TIMER => {
                Transition::Goto(Done)
            }
            _ => Transition::Stay,
        };
        Ok(next)
    }

    fn reset(&mut self) {
        self.sync.reset_all();
        self.hp = 0;
        self.next_attack = 0;
        self.current_attack = None;
        self.last_validated = None;
        self.remote_flags.clear();
        self.caged.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Effect, Timer};
    use crate::game_state::SharedGameState;
    use crate::machine::{Outcome, StateMachine};
    use serde_json::{json, Map, Value};
    use std::time::Instant;

    fn dream() -> Role {
        Role::new("dream").unwrap()
    }

    fn nightmare() -> Role {
        Role::new("nightmare").unwrap()
    }

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    /// Test harness mirroring the runtime: merges inbound and published fields.
    struct Harness {
        machine: StateMachine<BattleWorkshop>,
        state: SharedGameState,
        now: Instant,
        effects: Vec<Effect>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(BattleConfig::default())
        }

        fn with_config(config: BattleConfig) -> Self {
            let mut h = Self {
                machine: StateMachine::new(BattleWorkshop::new(config).unwrap()),
                state: SharedGameState::new(),
                now: Instant::now(),
                effects: Vec::new(),
            };
            let d = h.machine.start(&h.state, h.now);
            h.absorb(d.effects);
            h
        }

        fn absorb(&mut self, effects: Vec<Effect>) {
            for effect in &effects {
                if let Effect::Publish(update) = effect {
                    self.state.merge(update);
                }
            }
            self.effects = effects;
        }

        fn send(&mut self, event: WorkshopEvent) -> Outcome {
            if let WorkshopEvent::StateUpdate(update) = &event {
                self.state.merge(update);
            }
            let d = self.machine.dispatch(&event, &self.state, self.now);
            self.absorb(d.effects);
            d.outcome
        }

        fn inbound(&mut self, value: Value) -> Outcome {
            self.send(WorkshopEvent::StateUpdate(obj(value)))
        }

        fn fire(&mut self, name: &'static str) -> Outcome {
            let epoch = self.machine.epoch();
            self.send(WorkshopEvent::TimerElapsed(Timer { name, epoch }))
        }

        fn phase(&self) -> BattlePhase {
            self.machine.phase()
        }

        fn workshop(&self) -> &BattleWorkshop {
            self.machine.workshop()
        }

        fn counter(&self) -> String {
            self.workshop().current_attack().unwrap().counter.clone()
        }

        fn recognise(&mut self, role: Role, label: &str, distance: f32) -> Outcome {
            self.send(WorkshopEvent::Recognition {
                role,
                label: label.to_string(),
                distance,
            })
        }

        /// Drive Idle -> Appearing -> Fighting.
        fn into_fight(&mut self) {
            self.inbound(json!({"rift_part_count": 4}));
            self.fire(APPEAR_TIMER);
            assert_eq!(self.phase(), BattlePhase::Fighting);
        }

        fn both_counter(&mut self) {
            let counter = self.counter();
            self.recognise(dream(), &counter, 0.1);
            self.recognise(nightmare(), &counter, 0.1);
        }

        fn generations(&self) -> usize {
            self.effects
                .iter()
                .filter(|e| matches!(e, Effect::Generate(_)))
                .count()
        }
    }

    #[test]
    fn starts_idle_and_publishes_state() {
        let h = Harness::new();
        assert_eq!(h.phase(), BattlePhase::Idle);
        assert_eq!(h.state.battle_state(), Some(BattlePhase::Idle));
    }

    #[test]
    fn rift_parts_wake_the_boss_then_fight_begins() {
        let mut h = Harness::new();
        h.inbound(json!({"rift_part_count": 3}));
        assert_eq!(h.phase(), BattlePhase::Idle);

        h.inbound(json!({"rift_part_count": 4}));
        assert_eq!(h.phase(), BattlePhase::Appearing);
        assert!(h.effects.iter().any(|e| matches!(
            e,
            Effect::StartTimer { timer, after } if timer.name == APPEAR_TIMER && *after == Duration::from_secs(10)
        )));

        h.fire(APPEAR_TIMER);
        assert_eq!(h.phase(), BattlePhase::Fighting);
        assert_eq!(h.workshop().hp(), 3);
        assert!(h.workshop().current_attack().is_some());
        assert_eq!(h.state.battle_boss_hp(), Some(3));
        assert_eq!(h.state.battle_boss_attack(), Some("fire"));
    }

    #[test]
    fn operator_button_starts_the_battle() {
        let mut h = Harness::new();
        h.send(WorkshopEvent::Button { role: dream() });
        assert_eq!(h.phase(), BattlePhase::Appearing);
    }

    #[test]
    fn dual_validation_fires_once_and_hits() {
        let mut h = Harness::new();
        h.into_fight();
        let counter = h.counter();

        h.recognise(dream(), &counter, 0.2);
        assert_eq!(h.phase(), BattlePhase::Fighting);
        assert_eq!(h.state.drawing_recognised(&dream()), Some(true));

        h.recognise(nightmare(), &counter, 0.2);
        assert_eq!(h.phase(), BattlePhase::Hit);
        assert!(h.workshop().sync().is_latched());

        // A third validation in the same phase does not trigger again
        h.recognise(dream(), &counter, 0.2);
        assert_eq!(h.phase(), BattlePhase::Hit);
    }

    #[test]
    fn wrong_or_distant_drawings_do_not_count() {
        let mut h = Harness::new();
        h.into_fight();
        let counter = h.counter();

        h.recognise(dream(), "banana", 0.1);
        h.recognise(nightmare(), &counter, 0.1);
        assert_eq!(h.phase(), BattlePhase::Fighting);

        h.recognise(dream(), &counter, 0.9);
        assert_eq!(h.phase(), BattlePhase::Fighting);

        h.recognise(dream(), &counter.to_uppercase(), 0.5);
        assert_eq!(h.phase(), BattlePhase::Hit);
    }

    #[test]
    fn hit_decrements_hp_by_exactly_one() {
        let mut h = Harness::new();
        h.into_fight();
        h.both_counter();

        assert_eq!(h.phase(), BattlePhase::Hit);
        assert_eq!(h.workshop().hp(), 2);
        assert_eq!(h.state.battle_boss_hp(), Some(2));
        assert_eq!(h.state.battle_hit_confirmed(), Some(true));

        h.fire(HIT_TIMER);
        assert_eq!(h.phase(), BattlePhase::Fighting);
        assert_eq!(h.workshop().hp(), 2);
        // The boss switches to the next attack
        assert_eq!(h.state.battle_boss_attack(), Some("shadow"));
        assert_eq!(h.state.battle_hit_confirmed(), Some(false));
    }

    #[test]
    fn last_hit_weakens_the_boss() {
        let mut h = Harness::new();
        h.into_fight();
        for expected_hp in [2, 1] {
            h.both_counter();
            assert_eq!(h.workshop().hp(), expected_hp);
            h.fire(HIT_TIMER);
            assert_eq!(h.phase(), BattlePhase::Fighting);
        }
        h.both_counter();
        assert_eq!(h.workshop().hp(), 0);
        h.fire(HIT_TIMER);
        assert_eq!(h.phase(), BattlePhase::Weakened);
    }

    #[test]
    fn both_cages_capture_the_boss() {
        let config = BattleConfig {
            initial_hp: 1,
            cage_uids: vec!["CAGE-1".into(), "CAGE-2".into()],
            ..BattleConfig::default()
        };
        let mut h = Harness::with_config(config);
        h.into_fight();
        h.both_counter();
        h.fire(HIT_TIMER);
        assert_eq!(h.phase(), BattlePhase::Weakened);

        let rfid = |uid: &str, reader: &str| WorkshopEvent::Rfid {
            uid: uid.to_string(),
            reader: reader.to_string(),
        };
        h.send(rfid("CAGE-1", "dream"));
        h.send(rfid("CAGE-1", "dream"));
        h.send(rfid("NOT-A-CAGE", "nightmare"));
        h.send(rfid("CAGE-2", "kitchen"));
        assert_eq!(h.phase(), BattlePhase::Weakened);

        h.send(rfid("CAGE-2", "nightmare"));
        assert_eq!(h.phase(), BattlePhase::Captured);
        h.fire(CAPTURED_TIMER);
        assert_eq!(h.phase(), BattlePhase::Done);
        assert!(h.phase().is_terminal());
        assert_eq!(h.state.battle_state(), Some(BattlePhase::Done));
    }

    #[test]
    fn remote_validation_arrives_by_broadcast() {
        let mut h = Harness::new();
        h.into_fight();
        let counter = h.counter();

        h.recognise(dream(), &counter, 0.1);
        h.inbound(json!({"battle_drawing_nightmare_recognised": true}));
        assert_eq!(h.phase(), BattlePhase::Hit);
    }

    #[test]
    fn echoed_remote_flags_only_count_on_rising_edge() {
        let mut h = Harness::new();
        h.into_fight();

        h.inbound(json!({"battle_drawing_nightmare_recognised": true}));
        h.inbound(json!({"battle_drawing_nightmare_recognised": true}));
        assert_eq!(h.phase(), BattlePhase::Fighting);
        assert!(!h.workshop().sync().is_latched());

        let counter = h.counter();
        h.recognise(dream(), &counter, 0.1);
        assert_eq!(h.phase(), BattlePhase::Hit);
    }

    #[test]
    fn client_frames_are_rate_limited_per_role() {
        let mut h = Harness::new();
        h.into_fight();

        h.send(WorkshopEvent::ClientFrame { role: dream(), image: vec![1] });
        assert_eq!(h.generations(), 1);

        // Same role inside the cooldown: nothing, even after the first completes
        let epoch = h.machine.epoch();
        h.send(WorkshopEvent::GenerationFinished { role: dream(), epoch, image: Some(vec![7]) });
        h.now += Duration::from_millis(1500);
        h.send(WorkshopEvent::ClientFrame { role: dream(), image: vec![2] });
        assert_eq!(h.generations(), 0);

        // Other role is independent
        h.send(WorkshopEvent::ClientFrame { role: nightmare(), image: vec![3] });
        assert_eq!(h.generations(), 1);

        h.now += Duration::from_millis(600);
        h.send(WorkshopEvent::ClientFrame { role: dream(), image: vec![4] });
        assert_eq!(h.generations(), 1);
    }

    #[test]
    fn in_flight_generation_blocks_new_requests() {
        let mut h = Harness::new();
        h.into_fight();
        h.send(WorkshopEvent::ClientFrame { role: dream(), image: vec![1] });
        h.now += Duration::from_secs(10);
        h.send(WorkshopEvent::ClientFrame { role: dream(), image: vec![2] });
        assert_eq!(h.generations(), 0);
    }

    #[test]
    fn generated_art_drives_the_hit_showcase() {
        let mut h = Harness::new();
        h.into_fight();
        h.send(WorkshopEvent::ClientFrame { role: nightmare(), image: vec![1] });
        let epoch = h.machine.epoch();
        h.send(WorkshopEvent::GenerationFinished {
            role: nightmare(),
            epoch,
            image: Some(vec![42]),
        });

        // Dream validates last but has no art: falls back to nightmare's
        let counter = h.counter();
        h.recognise(nightmare(), &counter, 0.1);
        h.recognise(dream(), &counter, 0.1);
        assert!(h.effects.contains(&Effect::Showcase {
            role: dream(),
            image: Some(vec![42]),
        }));
    }

    #[test]
    fn late_generation_results_are_discarded() {
        let mut h = Harness::new();
        h.into_fight();
        h.send(WorkshopEvent::ClientFrame { role: dream(), image: vec![1] });
        let stale_epoch = h.machine.epoch();
        h.both_counter();
        h.fire(HIT_TIMER);

        h.send(WorkshopEvent::GenerationFinished {
            role: dream(),
            epoch: stale_epoch,
            image: Some(vec![9]),
        });
        let state = h.workshop().sync().state(&dream()).unwrap();
        assert!(!state.processing);
        assert!(state.cached_image.is_none());
    }

    #[test]
    fn stale_phase_timer_is_ignored() {
        let mut h = Harness::new();
        h.into_fight();
        h.both_counter();
        let hit_epoch = h.machine.epoch();
        h.fire(HIT_TIMER);
        assert_eq!(h.phase(), BattlePhase::Fighting);

        let outcome = h.send(WorkshopEvent::TimerElapsed(Timer {
            name: HIT_TIMER,
            epoch: hit_epoch,
        }));
        assert_eq!(outcome, Outcome::Stale);
        assert_eq!(h.phase(), BattlePhase::Fighting);
    }

    #[test]
    fn reset_system_returns_to_idle_from_any_phase() {
        let mut h = Harness::new();
        h.into_fight();
        let counter = h.counter();
        h.recognise(dream(), &counter, 0.1);
        assert!(h.workshop().sync().state(&dream()).unwrap().validated);

        // The runtime clears the shared document before dispatching a reset
        h.state.clear();
        h.inbound(json!({"reset_system": true}));
        assert_eq!(h.phase(), BattlePhase::Idle);
        for role in [dream(), nightmare()] {
            assert!(!h.workshop().sync().state(&role).unwrap().validated);
        }
        assert_eq!(h.workshop().hp(), 0);
        assert!(!h.workshop().sync().is_latched());
    }

    /// Drive a one-hp battle into `target`, returning the timer pending there (if any).
    fn drive_to(h: &mut Harness, target: BattlePhase) -> Option<&'static str> {
        let steps: [(BattlePhase, Option<&'static str>); 7] = [
            (BattlePhase::Idle, None),
            (BattlePhase::Appearing, Some(APPEAR_TIMER)),
            (BattlePhase::Fighting, None),
            (BattlePhase::Hit, Some(HIT_TIMER)),
            (BattlePhase::Weakened, None),
            (BattlePhase::Captured, Some(CAPTURED_TIMER)),
            (BattlePhase::Done, None),
        ];
        for (phase, pending) in steps {
            if h.phase() == target {
                return pending;
            }
            assert_eq!(h.phase(), phase);
            match phase {
                BattlePhase::Idle => {
                    h.inbound(json!({"rift_part_count": 4}));
                }
                BattlePhase::Appearing => {
                    h.fire(APPEAR_TIMER);
                }
                BattlePhase::Fighting => {
                    h.both_counter();
                }
                BattlePhase::Hit => {
                    h.fire(HIT_TIMER);
                }
                BattlePhase::Weakened => {
                    for reader in ["dream", "nightmare"] {
                        h.send(WorkshopEvent::Rfid {
                            uid: format!("CAGE-{reader}"),
                            reader: reader.to_string(),
                        });
                    }
                }
                BattlePhase::Captured => {
                    h.fire(CAPTURED_TIMER);
                }
                BattlePhase::Done => {}
            }
        }
        assert_eq!(h.phase(), target);
        None
    }

    #[test]
    fn reset_system_from_every_phase_drops_pending_timers() {
        let phases = [
            BattlePhase::Idle,
            BattlePhase::Appearing,
            BattlePhase::Fighting,
            BattlePhase::Hit,
            BattlePhase::Weakened,
            BattlePhase::Captured,
            BattlePhase::Done,
        ];
        for target in phases {
            let mut h = Harness::with_config(BattleConfig {
                initial_hp: 1,
                ..BattleConfig::default()
            });
            let pending = drive_to(&mut h, target);
            assert_eq!(h.phase(), target);
            let epoch_before = h.machine.epoch();

            h.state.clear();
            let outcome = h.inbound(json!({"reset_system": true}));

            assert_eq!(outcome, Outcome::Handled, "reset from {target}");
            assert_eq!(h.phase(), BattlePhase::Idle, "reset from {target}");
            assert_eq!(h.state.battle_state(), Some(BattlePhase::Idle));
            assert_eq!(h.workshop().hp(), 0);
            assert!(h.workshop().current_attack().is_none());
            assert!(h.workshop().caged().is_empty());
            assert!(!h.workshop().sync().is_latched(), "reset from {target}");
            for role in [dream(), nightmare()] {
                let state = h.workshop().sync().state(&role).unwrap();
                assert!(!state.validated, "{role} still validated after reset from {target}");
            }

            // The timer started before the reset fires late and is ignored
            let late = Timer {
                name: pending.unwrap_or(APPEAR_TIMER),
                epoch: epoch_before,
            };
            assert_eq!(h.send(WorkshopEvent::TimerElapsed(late)), Outcome::Stale);
            assert_eq!(h.phase(), BattlePhase::Idle);
        }
    }

    #[test]
    fn config_validation() {
        let empty = BattleConfig {
            attacks: Vec::new(),
            ..BattleConfig::default()
        };
        assert!(BattleWorkshop::new(empty).is_err());

        let no_hp = BattleConfig {
            initial_hp: 0,
            ..BattleConfig::default()
        };
        assert!(BattleWorkshop::new(no_hp).is_err());
    }

    #[test]
    fn phase_wire_names() {
        assert_eq!(serde_json::to_value(BattlePhase::Weakened).unwrap(), json!("weakened"));
        assert_eq!(
            serde_json::from_value::<BattlePhase>(json!("captured")).unwrap(),
            BattlePhase::Captured
        );
    }
}
