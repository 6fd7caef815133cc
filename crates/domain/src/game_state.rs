//! The shared game document broadcast between every device.
//!
//! On the wire this is a flat JSON object. Here the keys this crate owns are
//! held in typed fields and everything else is kept in a passthrough bag, so
//! the document still round-trips keys added by other devices.
//!
//! # Merge semantics
//!
//! [`SharedGameState::merge`] always returns the *entire* accumulated
//! document, never a diff. Keys are never dropped by a merge; only
//! [`SharedGameState::clear`] (operator reset) removes them.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::battle::BattlePhase;
use crate::rift::RiftPhase;
use crate::role::Role;

/// Broadcast key vocabulary.
pub mod keys {
    use crate::role::Role;

    /// Sender identity, added to every outbound message. Never stored.
    pub const DEVICE_ID: &str = "device_id";
    /// Control flag forcing every workshop back to its initial phase. Never stored.
    pub const RESET_SYSTEM: &str = "reset_system";

    pub const BATTLE_STATE: &str = "battle_state";
    pub const BATTLE_BOSS_HP: &str = "battle_boss_hp";
    pub const BATTLE_BOSS_ATTACK: &str = "battle_boss_attack";
    pub const BATTLE_HIT_CONFIRMED: &str = "battle_hit_confirmed";

    pub const RIFT_STATE: &str = "rift_state";
    pub const RIFT_PART_COUNT: &str = "rift_part_count";

    const DRAWING_PREFIX: &str = "battle_drawing_";
    const DRAWING_SUFFIX: &str = "_recognised";

    /// `battle_drawing_<role>_recognised`
    pub fn drawing_recognised(role: &Role) -> String {
        format!("{DRAWING_PREFIX}{role}{DRAWING_SUFFIX}")
    }

    /// Extract the role from a `battle_drawing_<role>_recognised` key.
    ///
    /// Only canonical role names match, so every matching key is rebuilt
    /// byte for byte by [`drawing_recognised`].
    pub fn parse_drawing_recognised(key: &str) -> Option<Role> {
        let name = key
            .strip_prefix(DRAWING_PREFIX)?
            .strip_suffix(DRAWING_SUFFIX)?;
        Role::new(name).ok().filter(|role| role.as_str() == name)
    }
}

/// Builder for the fields a workshop wants to publish.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update(Map<String, Value>);

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Update {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Last-known cross-device game state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharedGameState {
    battle_state: Option<BattlePhase>,
    battle_boss_hp: Option<i64>,
    battle_boss_attack: Option<String>,
    battle_hit_confirmed: Option<bool>,
    drawing_recognised: BTreeMap<Role, bool>,
    rift_state: Option<RiftPhase>,
    rift_part_count: Option<u64>,
    /// Keys this device does not own, or known keys carrying an unexpected type
    passthrough: Map<String, Value>,
}

impl SharedGameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `update` and return the full accumulated document.
    pub fn merge(&mut self, update: &Map<String, Value>) -> Map<String, Value> {
        for (key, value) in update {
            self.merge_field(key, value.clone());
        }
        self.snapshot()
    }

    fn merge_field(&mut self, key: &str, value: Value) {
        let passthrough = &mut self.passthrough;
        match key {
            keys::DEVICE_ID | keys::RESET_SYSTEM => {}
            keys::BATTLE_STATE => assign(&mut self.battle_state, passthrough, key, value),
            keys::BATTLE_BOSS_HP => assign(&mut self.battle_boss_hp, passthrough, key, value),
            keys::BATTLE_BOSS_ATTACK => {
                assign(&mut self.battle_boss_attack, passthrough, key, value)
            }
            keys::BATTLE_HIT_CONFIRMED => {
                assign(&mut self.battle_hit_confirmed, passthrough, key, value)
            }
            keys::RIFT_STATE => assign(&mut self.rift_state, passthrough, key, value),
            keys::RIFT_PART_COUNT => assign(&mut self.rift_part_count, passthrough, key, value),
            _ => match keys::parse_drawing_recognised(key) {
                Some(role) => match value.as_bool() {
                    Some(flag) => {
                        self.drawing_recognised.insert(role, flag);
                        passthrough.remove(key);
                    }
                    None => {
                        self.drawing_recognised.remove(&role);
                        passthrough.insert(key.to_string(), value);
                    }
                },
                None => {
                    passthrough.insert(key.to_string(), value);
                }
            },
        }
    }

    /// The full document as it goes on the wire (without `device_id`).
    pub fn snapshot(&self) -> Map<String, Value> {
        let mut out = Map::new();
        if let Some(phase) = self.battle_state {
            out.insert(keys::BATTLE_STATE.into(), phase.as_str().into());
        }
        if let Some(hp) = self.battle_boss_hp {
            out.insert(keys::BATTLE_BOSS_HP.into(), hp.into());
        }
        if let Some(attack) = &self.battle_boss_attack {
            out.insert(keys::BATTLE_BOSS_ATTACK.into(), attack.clone().into());
        }
        if let Some(confirmed) = self.battle_hit_confirmed {
            out.insert(keys::BATTLE_HIT_CONFIRMED.into(), confirmed.into());
        }
        for (role, flag) in &self.drawing_recognised {
            out.insert(keys::drawing_recognised(role), (*flag).into());
        }
        if let Some(phase) = self.rift_state {
            out.insert(keys::RIFT_STATE.into(), phase.as_str().into());
        }
        if let Some(count) = self.rift_part_count {
            out.insert(keys::RIFT_PART_COUNT.into(), count.into());
        }
        for (key, value) in &self.passthrough {
            out.insert(key.clone(), value.clone());
        }
        out
    }

    /// Forget everything (operator reset).
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.snapshot().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.snapshot().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn battle_state(&self) -> Option<BattlePhase> {
        self.battle_state
    }

    pub fn battle_boss_hp(&self) -> Option<i64> {
        self.battle_boss_hp
    }

    pub fn battle_boss_attack(&self) -> Option<&str> {
        self.battle_boss_attack.as_deref()
    }

    pub fn battle_hit_confirmed(&self) -> Option<bool> {
        self.battle_hit_confirmed
    }

    pub fn drawing_recognised(&self, role: &Role) -> Option<bool> {
        self.drawing_recognised.get(role).copied()
    }

    pub fn rift_state(&self) -> Option<RiftPhase> {
        self.rift_state
    }

    pub fn rift_part_count(&self) -> Option<u64> {
        self.rift_part_count
    }
}

/// Store `value` in its typed slot, or keep it verbatim if the type does not match.
fn assign<T: DeserializeOwned>(
    slot: &mut Option<T>,
    passthrough: &mut Map<String, Value>,
    key: &str,
    value: Value,
) {
    match serde_json::from_value::<T>(value.clone()) {
        Ok(typed) => {
            *slot = Some(typed);
            passthrough.remove(key);
        }
        Err(_) => {
            *slot = None;
            passthrough.insert(key.to_string(), value);
        }
    }
}

/// Whether an inbound message asks for a full system reset.
pub fn is_reset_request(update: &Map<String, Value>) -> bool {
    update
        .get(keys::RESET_SYSTEM)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
