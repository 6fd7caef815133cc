//! Player roles and per-role state
//!
//! A workshop always has exactly two symmetric roles ("dream"/"nightmare",
//! "parent"/"child", ...). Each role carries its own recognition result,
//! validation flag, cached artwork and generation rate-limit timestamp.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A player role name.
///
/// Role names are lowercase ASCII so they can be embedded in broadcast keys
/// such as `battle_drawing_dream_recognised`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub fn new(name: impl AsRef<str>) -> Result<Self, DomainError> {
        let name = name.as_ref().trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(DomainError::validation("role name cannot be empty"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(DomainError::validation(format!(
                "role name '{name}' may only contain letters, digits and '-'"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// The two roles of a workshop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePair {
    first: Role,
    second: Role,
}

impl RolePair {
    pub fn new(first: Role, second: Role) -> Result<Self, DomainError> {
        if first == second {
            return Err(DomainError::validation(format!(
                "a workshop needs two distinct roles, got '{first}' twice"
            )));
        }
        Ok(Self { first, second })
    }

    /// Parse a comma separated pair such as `"dream,nightmare"`.
    pub fn parse(list: &str) -> Result<Self, DomainError> {
        let names: Vec<&str> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        match names.as_slice() {
            [first, second] => Self::new(Role::new(first)?, Role::new(second)?),
            _ => Err(DomainError::parse(format!(
                "expected exactly two comma separated roles, got '{list}'"
            ))),
        }
    }

    pub fn first(&self) -> &Role {
        &self.first
    }

    pub fn second(&self) -> &Role {
        &self.second
    }

    pub fn contains(&self, role: &Role) -> bool {
        self.first == *role || self.second == *role
    }

    /// The partner of `role`, or `None` if `role` is not part of the pair.
    pub fn other(&self, role: &Role) -> Option<&Role> {
        if *role == self.first {
            Some(&self.second)
        } else if *role == self.second {
            Some(&self.first)
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Role> {
        [&self.first, &self.second].into_iter()
    }
}

impl Default for RolePair {
    fn default() -> Self {
        Self {
            first: Role("dream".to_string()),
            second: Role("nightmare".to_string()),
        }
    }
}

/// Mutable state tracked for one role during a workshop.
#[derive(Debug, Clone, Default)]
pub struct RoleState {
    /// Last recognized drawing label
    pub label: Option<String>,
    /// Distance of the last recognition (lower is a closer match)
    pub distance: Option<f32>,
    /// A generation request for this role is in flight
    pub processing: bool,
    /// The role produced a valid counter in the current phase
    pub validated: bool,
    /// Most recent generated artwork for this role
    pub cached_image: Option<Vec<u8>>,
    /// When the last generation request was issued
    pub last_generation: Option<Instant>,
}

impl RoleState {
    /// Clear the per-phase flags. Cached artwork and the rate-limit stamp survive.
    pub fn reset_phase(&mut self) {
        self.label = None;
        self.distance = None;
        self.validated = false;
    }

    /// Clear everything (operator reset).
    pub fn reset_all(&mut self) {
        *self = Self::default();
    }

    /// True when no generation is in flight and the cooldown has elapsed.
    pub fn can_generate(&self, now: Instant, cooldown: Duration) -> bool {
        if self.processing {
            return false;
        }
        match self.last_generation {
            Some(last) => now.saturating_duration_since(last) >= cooldown,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_names_are_normalized() {
        let role = Role::new("  Dream ").unwrap();
        assert_eq!(role.as_str(), "dream");
    }

    #[test]
    fn role_rejects_key_breaking_characters() {
        assert!(Role::new("").is_err());
        assert!(Role::new("dream_team").is_err());
        assert!(Role::new("a b").is_err());
    }

    #[test]
    fn pair_parse_and_other() {
        let pair = RolePair::parse("parent, child").unwrap();
        let parent = Role::new("parent").unwrap();
        let child = Role::new("child").unwrap();
        assert_eq!(pair.other(&parent), Some(&child));
        assert_eq!(pair.other(&child), Some(&parent));
        assert_eq!(pair.other(&Role::new("ghost").unwrap()), None);
    }

    #[test]
    fn pair_rejects_duplicates_and_wrong_arity() {
        assert!(RolePair::parse("dream,dream").is_err());
        assert!(RolePair::parse("dream").is_err());
        assert!(RolePair::parse("a,b,c").is_err());
    }

    #[test]
    fn reset_phase_keeps_cache_and_stamp() {
        let now = Instant::now();
        let mut state = RoleState {
            label: Some("sword".into()),
            distance: Some(0.2),
            processing: false,
            validated: true,
            cached_image: Some(vec![1, 2, 3]),
            last_generation: Some(now),
        };
        state.reset_phase();
        assert!(!state.validated);
        assert!(state.label.is_none());
        assert_eq!(state.cached_image, Some(vec![1, 2, 3]));
        assert_eq!(state.last_generation, Some(now));

        state.reset_all();
        assert!(state.cached_image.is_none());
        assert!(state.last_generation.is_none());
    }

    #[test]
    fn cooldown_gate() {
        let start = Instant::now();
        let cooldown = Duration::from_secs(2);
        let mut state = RoleState::default();
        assert!(state.can_generate(start, cooldown));

        state.last_generation = Some(start);
        assert!(!state.can_generate(start + Duration::from_millis(1999), cooldown));
        assert!(state.can_generate(start + cooldown, cooldown));

        state.processing = true;
        assert!(!state.can_generate(start + Duration::from_secs(10), cooldown));
    }
}
