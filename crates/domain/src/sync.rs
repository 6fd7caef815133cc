//! Dual-role synchronization.
//!
//! Tracks both roles of a workshop and decides when "both sides are ready".
//! The dual-validation trigger latches so it fires at most once per phase;
//! only the owning workshop's phase-entry hook re-arms it via [`RoleSyncTracker::reset`].

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::role::{Role, RolePair, RoleState};

#[derive(Debug, Clone)]
pub struct RoleSyncTracker {
    roles: RolePair,
    states: BTreeMap<Role, RoleState>,
    attack_ready: bool,
}

impl RoleSyncTracker {
    pub fn new(roles: RolePair) -> Self {
        let states = roles
            .iter()
            .map(|role| (role.clone(), RoleState::default()))
            .collect();
        Self {
            roles,
            states,
            attack_ready: false,
        }
    }

    pub fn roles(&self) -> &RolePair {
        &self.roles
    }

    pub fn state(&self, role: &Role) -> Option<&RoleState> {
        self.states.get(role)
    }

    pub fn state_mut(&mut self, role: &Role) -> Option<&mut RoleState> {
        self.states.get_mut(role)
    }

    /// Whether the dual-validation trigger already fired in this phase.
    pub fn is_latched(&self) -> bool {
        self.attack_ready
    }

    /// Record a validation for `role` and report whether both roles are now ready.
    ///
    /// Returns `true` exactly once per phase: when `role`'s flag (or
    /// `just_validated`) and the other role's flag are both set. Every later
    /// call returns `false` until [`reset`](Self::reset). Unknown roles never trigger.
    pub fn check_dual_validation(&mut self, role: &Role, just_validated: bool) -> bool {
        if self.attack_ready {
            return false;
        }
        let Some(other) = self.roles.other(role).cloned() else {
            return false;
        };

        let current = match self.states.get_mut(role) {
            Some(state) => {
                if just_validated {
                    state.validated = true;
                }
                state.validated
            }
            None => return false,
        };
        let other_ready = self.states.get(&other).is_some_and(|s| s.validated);

        if current && other_ready {
            self.attack_ready = true;
            return true;
        }
        false
    }

    /// Pick the artwork that should drive the shared animation.
    ///
    /// Priority: `new_image` > cached image of `role` > cached image of the other role.
    pub fn get_best_image(&self, role: &Role, new_image: Option<Vec<u8>>) -> Option<Vec<u8>> {
        if new_image.is_some() {
            return new_image;
        }
        if let Some(image) = self.states.get(role).and_then(|s| s.cached_image.clone()) {
            return Some(image);
        }
        self.roles
            .other(role)
            .and_then(|other| self.states.get(other))
            .and_then(|s| s.cached_image.clone())
    }

    /// Rate-limit check for generation requests.
    pub fn can_generate(&self, role: &Role, now: Instant, cooldown: Duration) -> bool {
        self.states
            .get(role)
            .is_some_and(|s| s.can_generate(now, cooldown))
    }

    /// Mark a generation request as issued for `role`.
    pub fn begin_generation(&mut self, role: &Role, now: Instant) {
        if let Some(state) = self.states.get_mut(role) {
            state.processing = true;
            state.last_generation = Some(now);
        }
    }

    /// Clear the processing flag; cache the result if one is given.
    pub fn finish_generation(&mut self, role: &Role, image: Option<Vec<u8>>) {
        if let Some(state) = self.states.get_mut(role) {
            state.processing = false;
            if image.is_some() {
                state.cached_image = image;
            }
        }
    }

    /// Phase-entry reset: clears validation flags and re-arms the latch.
    pub fn reset(&mut self) {
        self.attack_ready = false;
        for state in self.states.values_mut() {
            state.reset_phase();
        }
    }

    /// Operator reset: clears everything including cached artwork.
    pub fn reset_all(&mut self) {
        self.attack_ready = false;
        for state in self.states.values_mut() {
            state.reset_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (RoleSyncTracker, Role, Role) {
        let dream = Role::new("dream").unwrap();
        let nightmare = Role::new("nightmare").unwrap();
        let pair = RolePair::new(dream.clone(), nightmare.clone()).unwrap();
        (RoleSyncTracker::new(pair), dream, nightmare)
    }

    #[test]
    fn dual_validation_fires_once_when_both_validate() {
        let (mut sync, dream, nightmare) = tracker();

        assert!(!sync.check_dual_validation(&dream, true));
        assert!(sync.check_dual_validation(&nightmare, true));
        assert!(sync.is_latched());

        // Latched: repeated true inputs from either side stay false
        assert!(!sync.check_dual_validation(&dream, true));
        assert!(!sync.check_dual_validation(&nightmare, true));
    }

    #[test]
    fn dual_validation_uses_stored_flag_of_current_role() {
        let (mut sync, dream, nightmare) = tracker();

        assert!(!sync.check_dual_validation(&dream, true));
        // Nightmare was already validated earlier through its stored flag
        sync.state_mut(&nightmare).unwrap().validated = true;
        assert!(sync.check_dual_validation(&dream, false));
    }

    #[test]
    fn dual_validation_requires_both_sides() {
        let (mut sync, dream, nightmare) = tracker();
        assert!(!sync.check_dual_validation(&dream, true));
        assert!(!sync.check_dual_validation(&dream, true));
        assert!(!sync.check_dual_validation(&nightmare, false));
        assert!(!sync.is_latched());
    }

    #[test]
    fn reset_rearms_the_latch() {
        let (mut sync, dream, nightmare) = tracker();
        sync.check_dual_validation(&dream, true);
        assert!(sync.check_dual_validation(&nightmare, true));

        sync.reset();
        assert!(!sync.state(&dream).unwrap().validated);
        assert!(!sync.check_dual_validation(&dream, true));
        assert!(sync.check_dual_validation(&nightmare, true));
    }

    #[test]
    fn at_most_once_for_any_call_order() {
        let (mut sync, dream, nightmare) = tracker();
        let calls = [
            (&nightmare, false),
            (&dream, true),
            (&dream, true),
            (&nightmare, true),
            (&dream, false),
            (&nightmare, true),
        ];
        let fired = calls
            .iter()
            .filter(|(role, flag)| sync.check_dual_validation(role, *flag))
            .count();
        assert_eq!(fired, 1);
    }

    #[test]
    fn unknown_role_never_triggers() {
        let (mut sync, dream, _) = tracker();
        let ghost = Role::new("ghost").unwrap();
        sync.check_dual_validation(&dream, true);
        assert!(!sync.check_dual_validation(&ghost, true));
    }

    #[test]
    fn best_image_priority() {
        let (mut sync, dream, nightmare) = tracker();
        assert_eq!(sync.get_best_image(&dream, None), None);

        sync.finish_generation(&nightmare, Some(vec![2]));
        assert_eq!(sync.get_best_image(&dream, None), Some(vec![2]));

        sync.finish_generation(&dream, Some(vec![1]));
        assert_eq!(sync.get_best_image(&dream, None), Some(vec![1]));

        assert_eq!(sync.get_best_image(&dream, Some(vec![9])), Some(vec![9]));
    }

    #[test]
    fn generation_bookkeeping() {
        let (mut sync, dream, _) = tracker();
        let now = Instant::now();
        let cooldown = Duration::from_secs(2);

        assert!(sync.can_generate(&dream, now, cooldown));
        sync.begin_generation(&dream, now);
        assert!(sync.state(&dream).unwrap().processing);
        assert!(!sync.can_generate(&dream, now + Duration::from_secs(5), cooldown));

        sync.finish_generation(&dream, None);
        assert!(!sync.state(&dream).unwrap().processing);
        assert!(sync.can_generate(&dream, now + cooldown, cooldown));
    }
}
