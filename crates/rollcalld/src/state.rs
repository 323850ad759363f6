//! Per-(person, class, day) attendance state machine.
//!
//! The backend owns the truth; the kiosk derives today's state by
//! replaying chronologically ordered actions with the same walk the
//! server uses, caches it per (user, class), and advances the cached
//! value locally on every confirmed write so offline sequences chain.

use rollcall_client::{AttendanceAction, AttendanceStateDto, BackendClient, ClientError};
use std::collections::HashMap;

/// Where a person stands in today's session for one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttendanceState {
    #[default]
    NotEntered,
    Present,
    OnBreak,
    Exited,
}

/// Transition table. `None` means the action is illegal in this state.
///
/// ENTRY from Exited is the same-day re-entry path and resets the
/// break/exit cycle.
pub fn apply(state: AttendanceState, action: AttendanceAction) -> Option<AttendanceState> {
    use AttendanceAction::*;
    use AttendanceState::*;
    match (state, action) {
        (NotEntered, Entry) | (Exited, Entry) => Some(Present),
        (Present, BreakOut) => Some(OnBreak),
        (OnBreak, BreakIn) => Some(Present),
        (Present, Exit) => Some(Exited),
        _ => None,
    }
}

/// Actions legal from `state`. Never empty.
pub fn allowed_actions(state: AttendanceState) -> Vec<AttendanceAction> {
    use AttendanceAction::*;
    match state {
        AttendanceState::NotEntered | AttendanceState::Exited => vec![Entry],
        AttendanceState::Present => vec![BreakOut, Exit],
        AttendanceState::OnBreak => vec![BreakIn],
    }
}

/// Derive state by replaying today's ordered actions. Actions illegal
/// at their position (a BREAK outside an active session, a duplicate
/// ENTRY) are skipped, mirroring the server's walk.
pub fn replay(actions: &[AttendanceAction]) -> AttendanceState {
    let mut state = AttendanceState::NotEntered;
    for &action in actions {
        if let Some(next) = apply(state, action) {
            state = next;
        }
    }
    state
}

/// Collapse the backend's state DTO to the local enum.
pub fn from_dto(dto: &AttendanceStateDto) -> AttendanceState {
    if dto.is_on_break {
        AttendanceState::OnBreak
    } else if dto.has_entered && !dto.has_exited {
        AttendanceState::Present
    } else if dto.has_exited {
        AttendanceState::Exited
    } else {
        AttendanceState::NotEntered
    }
}

/// Backend seam for state fetches, so the tracker is testable without
/// a server.
pub trait StateApi {
    fn fetch_state(&self, user_id: u64, class_id: u64) -> Result<AttendanceStateDto, ClientError>;
}

impl StateApi for BackendClient {
    fn fetch_state(&self, user_id: u64, class_id: u64) -> Result<AttendanceStateDto, ClientError> {
        self.attendance_state(user_id, class_id)
    }
}

/// Per-session cache of attendance states keyed by (user, class).
#[derive(Default)]
pub struct StateTracker {
    cache: HashMap<(u64, u64), AttendanceState>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state for (user, class). Cached value wins; otherwise
    /// fetch from the backend. Fetch failure defaults to NotEntered
    /// (ENTRY allowed) without caching, so the next cycle retries.
    pub fn current<A: StateApi>(&mut self, api: &A, user_id: u64, class_id: u64) -> AttendanceState {
        if let Some(&state) = self.cache.get(&(user_id, class_id)) {
            return state;
        }

        match api.fetch_state(user_id, class_id) {
            Ok(dto) => {
                let state = from_dto(&dto);
                self.cache.insert((user_id, class_id), state);
                state
            }
            Err(e) => {
                tracing::warn!(
                    user_id,
                    class_id,
                    error = %e,
                    "state fetch failed, defaulting to not-entered"
                );
                AttendanceState::NotEntered
            }
        }
    }

    /// Advance the cached state after a confirmed (submitted or queued)
    /// write, so consecutive offline actions chain correctly.
    pub fn apply_confirmed(&mut self, user_id: u64, class_id: u64, action: AttendanceAction) {
        let current = self
            .cache
            .get(&(user_id, class_id))
            .copied()
            .unwrap_or_default();
        if let Some(next) = apply(current, action) {
            self.cache.insert((user_id, class_id), next);
        } else {
            tracing::debug!(
                user_id,
                class_id,
                action = action.label(),
                "confirmed action does not advance cached state"
            );
        }
    }

    /// Drop everything. Called when the active class changes and at
    /// day rollover.
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AttendanceAction::*;
    use AttendanceState::*;

    struct StubApi {
        result: Result<AttendanceStateDto, ()>,
    }

    impl StateApi for StubApi {
        fn fetch_state(&self, _: u64, _: u64) -> Result<AttendanceStateDto, ClientError> {
            match &self.result {
                Ok(dto) => Ok(dto.clone()),
                Err(()) => Err(ClientError::Decode("stub failure".to_string())),
            }
        }
    }

    fn dto(entered: bool, on_break: bool, exited: bool) -> AttendanceStateDto {
        AttendanceStateDto {
            has_entered: entered,
            is_on_break: on_break,
            has_exited: exited,
            last_action: None,
            allowed_actions: vec![],
        }
    }

    #[test]
    fn test_fresh_person_may_only_enter() {
        assert_eq!(allowed_actions(NotEntered), vec![Entry]);
    }

    #[test]
    fn test_full_day_cycle_allows_reentry() {
        let state = replay(&[Entry, BreakOut, BreakIn, Exit]);
        assert_eq!(state, Exited);
        assert_eq!(allowed_actions(state), vec![Entry]);
    }

    #[test]
    fn test_break_in_without_break_out_rejected() {
        let state = replay(&[Entry]);
        assert_eq!(state, Present);
        assert_eq!(allowed_actions(state), vec![BreakOut, Exit]);
        assert!(apply(state, BreakIn).is_none());
    }

    #[test]
    fn test_replay_ignores_out_of_order_breaks() {
        // BREAK actions before any ENTRY never count.
        assert_eq!(replay(&[BreakOut, BreakIn, Entry]), Present);
        // EXIT closes the session; trailing breaks are ignored.
        assert_eq!(replay(&[Entry, Exit, BreakOut]), Exited);
    }

    #[test]
    fn test_reentry_resets_cycle() {
        let state = replay(&[Entry, Exit, Entry]);
        assert_eq!(state, Present);
        assert_eq!(allowed_actions(state), vec![BreakOut, Exit]);
    }

    #[test]
    fn test_allowed_actions_never_empty() {
        for state in [NotEntered, Present, OnBreak, Exited] {
            assert!(!allowed_actions(state).is_empty());
        }
    }

    #[test]
    fn test_soundness_over_valid_sequences() {
        // Any legal walk keeps allowed_actions consistent with apply.
        let walks: Vec<Vec<AttendanceAction>> = vec![
            vec![Entry],
            vec![Entry, BreakOut],
            vec![Entry, BreakOut, BreakIn, BreakOut, BreakIn, Exit],
            vec![Entry, Exit, Entry, BreakOut],
        ];
        for walk in walks {
            let mut state = NotEntered;
            for action in walk {
                assert!(allowed_actions(state).contains(&action));
                state = apply(state, action).unwrap();
            }
            assert!(!allowed_actions(state).is_empty());
        }
    }

    #[test]
    fn test_from_dto_precedence() {
        assert_eq!(from_dto(&dto(true, true, false)), OnBreak);
        assert_eq!(from_dto(&dto(true, false, false)), Present);
        assert_eq!(from_dto(&dto(true, false, true)), Exited);
        assert_eq!(from_dto(&dto(false, false, false)), NotEntered);
    }

    #[test]
    fn test_tracker_caches_fetched_state() {
        let mut tracker = StateTracker::new();
        let api = StubApi { result: Ok(dto(true, false, false)) };
        assert_eq!(tracker.current(&api, 1, 2), Present);

        // Cached now; a failing API must not change the answer.
        let failing = StubApi { result: Err(()) };
        assert_eq!(tracker.current(&failing, 1, 2), Present);
    }

    #[test]
    fn test_tracker_fetch_failure_defaults_and_retries() {
        let mut tracker = StateTracker::new();
        let failing = StubApi { result: Err(()) };
        assert_eq!(tracker.current(&failing, 1, 2), NotEntered);

        // Not cached on failure: a later successful fetch is used.
        let api = StubApi { result: Ok(dto(true, true, false)) };
        assert_eq!(tracker.current(&api, 1, 2), OnBreak);
    }

    #[test]
    fn test_tracker_advances_on_confirmed_write() {
        let mut tracker = StateTracker::new();
        let failing = StubApi { result: Err(()) };

        tracker.apply_confirmed(1, 2, Entry);
        assert_eq!(tracker.current(&failing, 1, 2), Present);
        tracker.apply_confirmed(1, 2, BreakOut);
        assert_eq!(tracker.current(&failing, 1, 2), OnBreak);

        // Illegal confirmation leaves the cache untouched.
        tracker.apply_confirmed(1, 2, Exit);
        assert_eq!(tracker.current(&failing, 1, 2), OnBreak);
    }

    #[test]
    fn test_tracker_clear_on_class_change() {
        let mut tracker = StateTracker::new();
        tracker.apply_confirmed(1, 2, Entry);
        tracker.clear();
        let failing = StubApi { result: Err(()) };
        assert_eq!(tracker.current(&failing, 1, 2), NotEntered);
    }
}
