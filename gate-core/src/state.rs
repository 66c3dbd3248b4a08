//! Control state and its transitions
//!
//! The state is never assigned field by field from the outside. Each change is
//! a transition that returns the next state together with the ledger record
//! describing it, so the ledger can always rebuild the state it mirrors.

use crate::types::{DenyReason, EntryKind, Gate, Integrity, LedgerEntry, Mode, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// In-memory gate/mode/integrity/estop snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlState {
    /// Gate position
    pub gate: Gate,
    /// Current mode
    pub mode: Mode,
    /// Integrity of the last evaluated event
    pub integrity: Integrity,
    /// Emergency stop engaged
    pub estop: bool,
    /// When the last state-changing event was processed
    pub last_event_time: Option<DateTime<Utc>>,
}

/// Next state plus the record that explains it
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// State after the transition
    pub next: ControlState,
    /// Ledger record to append
    pub record: Record,
}

impl Transition {
    fn new(next: ControlState, kind: EntryKind, payload: serde_json::Value) -> Self {
        Self {
            next,
            record: Record {
                kind,
                payload,
                state: Some(next),
            },
        }
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::safe_baseline()
    }
}

impl ControlState {
    /// Boot state: denied, holding, stopped, nothing evaluated yet
    pub fn safe_baseline() -> Self {
        Self {
            gate: Gate::Denied,
            mode: Mode::Hold,
            integrity: Integrity::Unknown,
            estop: true,
            last_event_time: None,
        }
    }

    /// True when no motion can be unlocked from this state
    pub fn is_safe(&self) -> bool {
        self.estop && self.gate == Gate::Denied && self.mode == Mode::Hold
    }

    /// Denial: force the fail-closed baseline
    pub fn fail_closed(&self, reason: DenyReason, at: DateTime<Utc>) -> Transition {
        let next = Self {
            gate: Gate::Denied,
            mode: Mode::Hold,
            integrity: Integrity::Fail,
            estop: true,
            last_event_time: Some(at),
        };
        Transition::new(next, EntryKind::FailClosed, json!({ "reason": reason }))
    }

    /// Acceptance: unlock exactly what the event asked for
    pub fn accept(
        &self,
        event_id: u64,
        mode: Mode,
        estop: bool,
        requested_mode: Option<&str>,
        at: DateTime<Utc>,
    ) -> Transition {
        let next = Self {
            gate: Gate::Allowed,
            mode,
            integrity: Integrity::HashOk,
            estop,
            last_event_time: Some(at),
        };
        let mut payload = json!({ "event_id": event_id, "mode": mode, "estop": estop });
        if let Some(requested) = requested_mode {
            payload["requested_mode"] = json!(requested);
        }
        Transition::new(next, EntryKind::StateAccept, payload)
    }

    /// After a step, executed or skipped: hold, deny, stop
    pub fn forced_halt(&self) -> Transition {
        let next = Self {
            gate: Gate::Denied,
            mode: Mode::Hold,
            estop: true,
            ..*self
        };
        Transition::new(
            next,
            EntryKind::PostStepForcedHalt,
            json!({ "previous_mode": self.mode }),
        )
    }
}

/// Fold a ledger into the state and counter it describes
///
/// Entries carrying a state snapshot overwrite the running state; `STATE_ACCEPT`
/// entries advance the counter.
pub fn reconstruct<'a, I>(entries: I) -> (ControlState, u64)
where
    I: IntoIterator<Item = &'a LedgerEntry>,
{
    let mut state = ControlState::safe_baseline();
    let mut last_applied = 0u64;

    for entry in entries {
        if let Some(snapshot) = entry.state {
            state = snapshot;
        }
        if entry.kind == EntryKind::StateAccept {
            if let Some(id) = entry.payload.get("event_id").and_then(|v| v.as_u64()) {
                last_applied = last_applied.max(id);
            }
        }
    }

    (state, last_applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_is_safe() {
        let state = ControlState::safe_baseline();
        assert!(state.is_safe());
        assert_eq!(state.integrity, Integrity::Unknown);
        assert!(state.last_event_time.is_none());
    }

    #[test]
    fn test_fail_closed_from_allowed() {
        let now = Utc::now();
        let open = ControlState::safe_baseline()
            .accept(4, Mode::ExploreSlow, false, None, now)
            .next;
        assert!(!open.is_safe());

        let t = open.fail_closed(DenyReason::GateNotAllowed, now);
        assert!(t.next.is_safe());
        assert_eq!(t.next.integrity, Integrity::Fail);
        assert_eq!(t.record.kind, EntryKind::FailClosed);
        assert_eq!(t.record.payload["reason"], "GATE_NOT_ALLOWED");
        assert_eq!(t.record.state, Some(t.next));
    }

    #[test]
    fn test_accept_records_requested_mode() {
        let t = ControlState::safe_baseline().accept(9, Mode::Hold, false, Some("ORBIT"), Utc::now());
        assert_eq!(t.next.gate, Gate::Allowed);
        assert_eq!(t.next.integrity, Integrity::HashOk);
        assert_eq!(t.record.payload["event_id"], 9);
        assert_eq!(t.record.payload["requested_mode"], "ORBIT");
    }

    #[test]
    fn test_forced_halt_keeps_integrity() {
        let now = Utc::now();
        let open = ControlState::safe_baseline()
            .accept(1, Mode::FollowProximity, false, None, now)
            .next;
        let t = open.forced_halt();
        assert!(t.next.is_safe());
        assert_eq!(t.next.integrity, Integrity::HashOk);
        assert_eq!(t.next.last_event_time, Some(now));
        assert_eq!(t.record.payload["previous_mode"], "FOLLOW_PROXIMITY");
    }
}
