//! Gate evaluator
//!
//! Pure decision over an event and the replay guard. Rules are checked in a
//! fixed order and the first match wins:
//!
//! 1. `estop === true` → `ESTOP_OVERRIDE` (nothing else is inspected)
//! 2. not an object → `EVENT_INVALID`
//! 3. bad `event_id` → `EVENT_ID_MISSING_OR_INVALID`
//! 4. stale `event_id` → ignored, `EVENT_REPLAY_IGNORED`
//! 5. `integrity !== "HASH_OK"` → `INTEGRITY_NOT_OK`
//! 6. `gate !== "ALLOWED"` → `GATE_NOT_ALLOWED`
//! 7. accepted with `mode` (default `HOLD`) and truthy `estop`

use crate::replay::{Freshness, ReplayGuard};
use crate::types::{DenyReason, IgnoreReason, Mode, Verdict};
use serde_json::Value;

/// Decide what an event may do
pub fn evaluate(event: &Value, guard: &ReplayGuard) -> Verdict {
    if event.get("estop") == Some(&Value::Bool(true)) {
        return Verdict::Denied {
            reason: DenyReason::EstopOverride,
        };
    }

    if !event.is_object() {
        return Verdict::Denied {
            reason: DenyReason::EventInvalid,
        };
    }

    let event_id = match guard.accept_if_fresh(event) {
        Freshness::Invalid => {
            return Verdict::Denied {
                reason: DenyReason::EventIdMissingOrInvalid,
            }
        }
        Freshness::Stale { .. } => {
            return Verdict::Ignored {
                reason: IgnoreReason::EventReplayIgnored,
            }
        }
        Freshness::Fresh(id) => id,
    };

    if event.get("integrity").and_then(Value::as_str) != Some("HASH_OK") {
        return Verdict::Denied {
            reason: DenyReason::IntegrityNotOk,
        };
    }

    if event.get("gate").and_then(Value::as_str) != Some("ALLOWED") {
        return Verdict::Denied {
            reason: DenyReason::GateNotAllowed,
        };
    }

    let (mode, requested_mode) = project_mode(event.get("mode"));

    Verdict::Accepted {
        event_id,
        mode,
        estop: truthy(event.get("estop")),
        requested_mode,
    }
}

/// Mode for state plus the raw request when it was not a known mode
///
/// Missing or falsy modes mean `HOLD`; unknown ones also hold.
fn project_mode(raw: Option<&Value>) -> (Mode, Option<String>) {
    if !truthy(raw) {
        return (Mode::Hold, None);
    }
    match raw {
        Some(Value::String(s)) => match Mode::parse(s) {
            Some(mode) => (mode, None),
            None => (Mode::Hold, Some(s.clone())),
        },
        Some(other) => (Mode::Hold, Some(other.to_string())),
        None => (Mode::Hold, None),
    }
}

/// JavaScript truthiness of an optional JSON value
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}
