//! Anti-replay guard
//!
//! Holds the last applied event id loaded from storage. Checking freshness is
//! side-effect free; the counter only moves through [`ReplayGuard::commit`]
//! after the store has made the new value durable.

use serde_json::Value;

/// Freshness of an incoming event id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Newer than anything applied; not committed yet
    Fresh(u64),
    /// Not newer than the last applied id
    Stale {
        /// Id the event carried (may be negative)
        event_id: i64,
        /// Counter at the time of the check
        last_applied: u64,
    },
    /// Missing, non-numeric, fractional or non-finite
    Invalid,
}

/// In-memory view of the persisted counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayGuard {
    last_applied: u64,
}

impl ReplayGuard {
    /// Guard seeded with the persisted counter
    pub fn new(last_applied: u64) -> Self {
        Self { last_applied }
    }

    /// Last committed id
    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    /// Classify an event without mutating anything
    pub fn accept_if_fresh(&self, event: &Value) -> Freshness {
        match event.get("event_id").and_then(coerce_event_id) {
            None => Freshness::Invalid,
            Some(id) if id <= 0 || (id as u64) <= self.last_applied => Freshness::Stale {
                event_id: id,
                last_applied: self.last_applied,
            },
            Some(id) => Freshness::Fresh(id as u64),
        }
    }

    /// Advance after the store confirmed the write
    ///
    /// Never moves backwards.
    pub fn commit(&mut self, event_id: u64) {
        self.last_applied = self.last_applied.max(event_id);
    }
}

/// Integer value of an `event_id` field, following `Number()` coercion
///
/// Integral floats and numeric strings are accepted; booleans, null, empty
/// strings and fractional or non-finite numbers are not.
pub fn coerce_event_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else if n.as_u64().is_some() {
                // Beyond i64::MAX: cannot be represented as an id
                None
            } else {
                n.as_f64().and_then(integral)
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<i64>() {
                Ok(i) => Some(i),
                Err(_) => trimmed.parse::<f64>().ok().and_then(integral),
            }
        }
        _ => None,
    }
}

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}
