//! Core types for the gate
//!
//! Every enum serializes as the SCREAMING_SNAKE_CASE token used on the wire
//! and in the ledger (`HASH_OK`, `EXPLORE_SLOW`, `FAIL_CLOSED`, ...).

use crate::state::ControlState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Gate position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gate {
    /// Motion may be unlocked
    Allowed,
    /// Motion is locked
    Denied,
}

/// Flight mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// Hold position, no command
    Hold,
    /// One bounded forward translation
    ExploreSlow,
    /// One bounded rotation
    FollowProximity,
}

impl Mode {
    /// Wire token
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Hold => "HOLD",
            Mode::ExploreSlow => "EXPLORE_SLOW",
            Mode::FollowProximity => "FOLLOW_PROXIMITY",
        }
    }

    /// Parse a wire token
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HOLD" => Some(Mode::Hold),
            "EXPLORE_SLOW" => Some(Mode::ExploreSlow),
            "FOLLOW_PROXIMITY" => Some(Mode::FollowProximity),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Integrity status of the last evaluated event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Integrity {
    /// Event carried a verified hash
    HashOk,
    /// Last decision failed closed
    Fail,
    /// Nothing evaluated yet
    Unknown,
}

/// Why an event was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    /// Event asserted the emergency stop
    EstopOverride,
    /// Body was not a JSON object
    EventInvalid,
    /// `event_id` absent or not an integer
    EventIdMissingOrInvalid,
    /// `integrity` was not `HASH_OK`
    IntegrityNotOk,
    /// `gate` was not `ALLOWED`
    GateNotAllowed,
    /// Fetch or delivery of the event failed
    TransportFailure,
    /// Counter commit could not be made durable
    PersistenceFailure,
}

impl DenyReason {
    /// Ledger token
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::EstopOverride => "ESTOP_OVERRIDE",
            DenyReason::EventInvalid => "EVENT_INVALID",
            DenyReason::EventIdMissingOrInvalid => "EVENT_ID_MISSING_OR_INVALID",
            DenyReason::IntegrityNotOk => "INTEGRITY_NOT_OK",
            DenyReason::GateNotAllowed => "GATE_NOT_ALLOWED",
            DenyReason::TransportFailure => "TRANSPORT_FAILURE",
            DenyReason::PersistenceFailure => "PERSISTENCE_FAILURE",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an event was ignored without touching state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IgnoreReason {
    /// `event_id` not newer than the last applied one
    EventReplayIgnored,
}

impl IgnoreReason {
    /// Ledger token
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::EventReplayIgnored => "EVENT_REPLAY_IGNORED",
        }
    }
}

/// Gate decision for one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Event may drive exactly one step
    Accepted {
        /// Fresh id to commit
        event_id: u64,
        /// Mode projected into state
        mode: Mode,
        /// Coerced estop flag
        estop: bool,
        /// Mode string as sent, when it was not a known mode
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requested_mode: Option<String>,
    },
    /// Event forces the safe baseline
    Denied {
        /// Specific reason
        reason: DenyReason,
    },
    /// Event changes nothing
    Ignored {
        /// Specific reason
        reason: IgnoreReason,
    },
}

impl Verdict {
    /// Short label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Accepted { .. } => "accepted",
            Verdict::Denied { .. } => "denied",
            Verdict::Ignored { .. } => "ignored",
        }
    }

    /// Reason token, if any
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Verdict::Accepted { .. } => None,
            Verdict::Denied { reason } => Some(reason.as_str()),
            Verdict::Ignored { reason } => Some(reason.as_str()),
        }
    }
}

/// Why the executor refused to send a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    /// Emergency stop engaged at execution time
    EstopActive,
    /// Gate closed at execution time
    GateNotAllowed,
    /// Integrity not verified at execution time
    IntegrityNotOk,
}

/// Result of the single step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepOutcome {
    /// Preconditions failed, nothing sent
    Skipped {
        /// Failed precondition
        reason: SkipReason,
    },
    /// Step ran for this mode
    Executed {
        /// Mode at execution time
        mode: Mode,
        /// Command handed to the actuator (`None` for HOLD)
        command: Option<String>,
        /// Transmission fault, if the sink reported one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transmit_error: Option<String>,
    },
}

/// What the transport gets back for one delivered event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    /// Gate decision
    pub verdict: Verdict,
    /// Executor outcome, present only when the event was accepted and committed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<StepOutcome>,
    /// State after the event was fully processed
    pub state: ControlState,
}

/// Kind of ledger record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    /// Process start
    Boot,
    /// Event bytes received
    EventIngest,
    /// Event body not parseable
    EventParseError,
    /// Stale event, state untouched
    EventIgnored,
    /// Transport could not deliver an event
    TransportFailure,
    /// Safe baseline forced by a denial
    FailClosed,
    /// Event accepted and counter committed
    StateAccept,
    /// Step executed
    ExecStep,
    /// Step skipped
    ExecSkip,
    /// Safe baseline forced after a step
    PostStepForcedHalt,
    /// Ledger exported
    LedgerExport,
}

/// Record produced by a transition, before the store assigns seq and hash
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Entry kind
    pub kind: EntryKind,
    /// Free-form JSON payload
    pub payload: serde_json::Value,
    /// State after the transition, when the record describes one
    pub state: Option<ControlState>,
}

impl Record {
    /// Record that does not change state
    pub fn note(kind: EntryKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            state: None,
        }
    }
}

/// Genesis `prev_hash`
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One immutable ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Position in the ledger, starting at 0
    pub seq: u64,
    /// Entry kind
    pub kind: EntryKind,
    /// Append time
    pub timestamp: DateTime<Utc>,
    /// Free-form JSON payload
    pub payload: serde_json::Value,
    /// State after the transition this entry describes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ControlState>,
    /// Hash of the previous entry
    pub prev_hash: String,
    /// SHA-256 over `prev_hash` and the canonical body
    pub hash: String,
}

/// Borrowed view of an entry without its own hash
#[derive(Serialize)]
struct EntryBody<'a> {
    seq: u64,
    kind: EntryKind,
    timestamp: &'a DateTime<Utc>,
    payload: &'a serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a ControlState>,
    prev_hash: &'a str,
}

impl LedgerEntry {
    /// Seal a record at `seq` after `prev_hash`
    pub fn seal(
        seq: u64,
        record: Record,
        timestamp: DateTime<Utc>,
        prev_hash: String,
    ) -> crate::Result<Self> {
        let mut entry = Self {
            seq,
            kind: record.kind,
            timestamp,
            payload: record.payload,
            state: record.state,
            prev_hash,
            hash: String::new(),
        };
        entry.hash = entry.compute_hash()?;
        Ok(entry)
    }

    /// Canonical bytes the hash covers
    pub fn canonical_bytes(&self) -> crate::Result<Vec<u8>> {
        let body = EntryBody {
            seq: self.seq,
            kind: self.kind,
            timestamp: &self.timestamp,
            payload: &self.payload,
            state: self.state.as_ref(),
            prev_hash: &self.prev_hash,
        };
        Ok(serde_json::to_vec(&body)?)
    }

    /// Recompute this entry's hash
    pub fn compute_hash(&self) -> crate::Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(self.canonical_bytes()?);
        Ok(hex::encode(hasher.finalize()))
    }
}
