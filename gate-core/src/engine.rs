//! Gating pipeline
//!
//! [`GateEngine`] is the single owner of the control state and the replay
//! counter. One call to [`GateEngine::deliver`] runs an event to completion:
//!
//! ```text
//! EVENT_INGEST ─┬─ parse error ──────────── EVENT_PARSE_ERROR, FAIL_CLOSED
//!               └─ evaluate ─┬─ Denied ──── FAIL_CLOSED
//!                            ├─ Ignored ─── EVENT_IGNORED
//!                            └─ Accepted ── STATE_ACCEPT (+ counter, atomic)
//!                                           EXEC_STEP | EXEC_SKIP
//!                                           POST_STEP_FORCED_HALT
//! ```
//!
//! The engine is synchronous; [`crate::actor`] serializes access to it.

use crate::error::{Result, TransportError};
use crate::evaluator::evaluate;
use crate::executor::SingleStepExecutor;
use crate::metrics::Metrics;
use crate::replay::ReplayGuard;
use crate::state::{reconstruct, ControlState, Transition};
use crate::storage::LedgerStore;
use crate::types::{Delivery, DenyReason, EntryKind, Mode, Record, StepOutcome, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// State plus counter, as seen by the status surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Control state
    pub state: ControlState,
    /// Replay counter
    pub last_applied_event_id: u64,
}

/// Identity written into the `BOOT` entry
#[derive(Debug, Clone)]
pub struct BootInfo {
    /// Service name
    pub service: String,
    /// Service version
    pub version: String,
}

impl Default for BootInfo {
    fn default() -> Self {
        Self {
            service: "hbce-bridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Owner of state, counter and executor
#[derive(Debug)]
pub struct GateEngine {
    state: ControlState,
    guard: ReplayGuard,
    store: Arc<LedgerStore>,
    executor: SingleStepExecutor,
    metrics: Metrics,
}

impl GateEngine {
    /// Load the counter, write `BOOT`, start from the safe baseline
    ///
    /// The counter is the larger of the persisted record and what the ledger
    /// itself proves was accepted. An unreadable counter, or a rebuilt store
    /// with no counter file, refuses boot: the accepted ids are unknown.
    pub fn boot(
        store: Arc<LedgerStore>,
        executor: SingleStepExecutor,
        metrics: Metrics,
        info: BootInfo,
    ) -> Result<Self> {
        let persisted = store.load_counter().map_err(|e| {
            tracing::error!(error = %e, "Replay counter unrecoverable, refusing to boot");
            e
        })?;

        let from_ledger = match store.read_all() {
            Ok(entries) => reconstruct(&entries).1,
            Err(e) => {
                tracing::warn!(error = %e, "Ledger unreadable at boot, using counter record");
                0
            }
        };

        let last_applied = persisted.max(from_ledger);
        store.sync_counter(last_applied)?;

        let state = ControlState::safe_baseline();
        let engine = Self {
            state,
            guard: ReplayGuard::new(last_applied),
            store,
            executor,
            metrics,
        };
        engine.metrics.set_last_applied(last_applied);

        let record = Record {
            kind: EntryKind::Boot,
            payload: json!({
                "service": info.service,
                "version": info.version,
                "session": Uuid::now_v7(),
                "sink": engine.executor.sink_name(),
                "last_applied_event_id": last_applied,
                "store_reinitialized": engine.store.was_reinitialized(),
            }),
            state: Some(state),
        };
        engine.note(record);

        tracing::info!(
            last_applied_event_id = last_applied,
            sink = engine.executor.sink_name(),
            "Gate booted in safe state"
        );
        Ok(engine)
    }

    /// Current control state
    pub fn state(&self) -> ControlState {
        self.state
    }

    /// Current replay counter
    pub fn last_applied(&self) -> u64 {
        self.guard.last_applied()
    }

    /// State plus counter
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state,
            last_applied_event_id: self.guard.last_applied(),
        }
    }

    /// Run one inbound event through the whole pipeline
    pub fn deliver(&mut self, bytes: &[u8]) -> Delivery {
        self.metrics.record_event();
        let now = Utc::now();

        self.note(Record::note(
            EntryKind::EventIngest,
            json!({
                "bytes": bytes.len(),
                "sha256": hex::encode(Sha256::digest(bytes)),
            }),
        ));

        let event: Value = match serde_json::from_slice(bytes) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "INVALID EVENT");
                self.note(Record::note(
                    EntryKind::EventParseError,
                    json!({ "error": e.to_string() }),
                ));
                return self.deny(DenyReason::EventInvalid, now);
            }
        };

        match evaluate(&event, &self.guard) {
            Verdict::Denied { reason } => self.deny(reason, now),
            verdict @ Verdict::Ignored { .. } => self.ignore(verdict, &event),
            Verdict::Accepted {
                event_id,
                mode,
                estop,
                requested_mode,
            } => self.accept_and_step(event_id, mode, estop, requested_mode, now),
        }
    }

    /// Feed a fetch/delivery failure through the fail-closed path
    pub fn report_transport_failure(&mut self, error: &TransportError) -> Delivery {
        self.metrics.record_event();
        tracing::warn!(error = %error, "FAIL CLOSED: transport");
        self.note(Record::note(
            EntryKind::TransportFailure,
            json!({ "error": error.to_string() }),
        ));
        self.deny(DenyReason::TransportFailure, Utc::now())
    }

    fn deny(&mut self, reason: DenyReason, now: DateTime<Utc>) -> Delivery {
        tracing::warn!(%reason, "FAIL CLOSED");
        let transition = self.state.fail_closed(reason, now);
        self.apply(transition);

        let verdict = Verdict::Denied { reason };
        self.metrics.record_verdict(verdict.label(), verdict.reason());
        Delivery {
            verdict,
            step: None,
            state: self.state,
        }
    }

    fn ignore(&mut self, verdict: Verdict, event: &Value) -> Delivery {
        tracing::info!(
            event_id = %event.get("event_id").cloned().unwrap_or(serde_json::Value::Null),
            last_applied_event_id = self.guard.last_applied(),
            "Replayed event ignored"
        );
        self.note(Record::note(
            EntryKind::EventIgnored,
            json!({
                "reason": verdict.reason(),
                "event_id": event.get("event_id"),
                "last_applied_event_id": self.guard.last_applied(),
            }),
        ));
        self.metrics.record_verdict(verdict.label(), verdict.reason());
        Delivery {
            verdict,
            step: None,
            state: self.state,
        }
    }

    fn accept_and_step(
        &mut self,
        event_id: u64,
        mode: Mode,
        estop: bool,
        requested_mode: Option<String>,
        now: DateTime<Utc>,
    ) -> Delivery {
        let Transition { next, record } =
            self.state
                .accept(event_id, mode, estop, requested_mode.as_deref(), now);

        // Counter and STATE_ACCEPT must be durable before anything can move
        if let Err(e) = self.store.commit_accept(record, event_id) {
            tracing::error!(event_id, error = %e, "Commit failed, denying event");
            return self.deny(DenyReason::PersistenceFailure, now);
        }
        self.metrics.record_ledger_entry();
        self.guard.commit(event_id);
        self.metrics.set_last_applied(self.guard.last_applied());
        self.state = next;

        let verdict = Verdict::Accepted {
            event_id,
            mode,
            estop,
            requested_mode,
        };
        self.metrics.record_verdict(verdict.label(), None);
        tracing::info!(event_id, %mode, estop, "Event accepted");

        let (outcome, record) = self.executor.execute_one_step(&self.state);
        if let StepOutcome::Executed {
            command: Some(_),
            transmit_error,
            ..
        } = &outcome
        {
            self.metrics.record_command(transmit_error.is_some());
        }
        self.note(record);

        let halt = self.state.forced_halt();
        self.apply(halt);

        Delivery {
            verdict,
            step: Some(outcome),
            state: self.state,
        }
    }

    fn apply(&mut self, transition: Transition) {
        self.state = transition.next;
        self.note(transition.record);
    }

    /// Append a record; a failed append is logged and the pipeline continues
    fn note(&self, record: Record) {
        let kind = record.kind;
        match self.store.append(record) {
            Ok(_) => self.metrics.record_ledger_entry(),
            Err(e) => tracing::error!(?kind, error = %e, "Ledger append failed"),
        }
    }
}
