//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the gate.
//!
//! # Metrics
//!
//! - `gate_events_total` - Events delivered to the gate (including transport failures)
//! - `gate_verdicts_total{verdict,reason}` - Decisions by outcome
//! - `gate_commands_sent_total` - Commands handed to the actuator
//! - `gate_transmit_errors_total` - Commands the actuator refused
//! - `gate_ledger_entries_total` - Ledger entries appended by the engine
//! - `gate_last_applied_event_id` - Current replay counter

use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
///
/// Registers into its own registry so several gates can coexist in one
/// process (tests, embedded use).
#[derive(Clone)]
pub struct Metrics {
    /// Events delivered
    pub events_total: IntCounter,

    /// Decisions by verdict and reason
    pub verdicts_total: IntCounterVec,

    /// Commands handed to the actuator
    pub commands_sent: IntCounter,

    /// Commands the actuator refused
    pub transmit_errors: IntCounter,

    /// Ledger entries appended
    pub ledger_entries: IntCounter,

    /// Replay counter
    pub last_applied_event_id: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("events_total", &self.events_total.get())
            .field("last_applied_event_id", &self.last_applied_event_id.get())
            .finish()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let events_total = IntCounter::new("gate_events_total", "Events delivered to the gate")?;
        registry.register(Box::new(events_total.clone()))?;

        let verdicts_total = IntCounterVec::new(
            Opts::new("gate_verdicts_total", "Gate decisions by verdict and reason"),
            &["verdict", "reason"],
        )?;
        registry.register(Box::new(verdicts_total.clone()))?;

        let commands_sent =
            IntCounter::new("gate_commands_sent_total", "Commands handed to the actuator")?;
        registry.register(Box::new(commands_sent.clone()))?;

        let transmit_errors =
            IntCounter::new("gate_transmit_errors_total", "Commands the actuator refused")?;
        registry.register(Box::new(transmit_errors.clone()))?;

        let ledger_entries =
            IntCounter::new("gate_ledger_entries_total", "Ledger entries appended")?;
        registry.register(Box::new(ledger_entries.clone()))?;

        let last_applied_event_id =
            IntGauge::new("gate_last_applied_event_id", "Current replay counter")?;
        registry.register(Box::new(last_applied_event_id.clone()))?;

        Ok(Self {
            events_total,
            verdicts_total,
            commands_sent,
            transmit_errors,
            ledger_entries,
            last_applied_event_id,
            registry,
        })
    }

    /// Record a delivered event
    pub fn record_event(&self) {
        self.events_total.inc();
    }

    /// Record a decision
    pub fn record_verdict(&self, verdict: &str, reason: Option<&str>) {
        self.verdicts_total
            .with_label_values(&[verdict, reason.unwrap_or("")])
            .inc();
    }

    /// Record a command handed to the actuator
    pub fn record_command(&self, transmit_failed: bool) {
        self.commands_sent.inc();
        if transmit_failed {
            self.transmit_errors.inc();
        }
    }

    /// Record a ledger append
    pub fn record_ledger_entry(&self) {
        self.ledger_entries.inc();
    }

    /// Update the replay counter gauge
    pub fn set_last_applied(&self, event_id: u64) {
        self.last_applied_event_id
            .set(i64::try_from(event_id).unwrap_or(i64::MAX));
    }

    /// Render in Prometheus text format
    pub fn export(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
