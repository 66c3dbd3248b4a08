//! Main gate orchestration layer
//!
//! This module ties together storage, engine, actor and metrics into the
//! interface the transport and the status/export surface use.
//!
//! # Example
//!
//! ```no_run
//! use gate_core::{actuator::DryRunActuator, Config, GateService};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> gate_core::Result<()> {
//!     let config = Config::default();
//!     let gate = GateService::open(config, Arc::new(DryRunActuator::new()))?;
//!
//!     let delivery = gate
//!         .deliver(r#"{"event_id":1,"integrity":"HASH_OK","gate":"ALLOWED","mode":"EXPLORE_SLOW"}"#)
//!         .await?;
//!     println!("{:?}", delivery.verdict);
//!
//!     gate.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_gate_actor, GateHandle},
    actuator::ActuatorSink,
    engine::{BootInfo, GateEngine, StatusSnapshot},
    error::TransportError,
    executor::{CommandTable, SingleStepExecutor},
    metrics::Metrics,
    state::ControlState,
    storage::{verify_chain, LedgerStore},
    types::{Delivery, LedgerEntry},
    Config, Error, Result,
};
use bytes::Bytes;
use std::sync::Arc;

/// Main gate interface
#[derive(Clone, Debug)]
pub struct GateService {
    /// Actor handle for state-changing operations
    handle: GateHandle,

    /// Direct storage access (for reads)
    store: Arc<LedgerStore>,

    /// Metrics shared with the engine
    metrics: Metrics,
}

impl GateService {
    /// Open the store, boot the engine and spawn its actor
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(config: Config, sink: Arc<dyn ActuatorSink>) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(LedgerStore::open(&config)?);
        let metrics = Metrics::new().map_err(|e| Error::Other(e.to_string()))?;
        let executor = SingleStepExecutor::new(sink, CommandTable::from(&config.actuator));

        let engine = GateEngine::boot(
            store.clone(),
            executor,
            metrics.clone(),
            BootInfo {
                service: config.service_name.clone(),
                version: config.service_version.clone(),
            },
        )?;
        let handle = spawn_gate_actor(engine, config.mailbox_capacity);

        Ok(Self {
            handle,
            store,
            metrics,
        })
    }

    /// Deliver one inbound event
    pub async fn deliver(&self, body: impl Into<Bytes>) -> Result<Delivery> {
        self.handle.deliver(body).await
    }

    /// Report that the transport could not produce an event
    pub async fn report_transport_failure(&self, error: TransportError) -> Result<Delivery> {
        self.handle.report_transport_failure(error).await
    }

    /// Current control state
    pub async fn current_state(&self) -> Result<ControlState> {
        Ok(self.handle.status().await?.state)
    }

    /// Current control state and replay counter
    pub async fn status(&self) -> Result<StatusSnapshot> {
        self.handle.status().await
    }

    /// All ledger entries in order
    pub fn read_ledger(&self) -> Result<Vec<LedgerEntry>> {
        self.store.read_all()
    }

    /// JSON Lines export of the full ledger
    pub fn export_ledger(&self) -> Result<Vec<u8>> {
        self.store.export()
    }

    /// Verify the hash chain of the stored ledger
    pub fn verify_ledger(&self) -> Result<u64> {
        let entries = self.store.read_all()?;
        verify_chain(&entries)?;
        Ok(entries.len() as u64)
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Stop the actor; the store closes when the last handle drops
    pub async fn shutdown(&self) -> Result<()> {
        self.handle.shutdown().await
    }
}
