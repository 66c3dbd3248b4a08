//! HBCE Gate Core
//!
//! Fail-closed gate between untrusted remote control events and a drone.
//!
//! # Architecture
//!
//! - **Single Owner**: One actor task owns control state and replay counter
//! - **Fail-Closed**: Every error path resolves to DENIED / HOLD / estop
//! - **Single Step**: At most one bounded command per accepted event
//! - **Audit Ledger**: Append-only, hash-chained, synced to disk
//!
//! # Invariants
//!
//! - Outside an accept→execute step the state is `DENIED`, `HOLD`, `estop`
//! - The replay counter never decreases and only moves with `STATE_ACCEPT`
//! - The counter is durable before any command leaves the process
//! - Replaying the ledger reproduces state and counter

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod state;
pub mod storage;
pub mod counter;
pub mod replay;
pub mod evaluator;
pub mod executor;
pub mod actuator;
pub mod engine;
pub mod error;
pub mod actor;
pub mod config;
pub mod metrics;
pub mod service;

// Re-exports
pub use error::{Error, Result, TransportError};
pub use types::{
    Delivery, DenyReason, EntryKind, Gate, IgnoreReason, Integrity, LedgerEntry, Mode,
    SkipReason, StepOutcome, Verdict,
};
pub use state::ControlState;
pub use storage::LedgerStore;
pub use service::GateService;
pub use config::Config;
