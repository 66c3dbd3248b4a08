//! Single-step executor
//!
//! Turns an accepted state into at most one bounded actuator command. The
//! preconditions are checked again here, against the state the step actually
//! runs on, not the state the evaluator saw.

use crate::actuator::ActuatorSink;
use crate::config::ActuatorConfig;
use crate::state::ControlState;
use crate::types::{EntryKind, Gate, Integrity, Mode, Record, SkipReason, StepOutcome};
use serde_json::json;
use std::sync::Arc;

/// Legal forward translation range of the driver (cm)
pub const FORWARD_CM_RANGE: (u32, u32) = (20, 500);

/// Legal rotation range of the driver (degrees)
pub const ROTATE_DEG_RANGE: (u32, u32) = (1, 360);

/// Fixed mode → command mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTable {
    forward: String,
    rotate: String,
}

impl CommandTable {
    /// Build the table, clamping step sizes into the driver's legal range
    pub fn new(forward_cm: u32, rotate_deg: u32) -> Self {
        let forward_cm = forward_cm.clamp(FORWARD_CM_RANGE.0, FORWARD_CM_RANGE.1);
        let rotate_deg = rotate_deg.clamp(ROTATE_DEG_RANGE.0, ROTATE_DEG_RANGE.1);
        Self {
            forward: format!("forward {}", forward_cm),
            rotate: format!("cw {}", rotate_deg),
        }
    }

    /// Command for a mode; `HOLD` has none
    pub fn command_for(&self, mode: Mode) -> Option<&str> {
        match mode {
            Mode::ExploreSlow => Some(self.forward.as_str()),
            Mode::FollowProximity => Some(self.rotate.as_str()),
            Mode::Hold => None,
        }
    }
}

impl From<&ActuatorConfig> for CommandTable {
    fn from(config: &ActuatorConfig) -> Self {
        Self::new(config.forward_cm, config.rotate_deg)
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::from(&ActuatorConfig::default())
    }
}

/// Issues one command per accepted event
pub struct SingleStepExecutor {
    sink: Arc<dyn ActuatorSink>,
    commands: CommandTable,
}

impl std::fmt::Debug for SingleStepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleStepExecutor")
            .field("sink", &self.sink.name())
            .field("commands", &self.commands)
            .finish()
    }
}

impl SingleStepExecutor {
    /// Executor over a sink
    pub fn new(sink: Arc<dyn ActuatorSink>, commands: CommandTable) -> Self {
        Self { sink, commands }
    }

    /// Name of the sink commands go to
    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Run the step against `state`
    ///
    /// Returns the outcome and its `EXEC_STEP` / `EXEC_SKIP` record. The caller
    /// must apply the forced halt afterwards whatever the outcome.
    pub fn execute_one_step(&self, state: &ControlState) -> (StepOutcome, Record) {
        if let Some(reason) = Self::precondition_failure(state) {
            tracing::warn!(?reason, "Step skipped");
            let record = Record::note(EntryKind::ExecSkip, json!({ "reason": reason }));
            return (StepOutcome::Skipped { reason }, record);
        }

        let command = self.commands.command_for(state.mode).map(str::to_string);
        let transmit_error = command.as_deref().and_then(|cmd| match self.sink.send(cmd) {
            Ok(()) => {
                tracing::info!(command = cmd, sink = self.sink.name(), "Actuator command sent");
                None
            }
            Err(e) => {
                tracing::error!(command = cmd, error = %e, "Actuator transmit failed");
                Some(e.to_string())
            }
        });

        let mut payload = json!({
            "mode": state.mode,
            "command": command,
            "sink": self.sink.name(),
            "live": self.sink.is_live(),
        });
        if let Some(err) = &transmit_error {
            payload["transmit_error"] = json!(err);
        }

        let outcome = StepOutcome::Executed {
            mode: state.mode,
            command,
            transmit_error,
        };
        (outcome, Record::note(EntryKind::ExecStep, payload))
    }

    fn precondition_failure(state: &ControlState) -> Option<SkipReason> {
        if state.estop {
            Some(SkipReason::EstopActive)
        } else if state.gate != Gate::Allowed {
            Some(SkipReason::GateNotAllowed)
        } else if state.integrity != Integrity::HashOk {
            Some(SkipReason::IntegrityNotOk)
        } else {
            None
        }
    }
}
