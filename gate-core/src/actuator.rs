//! Actuator sinks
//!
//! The executor hands a command string to an [`ActuatorSink`] and never waits
//! for an acknowledgment. A transmission error is reported back so it can be
//! ledgered, nothing more.

use crate::config::{ActuatorConfig, ActuatorMode};
use crate::error::TransportError;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Fire-and-forget command transmitter
pub trait ActuatorSink: Send + Sync {
    /// Hand one command to the device
    fn send(&self, command: &str) -> Result<(), TransportError>;

    /// Short driver name for the ledger
    fn name(&self) -> &'static str;

    /// Whether commands actually leave the process
    fn is_live(&self) -> bool {
        false
    }
}

/// Records commands in memory and logs them; sends nothing
#[derive(Debug, Default, Clone)]
pub struct DryRunActuator {
    sent: Arc<Mutex<Vec<String>>>,
}

impl DryRunActuator {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands recorded so far
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

impl ActuatorSink for DryRunActuator {
    fn send(&self, command: &str) -> Result<(), TransportError> {
        tracing::info!(command, "DRY RUN: actuator command");
        self.sent.lock().push(command.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "dry_run"
    }
}

/// Sink whose every send fails; exercises the transmit-error path
#[derive(Debug, Default, Clone)]
pub struct UnreachableActuator;

impl ActuatorSink for UnreachableActuator {
    fn send(&self, command: &str) -> Result<(), TransportError> {
        Err(TransportError::Send(format!("no route to device for '{}'", command)))
    }

    fn name(&self) -> &'static str {
        "unreachable"
    }
}

/// Sends each command as one UDP datagram
#[derive(Debug)]
pub struct UdpActuator {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpActuator {
    /// Bind the local socket and send the optional init command
    pub async fn connect(config: &ActuatorConfig) -> crate::Result<Self> {
        let target: SocketAddr = config
            .target_addr
            .parse()
            .map_err(|e| crate::Error::Config(format!("Invalid actuator address: {}", e)))?;

        let socket = UdpSocket::bind(&config.bind_addr).await?;
        // Prime write readiness so try_send_to does not report WouldBlock
        socket.writable().await?;
        let actuator = Self { socket, target };

        if let Some(init) = &config.init_command {
            if let Err(e) = actuator.send(init) {
                tracing::warn!(error = %e, "Actuator init command not sent");
            }
        }

        tracing::info!(addr = %actuator.target, "UDP actuator ready");
        Ok(actuator)
    }
}

impl ActuatorSink for UdpActuator {
    fn send(&self, command: &str) -> Result<(), TransportError> {
        // try_send_to never awaits: a full socket buffer is a transmit error
        self.socket
            .try_send_to(command.as_bytes(), self.target)
            .map(|_| ())
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "udp"
    }

    fn is_live(&self) -> bool {
        true
    }
}

/// Build the sink selected by configuration
pub async fn from_config(config: &ActuatorConfig) -> crate::Result<Arc<dyn ActuatorSink>> {
    match config.mode {
        ActuatorMode::DryRun => Ok(Arc::new(DryRunActuator::new())),
        ActuatorMode::Udp => Ok(Arc::new(UdpActuator::connect(config).await?)),
    }
}
