//! Actor-based concurrency for the gate
//!
//! This module implements the single-owner pattern using a Tokio actor:
//! - One task owns the [`GateEngine`], so two evaluate→execute sequences never interleave
//! - Ledger commit and append finish before the next message is taken
//! - Async message passing with backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │          Transport (HTTP push / poller)               │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                GateHandle (Clone)                     │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               GateActor (Single Task)                 │
//! │   GateEngine: state + replay guard + executor         │
//! │                       │                               │
//! │                       ▼                               │
//! │          LedgerStore (synced RocksDB writes)          │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::engine::{GateEngine, StatusSnapshot};
use crate::error::TransportError;
use crate::types::Delivery;
use crate::{Error, Result};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

/// Message sent to the gate actor
#[derive(Debug)]
pub enum GateMessage {
    /// Run one inbound event through the pipeline
    Deliver {
        body: Bytes,
        response: oneshot::Sender<Delivery>,
    },

    /// Transport could not produce an event
    TransportFailure {
        error: TransportError,
        response: oneshot::Sender<Delivery>,
    },

    /// Read state and counter
    GetStatus {
        response: oneshot::Sender<StatusSnapshot>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that owns the engine
#[derive(Debug)]
pub struct GateActor {
    engine: GateEngine,
    mailbox: mpsc::Receiver<GateMessage>,
}

impl GateActor {
    /// Create new actor
    pub fn new(engine: GateEngine, mailbox: mpsc::Receiver<GateMessage>) -> Self {
        Self { engine, mailbox }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                GateMessage::Shutdown => break,
                msg => self.handle_message(msg),
            }
        }

        tracing::info!(
            last_applied_event_id = self.engine.last_applied(),
            "Gate actor stopped"
        );
    }

    /// Handle a single message; never awaits
    fn handle_message(&mut self, msg: GateMessage) {
        match msg {
            GateMessage::Deliver { body, response } => {
                let delivery = self.engine.deliver(&body);
                let _ = response.send(delivery);
            }

            GateMessage::TransportFailure { error, response } => {
                let delivery = self.engine.report_transport_failure(&error);
                let _ = response.send(delivery);
            }

            GateMessage::GetStatus { response } => {
                let _ = response.send(self.engine.status());
            }

            GateMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct GateHandle {
    sender: mpsc::Sender<GateMessage>,
}

impl GateHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<GateMessage>) -> Self {
        Self { sender }
    }

    /// Deliver one event
    pub async fn deliver(&self, body: impl Into<Bytes>) -> Result<Delivery> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(GateMessage::Deliver {
                body: body.into(),
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Report a transport failure
    pub async fn report_transport_failure(&self, error: TransportError) -> Result<Delivery> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(GateMessage::TransportFailure {
                error,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Get state and counter
    pub async fn status(&self) -> Result<StatusSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(GateMessage::GetStatus { response: tx })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(GateMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the gate actor
pub fn spawn_gate_actor(engine: GateEngine, mailbox_capacity: usize) -> GateHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let actor = GateActor::new(engine, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    GateHandle::new(tx)
}
