//! Poll transport
//!
//! Periodically fetches a document and delivers it to the gate. The document is
//! either the event itself or a pointer naming where the event lives. Only a
//! document with a string `event_url` and no `event_id` is a pointer:
//!
//! ```text
//! GET url ──► {"event_url": "..."} ──► GET event_url ──► bytes ──► gate
//!         └─► anything else ─────────────────────────► bytes ──► gate
//! ```
//!
//! Fetch failures fail the gate closed. Only the first failure of a streak is
//! reported so an outage does not flood the ledger.

use bytes::Bytes;
use gate_core::{config::PollConfig, Delivery, Error, GateService, TransportError};
use reqwest::{Client, Url};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Where the event bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Document named another resource
    Pointer(Url),
    /// Document was the event
    Inline(Bytes),
}

/// What one poll cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// New document delivered
    Delivered(Delivery),
    /// Same bytes as the last delivery
    Unchanged,
    /// Fetch failed; `reported` is true for the first failure of a streak
    Failed {
        /// Cause
        error: TransportError,
        /// Whether the gate was told
        reported: bool,
    },
}

/// Stage one: fetch `url` and decide whether it is a pointer
pub async fn resolve_pointer(client: &Client, url: &Url) -> Result<Resolved, TransportError> {
    let body = fetch(client, url).await?;

    let locator = serde_json::from_slice::<Value>(&body)
        .ok()
        .filter(|doc| doc.get("event_id").is_none())
        .and_then(|doc| {
            doc.get("event_url")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        });

    match locator {
        Some(locator) => url
            .join(locator.trim())
            .map(Resolved::Pointer)
            .map_err(|e| TransportError::Pointer(format!("{}: {}", locator, e))),
        None => Ok(Resolved::Inline(body)),
    }
}

/// Stage two: fetch the named resource
pub async fn fetch(client: &Client, url: &Url) -> Result<Bytes, TransportError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| TransportError::Fetch(e.to_string()))?;

    let response = response
        .error_for_status()
        .map_err(|e| TransportError::Fetch(e.to_string()))?;

    response
        .bytes()
        .await
        .map_err(|e| TransportError::Fetch(e.to_string()))
}

/// Pointer-following poller feeding one gate
#[derive(Debug)]
pub struct Poller {
    client: Client,
    url: Url,
    interval: Duration,
    gate: GateService,
    last_digest: Option<String>,
    failing: bool,
}

impl Poller {
    /// Build from configuration
    pub fn new(config: &PollConfig, gate: GateService) -> gate_core::Result<Self> {
        let raw = config
            .url
            .as_deref()
            .ok_or_else(|| Error::Config("poll.url not set".to_string()))?;
        let url = Url::parse(raw).map_err(|e| Error::Config(format!("Invalid poll url: {}", e)))?;

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            interval: Duration::from_millis(config.interval_ms),
            gate,
            last_digest: None,
            failing: false,
        })
    }

    /// Run one resolve → fetch → deliver cycle
    pub async fn poll_once(&mut self) -> gate_core::Result<PollOutcome> {
        let bytes = match self.fetch_event().await {
            Ok(bytes) => bytes,
            Err(error) => return self.on_failure(error).await,
        };

        if self.failing {
            info!(url = %self.url, "Poll transport recovered");
            self.failing = false;
        }

        let digest = hex::encode(Sha256::digest(&bytes));
        if self.last_digest.as_deref() == Some(digest.as_str()) {
            debug!(sha256 = %digest, "Event document unchanged");
            return Ok(PollOutcome::Unchanged);
        }

        let delivery = self.gate.deliver(bytes).await?;
        self.last_digest = Some(digest);
        info!(
            verdict = delivery.verdict.label(),
            reason = delivery.verdict.reason().unwrap_or(""),
            "Polled event delivered"
        );
        Ok(PollOutcome::Delivered(delivery))
    }

    async fn fetch_event(&self) -> Result<Bytes, TransportError> {
        match resolve_pointer(&self.client, &self.url).await? {
            Resolved::Inline(bytes) => Ok(bytes),
            Resolved::Pointer(locator) => {
                debug!(%locator, "Following event pointer");
                fetch(&self.client, &locator).await
            }
        }
    }

    async fn on_failure(&mut self, error: TransportError) -> gate_core::Result<PollOutcome> {
        if self.failing {
            debug!(error = %error, "Poll still failing");
            return Ok(PollOutcome::Failed {
                error,
                reported: false,
            });
        }

        warn!(url = %self.url, error = %error, "Poll failed, failing closed");
        self.gate.report_transport_failure(error.clone()).await?;
        self.failing = true;
        Ok(PollOutcome::Failed {
            error,
            reported: true,
        })
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(url = %self.url, interval_ms = self.interval.as_millis() as u64, "Poller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "Gate unavailable, poller stopping");
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Poller stopped");
    }
}
