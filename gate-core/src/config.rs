//! Configuration for the gate and its collaborators

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB (ledger)
    pub data_dir: PathBuf,

    /// Replay counter record; defaults to `<data_dir>.replay.json` beside the store
    pub replay_counter_path: Option<PathBuf>,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// HTTP listen address
    pub listen_addr: String,

    /// Log output format
    pub log_format: LogFormat,

    /// Gate actor mailbox capacity
    pub mailbox_capacity: usize,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Actuator configuration
    pub actuator: ActuatorConfig,

    /// Poll transport configuration
    pub poll: PollConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/gate"),
            replay_counter_path: None,
            service_name: "hbce-bridge".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            listen_addr: "127.0.0.1:17777".to_string(),
            log_format: LogFormat::Plain,
            mailbox_capacity: 64,
            rocksdb: RocksDBConfig::default(),
            actuator: ActuatorConfig::default(),
            poll: PollConfig::default(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines
    Plain,
    /// One JSON object per line
    Json,
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 16,
            max_write_buffer_number: 2,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Which actuator driver to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorMode {
    /// Record and log commands, send nothing
    DryRun,
    /// Send commands as UDP datagrams
    Udp,
}

/// Actuator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Driver selection
    pub mode: ActuatorMode,

    /// Drone command address
    pub target_addr: String,

    /// Local bind address for the UDP socket
    pub bind_addr: String,

    /// Forward translation per step (cm)
    pub forward_cm: u32,

    /// Rotation per step (degrees)
    pub rotate_deg: u32,

    /// Sent once when the UDP driver connects
    pub init_command: Option<String>,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            mode: ActuatorMode::DryRun,
            target_addr: "192.168.10.1:8889".to_string(),
            bind_addr: "0.0.0.0:0".to_string(),
            forward_cm: 20,
            rotate_deg: 15,
            init_command: Some("command".to_string()),
        }
    }
}

/// Poll transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Run the poller
    pub enabled: bool,

    /// Pointer or event document URL
    pub url: Option<String>,

    /// Interval between polls (milliseconds)
    pub interval_ms: u64,

    /// Per-request timeout (milliseconds)
    pub timeout_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            interval_ms: 2_000,
            timeout_ms: 5_000,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        Config::default().apply_env()
    }

    /// Override fields from `BRIDGE_*` environment variables
    pub fn apply_env(mut self) -> crate::Result<Self> {
        if let Ok(data_dir) = std::env::var("BRIDGE_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(path) = std::env::var("BRIDGE_REPLAY_COUNTER_PATH") {
            self.replay_counter_path = Some(PathBuf::from(path));
        }

        if let Ok(addr) = std::env::var("BRIDGE_LISTEN_ADDR") {
            self.listen_addr = addr;
        }

        if let Ok(format) = std::env::var("BRIDGE_LOG_FORMAT") {
            self.log_format = match format.as_str() {
                "json" => LogFormat::Json,
                "plain" => LogFormat::Plain,
                other => {
                    return Err(crate::Error::Config(format!("Unknown log format: {}", other)))
                }
            };
        }

        if let Ok(mode) = std::env::var("BRIDGE_ACTUATOR_MODE") {
            self.actuator.mode = match mode.as_str() {
                "dry_run" => ActuatorMode::DryRun,
                "udp" => ActuatorMode::Udp,
                other => {
                    return Err(crate::Error::Config(format!("Unknown actuator mode: {}", other)))
                }
            };
        }

        if let Ok(addr) = std::env::var("BRIDGE_ACTUATOR_ADDR") {
            self.actuator.target_addr = addr;
        }

        if let Ok(url) = std::env::var("BRIDGE_POLL_URL") {
            self.poll.url = Some(url);
            self.poll.enabled = true;
        }

        if let Ok(interval) = std::env::var("BRIDGE_POLL_INTERVAL_MS") {
            self.poll.interval_ms = interval
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid poll interval: {}", e)))?;
        }

        Ok(self)
    }

    /// Where the replay counter record lives
    ///
    /// Never inside `data_dir`: the store directory may be quarantined.
    pub fn counter_path(&self) -> crate::Result<PathBuf> {
        if let Some(path) = &self.replay_counter_path {
            return Ok(path.clone());
        }
        let name = self.data_dir.file_name().ok_or_else(|| {
            crate::Error::Config(format!(
                "data_dir {} has no final component",
                self.data_dir.display()
            ))
        })?;
        let mut file_name = name.to_os_string();
        file_name.push(".replay.json");
        Ok(self.data_dir.with_file_name(file_name))
    }

    /// Reject combinations that cannot run
    pub fn validate(&self) -> crate::Result<()> {
        let counter = self.counter_path()?;
        if counter.starts_with(&self.data_dir) {
            return Err(crate::Error::Config(
                "replay_counter_path must be outside data_dir".to_string(),
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(crate::Error::Config("mailbox_capacity must be > 0".to_string()));
        }
        if self.poll.enabled && self.poll.url.is_none() {
            return Err(crate::Error::Config("poll.enabled requires poll.url".to_string()));
        }
        if self.poll.interval_ms == 0 {
            return Err(crate::Error::Config("poll.interval_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr, "127.0.0.1:17777");
        assert_eq!(config.actuator.mode, ActuatorMode::DryRun);
        assert!(!config.poll.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "/var/lib/bridge"

            [actuator]
            mode = "udp"
            forward_cm = 50

            [poll]
            enabled = true
            url = "https://example.org/pointer.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/bridge"));
        assert_eq!(config.actuator.mode, ActuatorMode::Udp);
        assert_eq!(config.actuator.forward_cm, 50);
        assert_eq!(config.actuator.rotate_deg, 15);
        assert_eq!(config.listen_addr, "127.0.0.1:17777");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_counter_path_beside_store() {
        let mut config = Config::default();
        config.data_dir = PathBuf::from("/var/lib/bridge/gate/");
        assert_eq!(
            config.counter_path().unwrap(),
            PathBuf::from("/var/lib/bridge/gate.replay.json")
        );

        config.replay_counter_path = Some(PathBuf::from("/var/lib/bridge/gate/counter.json"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_without_url_rejected() {
        let mut config = Config::default();
        config.poll.enabled = true;
        assert!(config.validate().is_err());
    }
}
