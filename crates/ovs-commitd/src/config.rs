//! Configuration file support for ovs-commitd
//!
//! Loads and validates the daemon configuration from TOML.
//! Default location: /etc/tuplenet/ovs-commitd.toml

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ovs_common::{OvsCliConfig, OvsError, OvsResult, DEFAULT_RETRY_ATTEMPTS};
use serde::{Deserialize, Serialize};

use crate::bridge::{DEFAULT_TLV_MAX_ATTEMPTS, DEFAULT_TLV_RETRY_DELAY};
use crate::types::{IpfixSettings, DEFAULT_BATCH_SIZE, DEFAULT_BRIDGE, DEFAULT_TLV_CLASS};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/tuplenet/ovs-commitd.toml";

/// Switch access settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OvsConfig {
    #[serde(default = "default_vsctl_path")]
    pub vsctl_path: String,

    #[serde(default = "default_ofctl_path")]
    pub ofctl_path: String,

    #[serde(default = "default_ovsdb_client_path")]
    pub ovsdb_client_path: String,

    /// OVSDB server socket
    #[serde(default = "default_db_socket")]
    pub db_socket: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per administrative call
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Delay before restarting an exited monitor, in milliseconds
    #[serde(default = "default_monitor_restart_ms")]
    pub monitor_restart_ms: u64,
}

/// Integration bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_name")]
    pub name: String,

    /// Option class of the tunnel metadata TLV
    #[serde(default = "default_tlv_class")]
    pub tlv_class: u16,

    #[serde(default = "default_tlv_max_attempts")]
    pub tlv_max_attempts: u32,

    #[serde(default = "default_tlv_retry_delay_ms")]
    pub tlv_retry_delay_ms: u64,

    /// Create the DSR gateway port during bootstrap
    #[serde(default)]
    pub dsr_port: bool,

    /// Wipe the flow table during bootstrap
    #[serde(default)]
    pub clean_flows: bool,
}

/// Flow commit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowsConfig {
    /// Maximum rules per batched invocation
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Directory for full-table replace files
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

/// IPFIX export, absent when not configured
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfixConfig {
    /// Collector, `ip:port`
    pub collector: String,
    pub domain_id: u32,
    pub point_id: u32,
    pub sampling_rate: u32,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Complete ovs-commitd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitConfig {
    #[serde(default)]
    pub ovs: OvsConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub flows: FlowsConfig,

    #[serde(default)]
    pub ipfix: Option<IpfixConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_vsctl_path() -> String {
    "ovs-vsctl".to_string()
}

fn default_ofctl_path() -> String {
    "ovs-ofctl".to_string()
}

fn default_ovsdb_client_path() -> String {
    "ovsdb-client".to_string()
}

fn default_db_socket() -> String {
    "unix:/var/run/openvswitch/db.sock".to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_monitor_restart_ms() -> u64 {
    1000
}

fn default_bridge_name() -> String {
    DEFAULT_BRIDGE.to_string()
}

fn default_tlv_class() -> u16 {
    DEFAULT_TLV_CLASS
}

fn default_tlv_max_attempts() -> u32 {
    DEFAULT_TLV_MAX_ATTEMPTS
}

fn default_tlv_retry_delay_ms() -> u64 {
    DEFAULT_TLV_RETRY_DELAY.as_millis() as u64
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for OvsConfig {
    fn default() -> Self {
        Self {
            vsctl_path: default_vsctl_path(),
            ofctl_path: default_ofctl_path(),
            ovsdb_client_path: default_ovsdb_client_path(),
            db_socket: default_db_socket(),
            timeout_secs: default_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            monitor_restart_ms: default_monitor_restart_ms(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: default_bridge_name(),
            tlv_class: default_tlv_class(),
            tlv_max_attempts: default_tlv_max_attempts(),
            tlv_retry_delay_ms: default_tlv_retry_delay_ms(),
            dsr_port: false,
            clean_flows: false,
        }
    }
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            temp_dir: default_temp_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl From<&IpfixConfig> for IpfixSettings {
    fn from(cfg: &IpfixConfig) -> Self {
        IpfixSettings {
            collector: cfg.collector.clone(),
            domain_id: cfg.domain_id,
            point_id: cfg.point_id,
            sampling_rate: cfg.sampling_rate,
        }
    }
}

impl CommitConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> OvsResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content).map_err(|e| match e {
                OvsError::InvalidConfig { message, .. } => {
                    OvsError::invalid_config(path.display().to_string(), message)
                }
                other => other,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(OvsError::invalid_config(
                path.display().to_string(),
                e.to_string(),
            )),
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> OvsResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| OvsError::invalid_config("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> OvsResult<()> {
        if self.ovs.timeout_secs == 0 {
            return Err(OvsError::invalid_config("ovs.timeout_secs", "must be > 0"));
        }
        if self.ovs.retry_attempts == 0 {
            return Err(OvsError::invalid_config("ovs.retry_attempts", "must be > 0"));
        }
        if self.bridge.name.is_empty() {
            return Err(OvsError::invalid_config("bridge.name", "must not be empty"));
        }
        if self.bridge.tlv_max_attempts == 0 {
            return Err(OvsError::invalid_config("bridge.tlv_max_attempts", "must be > 0"));
        }
        if self.flows.batch_size == 0 {
            return Err(OvsError::invalid_config("flows.batch_size", "must be > 0"));
        }
        if let Some(ipfix) = &self.ipfix {
            if ipfix.collector.is_empty() {
                return Err(OvsError::invalid_config("ipfix.collector", "must not be empty"));
            }
        }
        Ok(())
    }

    /// Settings for the command-line channel
    pub fn cli_config(&self) -> OvsCliConfig {
        OvsCliConfig {
            vsctl_path: self.ovs.vsctl_path.clone(),
            ofctl_path: self.ovs.ofctl_path.clone(),
            ovsdb_client_path: self.ovs.ovsdb_client_path.clone(),
            db_socket: self.ovs.db_socket.clone(),
            timeout: Duration::from_secs(self.ovs.timeout_secs),
            retry_attempts: self.ovs.retry_attempts,
            monitor_restart_delay: Duration::from_millis(self.ovs.monitor_restart_ms),
        }
    }

    pub fn tlv_retry_delay(&self) -> Duration {
        Duration::from_millis(self.bridge.tlv_retry_delay_ms)
    }

    pub fn ipfix_settings(&self) -> Option<IpfixSettings> {
        self.ipfix.as_ref().map(IpfixSettings::from)
    }
}
