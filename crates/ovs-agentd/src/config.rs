//! Configuration file and command line support for ovs-agentd
//!
//! Settings are read from a TOML file (default
//! `/etc/ovs-agent/agent.toml`); every field has a default so a missing
//! file or section is fine. Command line flags and their environment
//! fallbacks override file values.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use ovs_agent_common::{shell, AgentError, AgentResult};
use ovsdb_client::Endpoint;
use serde::{Deserialize, Serialize};

use crate::types::ConflictPolicy;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ovs-agent/agent.toml";

/// Smallest MTU the kernel accepts for IPv4 interfaces
const MIN_MTU: u32 = 68;

/// Largest MTU representable on a tap device
const MAX_MTU: u32 = 65535;

/// Identity of this host and where its ports go
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Chassis name matched against `options:requested-chassis`
    #[serde(default)]
    pub chassis: String,

    /// Integration bridge ports are attached to
    #[serde(default = "default_bridge")]
    pub bridge: String,

    /// Handling of pre-existing ports and interfaces
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

/// OVN Southbound connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SouthboundConfig {
    #[serde(default = "default_southbound_endpoint")]
    pub endpoint: String,
}

/// Local Open vSwitch database connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OvsdbConfig {
    #[serde(default = "default_ovsdb_endpoint")]
    pub endpoint: String,

    /// Deadline for a single transaction in seconds
    #[serde(default = "default_transaction_timeout")]
    pub transaction_timeout_secs: u64,
}

/// Tap device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetdevConfig {
    #[serde(default = "default_mtu")]
    pub mtu: u32,

    /// Create taps with virtio-net header framing
    #[serde(default = "default_vnet_hdr")]
    pub vnet_hdr: bool,

    /// Path to the iproute2 `ip` binary
    #[serde(default = "default_ip_cmd")]
    pub ip_cmd: String,
}

/// Event processing and lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Capacity of the notification queue feeding the worker
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// How long shutdown waits for an in-flight binding before cancelling it
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Pause after the monitors are established before processing events
    #[serde(default = "default_startup_settle")]
    pub startup_settle_ms: u64,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// How often the log file is rolled over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

/// Log filter, format and sinks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Log file; rotated files get a date suffix. No file when unset.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Also write to stdout when a file is configured
    #[serde(default = "default_log_to_stdout")]
    pub to_stdout: bool,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Rotated files kept next to the active one; 0 keeps all of them
    #[serde(default = "default_log_max_files")]
    pub max_files: usize,
}

/// Complete ovs-agentd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub southbound: SouthboundConfig,

    #[serde(default)]
    pub ovsdb: OvsdbConfig,

    #[serde(default)]
    pub netdev: NetdevConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default functions
fn default_bridge() -> String {
    "br-int".to_string()
}

fn default_southbound_endpoint() -> String {
    "tcp:127.0.0.1:6642".to_string()
}

fn default_ovsdb_endpoint() -> String {
    "unix:/usr/local/var/run/openvswitch/db.sock".to_string()
}

fn default_transaction_timeout() -> u64 {
    10
}

fn default_mtu() -> u32 {
    1500
}

fn default_vnet_hdr() -> bool {
    true
}

fn default_ip_cmd() -> String {
    shell::IP_CMD.to_string()
}

fn default_event_queue_capacity() -> usize {
    1000
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_startup_settle() -> u64 {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_to_stdout() -> bool {
    true
}

fn default_log_max_files() -> usize {
    7
}

// Default implementations
impl Default for AgentSection {
    fn default() -> Self {
        Self {
            chassis: String::new(),
            bridge: default_bridge(),
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

impl Default for SouthboundConfig {
    fn default() -> Self {
        Self {
            endpoint: default_southbound_endpoint(),
        }
    }
}

impl Default for OvsdbConfig {
    fn default() -> Self {
        Self {
            endpoint: default_ovsdb_endpoint(),
            transaction_timeout_secs: default_transaction_timeout(),
        }
    }
}

impl Default for NetdevConfig {
    fn default() -> Self {
        Self {
            mtu: default_mtu(),
            vnet_hdr: default_vnet_hdr(),
            ip_cmd: default_ip_cmd(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: default_event_queue_capacity(),
            shutdown_grace_secs: default_shutdown_grace(),
            startup_settle_ms: default_startup_settle(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
            to_stdout: default_log_to_stdout(),
            rotation: LogRotation::default(),
            max_files: default_log_max_files(),
        }
    }
}

/// Command line arguments
#[derive(Debug, Clone, Parser)]
#[command(name = "ovs-agentd", version, about = "OVN port binding agent for Open vSwitch hosts")]
pub struct CliArgs {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Chassis name of this host
    #[arg(long, env = "OVS_AGENT_CHASSIS")]
    pub chassis: Option<String>,

    /// Southbound endpoint (tcp:HOST:PORT or unix:PATH)
    #[arg(long, env = "OVS_AGENT_SOUTHBOUND")]
    pub southbound: Option<String>,

    /// Local OVSDB endpoint (tcp:HOST:PORT or unix:PATH)
    #[arg(long)]
    pub ovsdb: Option<String>,

    /// Integration bridge
    #[arg(long)]
    pub bridge: Option<String>,

    /// Log filter, e.g. "info" or "ovs_agentd=debug"
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Write logs to this file as well
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Whether to keep logging to stdout when a log file is set
    #[arg(long, env = "LOG_TO_STDOUT")]
    pub log_to_stdout: Option<bool>,
}

impl AgentConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> AgentResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                AgentError::config(
                    path.display().to_string(),
                    format!("failed to parse: {e}"),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!(
                    "ovs-agentd: Config file {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(AgentError::config(
                path.display().to_string(),
                format!("failed to read: {e}"),
            )),
        }
    }

    /// Applies command line values on top of the file configuration.
    pub fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(chassis) = &args.chassis {
            self.agent.chassis = chassis.clone();
        }
        if let Some(endpoint) = &args.southbound {
            self.southbound.endpoint = endpoint.clone();
        }
        if let Some(endpoint) = &args.ovsdb {
            self.ovsdb.endpoint = endpoint.clone();
        }
        if let Some(bridge) = &args.bridge {
            self.agent.bridge = bridge.clone();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if let Some(format) = args.log_format {
            self.logging.format = format;
        }
        if let Some(file) = &args.log_file {
            self.logging.file = Some(file.clone());
        }
        if let Some(to_stdout) = args.log_to_stdout {
            self.logging.to_stdout = to_stdout;
        }
    }

    pub fn southbound_endpoint(&self) -> AgentResult<Endpoint> {
        self.southbound
            .endpoint
            .parse()
            .map_err(|e| AgentError::config("southbound.endpoint", format!("{e}")))
    }

    pub fn ovsdb_endpoint(&self) -> AgentResult<Endpoint> {
        self.ovsdb
            .endpoint
            .parse()
            .map_err(|e| AgentError::config("ovsdb.endpoint", format!("{e}")))
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.ovsdb.transaction_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.runtime.shutdown_grace_secs)
    }

    pub fn startup_settle(&self) -> Duration {
        Duration::from_millis(self.runtime.startup_settle_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> AgentResult<()> {
        if self.agent.chassis.trim().is_empty() {
            return Err(AgentError::config(
                "agent.chassis",
                "chassis name must be set",
            ));
        }

        if self.agent.bridge.is_empty() {
            return Err(AgentError::config("agent.bridge", "bridge name must be set"));
        }

        self.southbound_endpoint()?;
        self.ovsdb_endpoint()?;

        if !(MIN_MTU..=MAX_MTU).contains(&self.netdev.mtu) {
            return Err(AgentError::config(
                "netdev.mtu",
                format!("must be {MIN_MTU}-{MAX_MTU}, got {}", self.netdev.mtu),
            ));
        }

        if self.runtime.event_queue_capacity == 0 {
            return Err(AgentError::config(
                "runtime.event_queue_capacity",
                "must be > 0",
            ));
        }

        match &self.logging.file {
            Some(file) if file.file_name().is_none() => {
                return Err(AgentError::config(
                    "logging.file",
                    format!("'{}' does not name a file", file.display()),
                ));
            }
            None if !self.logging.to_stdout => {
                return Err(AgentError::config(
                    "logging.to_stdout",
                    "disabling stdout requires logging.file",
                ));
            }
            _ => {}
        }

        if self.ovsdb.transaction_timeout_secs == 0 {
            return Err(AgentError::config(
                "ovsdb.transaction_timeout_secs",
                "must be > 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.agent.chassis = "host-A".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.agent.bridge, "br-int");
        assert_eq!(config.agent.conflict_policy, ConflictPolicy::Strict);
        assert_eq!(config.netdev.mtu, 1500);
        assert!(config.netdev.vnet_hdr);
        assert_eq!(config.runtime.event_queue_capacity, 1000);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.startup_settle(), Duration::from_millis(200));
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.logging.file, None);
        assert!(config.logging.to_stdout);
        assert_eq!(config.logging.rotation, LogRotation::Daily);
        assert_eq!(config.logging.max_files, 7);
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[agent]
chassis = "host-A"
conflict_policy = "adopt"

[southbound]
endpoint = "tcp:10.0.0.1:6642"

[netdev]
mtu = 9000

[logging]
format = "json"
"#;
        let config: AgentConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.agent.chassis, "host-A");
        assert_eq!(config.agent.conflict_policy, ConflictPolicy::Adopt);
        assert_eq!(config.netdev.mtu, 9000);
        assert_eq!(config.logging.format, LogFormat::Json);
        // Unspecified values should use defaults
        assert_eq!(config.agent.bridge, "br-int");
        assert!(config.netdev.vnet_hdr);
        assert_eq!(
            config.southbound_endpoint().unwrap(),
            Endpoint::Tcp("10.0.0.1:6642".to_string())
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent]\nchassis = \"host-B\"\nbridge = \"br-test\"").unwrap();

        let config = AgentConfig::load_or_default(file.path()).unwrap();
        assert_eq!(config.agent.chassis, "host-B");
        assert_eq!(config.agent.bridge, "br-test");
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = AgentConfig::load_or_default("/nonexistent/agent.toml").unwrap();
        assert_eq!(config.agent.bridge, "br-int");
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent\nchassis = ").unwrap();
        let err = AgentConfig::load_or_default(file.path()).unwrap_err();
        assert!(matches!(err, AgentError::Config { .. }));
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());
        assert!(AgentConfig::default().validate().is_err());

        let mut config = valid();
        config.netdev.mtu = 67;
        assert!(config.validate().is_err());
        config.netdev.mtu = 65535;
        assert!(config.validate().is_ok());

        let mut config = valid();
        config.runtime.event_queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.southbound.endpoint = "10.0.0.1:6642".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_logging_file_settings() {
        let toml_str = r#"
[agent]
chassis = "host-A"

[logging]
file = "/var/log/ovs-agent/agent.log"
to_stdout = false
rotation = "hourly"
max_files = 3
"#;
        let config: AgentConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.logging.file,
            Some(PathBuf::from("/var/log/ovs-agent/agent.log"))
        );
        assert!(!config.logging.to_stdout);
        assert_eq!(config.logging.rotation, LogRotation::Hourly);
        assert_eq!(config.logging.max_files, 3);
        assert!(config.validate().is_ok());

        let mut config = valid();
        config.logging.to_stdout = false;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("logging.to_stdout"), "{err}");

        config.logging.file = Some(PathBuf::from("/"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("logging.file"), "{err}");
    }

    #[test]
    fn test_cli_log_file_overrides() {
        let args = CliArgs::parse_from([
            "ovs-agentd",
            "--log-file",
            "/tmp/agent.log",
            "--log-to-stdout",
            "false",
        ]);
        let mut config = valid();
        config.apply_overrides(&args);
        assert_eq!(config.logging.file, Some(PathBuf::from("/tmp/agent.log")));
        assert!(!config.logging.to_stdout);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_overrides() {
        let args = CliArgs::parse_from([
            "ovs-agentd",
            "--chassis",
            "host-C",
            "--southbound",
            "tcp:192.0.2.1:6642",
            "--bridge",
            "br-alt",
            "--log-format",
            "json",
        ]);
        let mut config = AgentConfig::default();
        config.apply_overrides(&args);

        assert_eq!(config.agent.chassis, "host-C");
        assert_eq!(config.southbound.endpoint, "tcp:192.0.2.1:6642");
        assert_eq!(config.agent.bridge, "br-alt");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(config.validate().is_ok());
    }
}
