//! ovs-agentd - OVN port binding agent for Open vSwitch hosts
//!
//! Watches the OVN Southbound `Port_Binding` table for ports requested on
//! this chassis and realizes each one as a kernel tap device attached to
//! the integration bridge, removing both again when the binding goes away.

pub mod agent;
pub mod config;
pub mod logging;
pub mod netdev;
pub mod orchestrator;
pub mod switch;
pub mod tables;
pub mod types;
pub mod watcher;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use agent::{Agent, AgentContext, RunOutcome, StopReason, WorkerStats};
pub use config::{AgentConfig, CliArgs, LogFormat, LogRotation, LoggingConfig};
pub use netdev::{sanitize_iface_name, DeviceManager, IpLinkManager};
pub use orchestrator::Orchestrator;
pub use switch::{ensure_binding, remove_binding, EnsureOutcome, RemoveOutcome, SwitchDb};
pub use types::ConflictPolicy;
pub use watcher::{BindingWatcher, ChassisDirectory, Decision, HandleOutcome, SkipReason};
