//! Common infrastructure for the OVS host reconciliation agent.
//!
//! - [`error`]: the error taxonomy shared by every reconciliation step
//! - [`shell`]: iproute2 command execution with proper quoting
//!
//! # Example
//!
//! ```ignore
//! use ovs_agent_common::{
//!     shell::{self, IP_CMD, shellquote},
//!     AgentResult,
//! };
//!
//! async fn set_up(device: &str) -> AgentResult<()> {
//!     let cmd = format!("{} link set dev {} up", IP_CMD, shellquote(device));
//!     shell::exec_or_throw(&cmd).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod shell;

pub use error::{AgentError, AgentResult};
