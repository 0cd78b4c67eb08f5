//! Shell command execution for kernel device management.
//!
//! Device operations are carried out with iproute2 commands run through
//! `/bin/sh -c`. Every caller-supplied token must go through
//! [`shellquote`] before it is interpolated into a command line.
//!
//! # Example
//!
//! ```ignore
//! use ovs_agent_common::shell::{self, IP_CMD, shellquote};
//!
//! let cmd = format!("{} link set dev {} up", IP_CMD, shellquote("lp1"));
//! shell::exec_or_throw(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{AgentError, AgentResult};

/// Default path to the `ip` command.
pub const IP_CMD: &str = "/sbin/ip";

/// Shell used to run command lines.
pub const SH_CMD: &str = "/bin/sh";

/// Characters that need escaping inside shell double quotes:
/// `$`, backtick, `"`, `\` and newline.
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe use in shell commands.
///
/// The string is wrapped in double quotes and every character with special
/// meaning inside double quotes is backslash-escaped.
///
/// ```
/// use ovs_agent_common::shell::shellquote;
///
/// assert_eq!(shellquote("lp1"), "\"lp1\"");
/// assert_eq!(shellquote("a$b"), "\"a\\$b\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success, -1 = killed by signal).
    pub exit_code: i32,
    /// Trimmed stdout.
    pub stdout: String,
    /// Trimmed stderr.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Executes a shell command asynchronously.
///
/// A non-zero exit status is not an error here; inspect
/// [`ExecResult::success`]. The child is killed if the returned future is
/// dropped before it completes, so wrapping the call in a cancellation
/// `select!` stops the process too.
pub async fn exec(cmd: &str) -> AgentResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = Command::new(SH_CMD)
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| AgentError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        tracing::trace!(command = %cmd, "Command succeeded");
    } else {
        tracing::debug!(
            command = %cmd,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Executes a shell command and fails on a non-zero exit status.
///
/// Returns stdout on success.
pub async fn exec_or_throw(cmd: &str) -> AgentResult<String> {
    let result = exec(cmd).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(AgentError::ShellCommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shellquote_device_names() {
        assert_eq!(shellquote("lp1"), "\"lp1\"");
        assert_eq!(shellquote("vm-01-eth0"), "\"vm-01-eth0\"");
        assert_eq!(shellquote(""), "\"\"");
    }

    #[test]
    fn test_shellquote_special_chars() {
        assert_eq!(shellquote("$HOME"), "\"\\$HOME\"");
        assert_eq!(shellquote("`id`"), "\"\\`id\\`\"");
        assert_eq!(shellquote("a\"b"), "\"a\\\"b\"");
        assert_eq!(shellquote("a\\b"), "\"a\\\\b\"");
        assert_eq!(shellquote("a\nb"), "\"a\\\nb\"");
    }

    #[test]
    fn test_exec_result_output() {
        let only_err = ExecResult {
            exit_code: 1,
            stdout: String::new(),
            stderr: "Device \"lp1\" does not exist.".to_string(),
        };
        assert!(!only_err.success());
        assert_eq!(only_err.combined_output(), "Device \"lp1\" does not exist.");

        let both = ExecResult {
            exit_code: 0,
            stdout: "out".to_string(),
            stderr: "warn".to_string(),
        };
        assert!(both.success());
        assert_eq!(both.combined_output(), "out\nwarn");
    }

    #[tokio::test]
    async fn test_exec_echo() {
        let result = exec("echo hello").await.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "hello");
    }

    #[tokio::test]
    async fn test_exec_nonzero_is_not_an_error() {
        let result = exec("exit 3").await.unwrap();
        assert!(!result.success());
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn test_exec_or_throw_failure() {
        match exec_or_throw("echo boom >&2; exit 2").await {
            Err(AgentError::ShellCommandFailed {
                exit_code, output, ..
            }) => {
                assert_eq!(exit_code, 2);
                assert_eq!(output, "boom");
            }
            other => panic!("Expected ShellCommandFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exec_dropped_future_kills_child() {
        let run = exec("sleep 5");
        let timed = tokio::time::timeout(std::time::Duration::from_millis(50), run).await;
        assert!(timed.is_err());
    }
}
