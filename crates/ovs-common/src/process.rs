//! External process execution for the OVS command-line tools.
//!
//! Unlike a shell wrapper, programs are spawned directly with an argument
//! vector, so rule text and port names never pass through shell parsing.
//! Optional stdin is streamed to the child while its output is collected,
//! and the whole invocation is bounded by a timeout.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use ovs_common::process;
//!
//! let args = vec!["dump-flows".to_string(), "br-int".to_string()];
//! let out = process::exec_or_throw("ovs-ofctl", &args, None, Duration::from_secs(5)).await?;
//! ```

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{OvsError, OvsResult};

/// Result of a process execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success, -1 = killed by signal).
    pub exit_code: i32,
    /// Trimmed stdout output.
    pub stdout: String,
    /// Trimmed stderr output.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Renders a program and its arguments as a single line for logs and errors.
pub fn render_command(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Executes a program, optionally feeding `stdin`, within `timeout`.
///
/// # Returns
///
/// * `Ok(ExecResult)` - The process ran to completion (any exit code)
/// * `Err(OvsError::Spawn)` - The process could not be spawned or fed
/// * `Err(OvsError::Timeout)` - The process outlived `timeout` and was killed
pub async fn exec(
    program: &str,
    args: &[String],
    stdin: Option<&str>,
    timeout: Duration,
) -> OvsResult<ExecResult> {
    let command = render_command(program, args);
    tracing::debug!(command = %command, stdin_bytes = stdin.map_or(0, str::len), "Executing command");

    let spawn_err = |source| OvsError::Spawn {
        command: command.clone(),
        source,
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(spawn_err)?;

    let pipe = child.stdin.take();
    let input = stdin.unwrap_or_default().to_string();
    let feed = async move {
        if let Some(mut pipe) = pipe {
            pipe.write_all(input.as_bytes()).await?;
            pipe.shutdown().await?;
        }
        Ok::<(), std::io::Error>(())
    };

    let run = async { tokio::join!(feed, child.wait_with_output()) };
    let (fed, output) = match tokio::time::timeout(timeout, run).await {
        Ok(done) => done,
        Err(_) => {
            tracing::warn!(command = %command, ?timeout, "Command timed out");
            return Err(OvsError::Timeout {
                command: command.clone(),
                timeout,
            });
        }
    };
    let output = output.map_err(spawn_err)?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    // A child that exits without draining stdin breaks the pipe; its exit
    // status is what matters then.
    if let Err(e) = fed {
        if result.success() {
            return Err(spawn_err(e));
        }
    }

    if result.success() {
        tracing::trace!(command = %command, "Command succeeded");
    } else {
        tracing::warn!(
            command = %command,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Executes a program and returns an error on non-zero exit.
///
/// # Returns
///
/// * `Ok(String)` - The trimmed stdout on success
/// * `Err(OvsError)` - If the command cannot run, times out or exits non-zero
pub async fn exec_or_throw(
    program: &str,
    args: &[String],
    stdin: Option<&str>,
    timeout: Duration,
) -> OvsResult<String> {
    let result = exec(program, args, stdin, timeout).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(OvsError::CommandFailed {
            command: render_command(program, args),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_render_command() {
        let line = render_command("ovs-ofctl", &args(&["del-flows", "br-int", "--strict", "-"]));
        assert_eq!(line, "ovs-ofctl del-flows br-int --strict -");
        assert_eq!(render_command("ovs-vsctl", &[]), "ovs-vsctl");
    }

    #[test]
    fn test_exec_result_success() {
        let result = ExecResult {
            exit_code: 0,
            stdout: "output".to_string(),
            stderr: "".to_string(),
        };
        assert!(result.success());
        assert_eq!(result.combined_output(), "output");
    }

    #[test]
    fn test_exec_result_combined() {
        let result = ExecResult {
            exit_code: 1,
            stdout: "stdout".to_string(),
            stderr: "stderr".to_string(),
        };
        assert!(!result.success());
        assert_eq!(result.combined_output(), "stdout\nstderr");
    }

    #[tokio::test]
    async fn test_exec_echo() {
        let result = exec("echo", &args(&["hello"]), None, TIMEOUT).await.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "hello");
    }

    #[tokio::test]
    async fn test_exec_feeds_stdin() {
        let output = exec_or_throw("cat", &[], Some("flow-a\nflow-b"), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(output, "flow-a\nflow-b");
    }

    #[tokio::test]
    async fn test_exec_failure_exit_code() {
        let result = exec("sh", &args(&["-c", "exit 42"]), None, TIMEOUT)
            .await
            .unwrap();
        assert!(!result.success());
        assert_eq!(result.exit_code, 42);
    }

    #[tokio::test]
    async fn test_exec_or_throw_failure() {
        match exec_or_throw("sh", &args(&["-c", "exit 1"]), None, TIMEOUT).await {
            Err(OvsError::CommandFailed { exit_code, .. }) => assert_eq!(exit_code, 1),
            other => panic!("Expected CommandFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exec_missing_program() {
        let result = exec("/nonexistent/ovs-vsctl", &[], None, TIMEOUT).await;
        assert!(matches!(result, Err(OvsError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_exec_timeout() {
        let result = exec("sleep", &args(&["5"]), None, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(OvsError::Timeout { .. })));
    }
}
