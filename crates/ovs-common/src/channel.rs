//! The command channel capability.
//!
//! Everything the commit layer does to the switch goes through an
//! [`OvsChannel`]: one-shot administrative commands and a streaming
//! subscription to OVSDB table changes. Production code uses
//! [`crate::OvsCli`]; tests substitute an in-memory switch.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::OvsResult;

/// Attempts made by [`OvsChannel::run_with_retry`] unless overridden.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// The administrative entry points of the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OvsProgram {
    /// Configuration database control surface (`ovs-vsctl`).
    Vsctl,
    /// Flow table control surface (`ovs-ofctl`).
    Ofctl,
}

impl OvsProgram {
    /// Returns the conventional executable name.
    pub fn name(&self) -> &'static str {
        match self {
            OvsProgram::Vsctl => "ovs-vsctl",
            OvsProgram::Ofctl => "ovs-ofctl",
        }
    }
}

impl std::fmt::Display for OvsProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of a table monitor update.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    /// Row UUID, when the monitor reports it.
    pub uuid: Option<String>,
    /// Monitor action: `initial`, `insert`, `delete`, `old` or `new`.
    pub action: String,
    /// Monitored column values as raw OVSDB datums.
    pub columns: BTreeMap<String, Value>,
}

impl TableRow {
    /// Returns the raw datum of a column, if the update carried it.
    pub fn column(&self, name: &str) -> Option<&Value> {
        self.columns.get(name)
    }
}

/// A batch of rows delivered by one monitor notification.
#[derive(Debug, Clone, PartialEq)]
pub struct TableUpdate {
    /// The monitored table (e.g. "Interface").
    pub table: String,
    /// Rows in the order the monitor printed them.
    pub rows: Vec<TableRow>,
}

/// Command execution and event subscription against the local switch.
///
/// Implementations must be shareable between the reconciliation cycle and
/// the monitor task.
#[async_trait]
pub trait OvsChannel: Send + Sync {
    /// Runs one administrative command, returning its trimmed stdout.
    ///
    /// Fails on spawn errors, timeouts and non-zero exits alike.
    async fn run(
        &self,
        program: OvsProgram,
        args: &[String],
        stdin: Option<&str>,
    ) -> OvsResult<String>;

    /// Number of attempts made by [`OvsChannel::run_with_retry`].
    fn retry_attempts(&self) -> u32 {
        DEFAULT_RETRY_ATTEMPTS
    }

    /// Runs a command, retrying uniformly on any failure.
    ///
    /// Failures are not classified: a syntax error is retried exactly like a
    /// transient timeout. The last error is returned once attempts run out.
    async fn run_with_retry(
        &self,
        program: OvsProgram,
        args: &[String],
        stdin: Option<&str>,
    ) -> OvsResult<String> {
        let attempts = self.retry_attempts().max(1);
        let mut attempt = 1;
        loop {
            match self.run(program, args, stdin).await {
                Ok(output) => return Ok(output),
                Err(e) if attempt < attempts => {
                    tracing::debug!(
                        program = %program,
                        attempt,
                        attempts,
                        error = %e,
                        "Command failed, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Subscribes to change notifications on an OVSDB table.
    ///
    /// Each received [`TableUpdate`] is one notification batch. Delivery is
    /// ordered; after a reconnect the current contents are replayed with
    /// action `initial`.
    async fn subscribe(
        &self,
        table: &str,
        columns: &[&str],
    ) -> OvsResult<mpsc::Receiver<TableUpdate>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OvsError;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then echoes the first argument.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl OvsChannel for Flaky {
        async fn run(
            &self,
            program: OvsProgram,
            args: &[String],
            _stdin: Option<&str>,
        ) -> OvsResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(OvsError::CommandFailed {
                    command: program.to_string(),
                    exit_code: 1,
                    output: format!("failure {}", n + 1),
                });
            }
            Ok(args.first().cloned().unwrap_or_default())
        }

        async fn subscribe(
            &self,
            table: &str,
            _columns: &[&str],
        ) -> OvsResult<mpsc::Receiver<TableUpdate>> {
            Err(OvsError::monitor(table, "unsupported"))
        }
    }

    fn flaky(failures: u32) -> Flaky {
        Flaky {
            failures,
            calls: AtomicU32::new(0),
        }
    }

    #[test]
    fn test_program_names() {
        assert_eq!(OvsProgram::Vsctl.name(), "ovs-vsctl");
        assert_eq!(OvsProgram::Ofctl.to_string(), "ovs-ofctl");
    }

    #[tokio::test]
    async fn test_retry_recovers_within_attempts() {
        let channel = flaky(2);
        let out = channel
            .run_with_retry(OvsProgram::Vsctl, &["show".to_string()], None)
            .await
            .unwrap();
        assert_eq!(out, "show");
        assert_eq!(channel.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_returns_last_error() {
        let channel = flaky(10);
        let err = channel
            .run_with_retry(OvsProgram::Ofctl, &[], None)
            .await
            .unwrap_err();
        assert_eq!(channel.calls.load(Ordering::SeqCst), DEFAULT_RETRY_ATTEMPTS);
        assert!(err.to_string().contains("failure 3"));
    }

    #[test]
    fn test_table_row_column() {
        let mut columns = BTreeMap::new();
        columns.insert("name".to_string(), Value::String("br-int".to_string()));
        let row = TableRow {
            uuid: None,
            action: "initial".to_string(),
            columns,
        };
        assert_eq!(row.column("name"), Some(&Value::String("br-int".to_string())));
        assert_eq!(row.column("ofport"), None);
    }
}
