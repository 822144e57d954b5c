//! [`OvsChannel`] backed by the Open vSwitch command-line tools.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{OvsChannel, OvsProgram, TableUpdate, DEFAULT_RETRY_ATTEMPTS};
use crate::error::{OvsError, OvsResult};
use crate::ovsdb;
use crate::process;

/// Queue depth between the monitor process reader and its subscriber.
const MONITOR_QUEUE_DEPTH: usize = 256;

/// Database name monitored by `ovsdb-client`.
const OVSDB_DATABASE: &str = "Open_vSwitch";

/// Settings for [`OvsCli`].
#[derive(Debug, Clone)]
pub struct OvsCliConfig {
    /// Path to `ovs-vsctl`.
    pub vsctl_path: String,
    /// Path to `ovs-ofctl`.
    pub ofctl_path: String,
    /// Path to `ovsdb-client`.
    pub ovsdb_client_path: String,
    /// OVSDB server socket (e.g. `unix:/var/run/openvswitch/db.sock`).
    pub db_socket: String,
    /// Per-call timeout, passed to the tools and enforced on the process.
    pub timeout: Duration,
    /// Attempts per call in `run_with_retry`.
    pub retry_attempts: u32,
    /// Delay before restarting a monitor process that exited.
    pub monitor_restart_delay: Duration,
}

impl Default for OvsCliConfig {
    fn default() -> Self {
        Self {
            vsctl_path: "ovs-vsctl".to_string(),
            ofctl_path: "ovs-ofctl".to_string(),
            ovsdb_client_path: "ovsdb-client".to_string(),
            db_socket: "unix:/var/run/openvswitch/db.sock".to_string(),
            timeout: Duration::from_secs(5),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            monitor_restart_delay: Duration::from_secs(1),
        }
    }
}

/// Command channel that spawns one OVS tool process per call.
#[derive(Debug, Clone)]
pub struct OvsCli {
    config: OvsCliConfig,
}

impl OvsCli {
    pub fn new(config: OvsCliConfig) -> Self {
        Self { config }
    }

    fn program_path(&self, program: OvsProgram) -> &str {
        match program {
            OvsProgram::Vsctl => &self.config.vsctl_path,
            OvsProgram::Ofctl => &self.config.ofctl_path,
        }
    }

    fn monitor_args(&self, table: &str, columns: &[&str]) -> Vec<String> {
        vec![
            "monitor".to_string(),
            self.config.db_socket.clone(),
            OVSDB_DATABASE.to_string(),
            table.to_string(),
            columns.join(","),
            "--format=json".to_string(),
        ]
    }
}

fn spawn_monitor(path: &str, args: &[String]) -> std::io::Result<Child> {
    Command::new(path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
}

/// Pumps one monitor process until it exits or the subscriber goes away.
///
/// Returns `false` once the subscriber has dropped its receiver.
async fn pump_monitor(mut child: Child, table: &str, tx: &mpsc::Sender<TableUpdate>) -> bool {
    let Some(stdout) = child.stdout.take() else {
        warn!(table, "Monitor process has no stdout");
        return !tx.is_closed();
    };

    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match ovsdb::parse_monitor_update(table, &line) {
                Ok(update) if update.rows.is_empty() => {}
                Ok(update) => {
                    if tx.send(update).await.is_err() {
                        debug!(table, "Monitor subscriber dropped");
                        return false;
                    }
                }
                Err(e) => debug!(table, error = %e, "Skipping unparsable monitor output"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(table, error = %e, "Failed to read monitor output");
                break;
            }
        }
    }

    match child.wait().await {
        Ok(status) => info!(table, %status, "Monitor process exited"),
        Err(e) => warn!(table, error = %e, "Failed to reap monitor process"),
    }
    !tx.is_closed()
}

#[async_trait]
impl OvsChannel for OvsCli {
    async fn run(
        &self,
        program: OvsProgram,
        args: &[String],
        stdin: Option<&str>,
    ) -> OvsResult<String> {
        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(format!("--timeout={}", self.config.timeout.as_secs().max(1)));
        full_args.extend_from_slice(args);

        // The tool gets the first chance to give up cleanly.
        let hard_timeout = self.config.timeout + Duration::from_secs(1);
        process::exec_or_throw(self.program_path(program), &full_args, stdin, hard_timeout).await
    }

    fn retry_attempts(&self) -> u32 {
        self.config.retry_attempts
    }

    async fn subscribe(
        &self,
        table: &str,
        columns: &[&str],
    ) -> OvsResult<mpsc::Receiver<TableUpdate>> {
        let path = self.config.ovsdb_client_path.clone();
        let args = self.monitor_args(table, columns);
        let restart_delay = self.config.monitor_restart_delay;
        let table = table.to_string();

        let first = spawn_monitor(&path, &args)
            .map_err(|e| OvsError::monitor(&table, format!("failed to spawn {}: {}", path, e)))?;
        info!(table = %table, command = %process::render_command(&path, &args), "Monitoring table");

        let (tx, rx) = mpsc::channel(MONITOR_QUEUE_DEPTH);
        tokio::spawn(async move {
            let mut child = first;
            loop {
                if !pump_monitor(child, &table, &tx).await {
                    break;
                }
                tokio::time::sleep(restart_delay).await;
                child = loop {
                    match spawn_monitor(&path, &args) {
                        Ok(child) => break child,
                        Err(e) => {
                            warn!(table = %table, error = %e, "Failed to restart monitor");
                            if tx.is_closed() {
                                return;
                            }
                            tokio::time::sleep(restart_delay).await;
                        }
                    }
                };
                info!(table = %table, "Monitor restarted, expecting initial replay");
            }
        });

        Ok(rx)
    }
}
