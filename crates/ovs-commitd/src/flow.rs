//! Flow commit engine
//!
//! Applies flow diffs to a bridge's forwarding table. Diffs are pushed in
//! batches of at most `batch_size` rules over stdin; if any batch fails the
//! engine abandons batching and applies the remaining removals and additions
//! one rule at a time, logging and skipping rules that still fail.
//!
//! All table mutations made through one [`FlowCommitter`] are serialized by
//! an internal lock held for the whole operation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use ovs_common::{OvsChannel, OvsError, OvsProgram, OvsResult};
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::commands::*;
use crate::types::{FlowDiff, DEFAULT_BATCH_SIZE, DEFAULT_BRIDGE};

/// Characters used for the random part of a flow file name.
const FLOW_FILE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Splits `rules` into newline-joined chunks of at most `size` rules.
///
/// Concatenating the chunks (with newlines) yields the input in order.
pub fn aggregate_flows(rules: &[String], size: usize) -> impl Iterator<Item = String> + '_ {
    rules.chunks(size.max(1)).map(|chunk| chunk.join("\n"))
}

/// File name for a full-table replace: `ovs-flow-<5 chars><secs>.<micros>`.
pub fn flow_file_name() -> String {
    let mut rng = rand::thread_rng();
    let tag: String = (0..5)
        .map(|_| FLOW_FILE_CHARSET[rng.gen_range(0..FLOW_FILE_CHARSET.len())] as char)
        .collect();
    let now = Utc::now();
    format!(
        "ovs-flow-{}{}.{:06}",
        tag,
        now.timestamp(),
        now.timestamp_subsec_micros()
    )
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Remove,
    Add,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Remove => "remove",
            Direction::Add => "add",
        }
    }
}

/// Serialized flow table writer for one integration bridge.
pub struct FlowCommitter<C: OvsChannel> {
    channel: Arc<C>,
    bridge: String,
    batch_size: usize,
    temp_dir: PathBuf,
    lock: Mutex<()>,
}

impl<C: OvsChannel> FlowCommitter<C> {
    /// Creates a committer for `br-int` with default batching.
    pub fn new(channel: Arc<C>) -> Self {
        Self {
            channel,
            bridge: DEFAULT_BRIDGE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            temp_dir: std::env::temp_dir(),
            lock: Mutex::new(()),
        }
    }

    pub fn with_bridge(mut self, bridge: impl Into<String>) -> Self {
        self.bridge = bridge.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Directory where full-table replace files are written.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn bridge(&self) -> &str {
        &self.bridge
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Applies `removals` then `additions`, returning how many were applied.
    ///
    /// On batch success this is the total number of rules in the diff. If
    /// batching failed it is the number of rules that succeeded one by one.
    /// Never fails: unapplied rules are logged.
    #[instrument(skip_all, fields(bridge = %self.bridge, add = additions.len(), del = removals.len()))]
    pub async fn commit(&self, additions: &[String], removals: &[String]) -> usize {
        let _guard = self.lock.lock().await;

        let total = additions.len() + removals.len();
        if total == 0 {
            return 0;
        }

        let mut removals = removals;
        let batched = match self.apply_batches(Direction::Remove, removals).await {
            Ok(()) => {
                // Only the additions are left for the fallback now.
                removals = &[];
                self.apply_batches(Direction::Add, additions).await
            }
            Err(e) => Err(e),
        };

        match batched {
            Ok(()) => {
                debug!(total, "Committed flows in batches");
                total
            }
            Err(e) => {
                warn!(error = %e, "Failed to batch modify flows, updating one by one");
                self.apply_one_by_one(additions, removals).await
            }
        }
    }

    /// Applies a [`FlowDiff`].
    pub async fn commit_diff(&self, diff: &FlowDiff) -> usize {
        self.commit(&diff.additions, &diff.removals).await
    }

    async fn apply_batches(&self, direction: Direction, rules: &[String]) -> OvsResult<()> {
        let args = match direction {
            Direction::Remove => build_del_flows_batch(&self.bridge),
            Direction::Add => build_add_flows_batch(&self.bridge),
        };
        for (idx, chunk) in aggregate_flows(rules, self.batch_size).enumerate() {
            debug!(direction = direction.as_str(), batch = idx, "Applying flow batch");
            self.channel
                .run_with_retry(OvsProgram::Ofctl, &args, Some(&chunk))
                .await?;
        }
        Ok(())
    }

    async fn apply_one_by_one(&self, additions: &[String], removals: &[String]) -> usize {
        let mut applied = 0;
        for rule in removals {
            match self
                .channel
                .run_with_retry(OvsProgram::Ofctl, &build_del_flow_strict(&self.bridge, rule), None)
                .await
            {
                Ok(_) => applied += 1,
                Err(e) => error!(flow = %rule, error = %e, "Failed to delete flow"),
            }
        }
        for rule in additions {
            match self
                .channel
                .run_with_retry(OvsProgram::Ofctl, &build_add_flow(&self.bridge, rule), None)
                .await
            {
                Ok(_) => applied += 1,
                Err(e) => error!(flow = %rule, error = %e, "Failed to add flow"),
            }
        }
        info!(applied, total = additions.len() + removals.len(), "Committed flows one by one");
        applied
    }

    /// Atomically replaces the whole flow table of `bridge` with `rules`.
    ///
    /// The rules go through a temporary file rather than stdin so large
    /// tables are not limited by pipe buffering. The file is removed on
    /// every path once created; failing to remove it is only logged.
    #[instrument(skip(self, rules), fields(rules = rules.len()))]
    pub async fn transactional_replace(&self, rules: &[String], bridge: &str) -> OvsResult<()> {
        let _guard = self.lock.lock().await;

        let path = self.temp_dir.join(flow_file_name());
        if let Err(source) = tokio::fs::write(&path, rules.join("\n")).await {
            error!(path = %path.display(), error = %source, "Failed to write flows into file");
            remove_flow_file(&path).await;
            return Err(OvsError::FlowFile { path, source });
        }

        let result = self
            .channel
            .run_with_retry(
                OvsProgram::Ofctl,
                &build_replace_flows(bridge, &path.to_string_lossy()),
                None,
            )
            .await;
        remove_flow_file(&path).await;

        match result {
            Ok(_) => {
                info!("Replaced flow table");
                Ok(())
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to replace flows");
                Err(OvsError::ReplaceFlows {
                    bridge: bridge.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Removes every flow from `bridge`. Failure stops startup.
    #[instrument(skip(self))]
    pub async fn clean_flows(&self, bridge: &str) -> OvsResult<()> {
        let _guard = self.lock.lock().await;

        self.channel
            .run_with_retry(OvsProgram::Ofctl, &build_clean_flows(bridge), None)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to clean bridge flows");
                OvsError::bootstrap(format!("failed to clean flows on {}: {}", bridge, e))
            })?;
        info!("Cleaned all flows");
        Ok(())
    }

    /// Current flow table of `bridge`, one rule per line, reply headers dropped.
    pub async fn dump_flows(&self, bridge: &str) -> OvsResult<Vec<String>> {
        let out = self
            .channel
            .run_with_retry(OvsProgram::Ofctl, &build_dump_flows(bridge), None)
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.contains("_FLOW reply"))
            .map(str::to_string)
            .collect())
    }

    /// Injects a packet as if it arrived on `ofport`. Failure is logged only.
    pub async fn inject_packet(&self, cmd_id: u16, payload: &str, ofport: u32) {
        let args = build_packet_out(&self.bridge, cmd_id, ofport, payload);
        if let Err(e) = self.channel.run_with_retry(OvsProgram::Ofctl, &args, None).await {
            warn!(ofport, payload, error = %e, "Failed to inject packet");
        }
    }
}

async fn remove_flow_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove flow file"),
    }
}
