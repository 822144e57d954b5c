//! ovs-commitd entry point
//!
//! Operator front end for the commit layer: bootstraps the integration
//! bridge, pushes flow files, manages tunnel and patch ports by hand and
//! streams translated port events to the log.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ovs_common::{EntityKind, EntityRegistry, OvsCli};
use ovs_commitd::config::DEFAULT_CONFIG_PATH;
use ovs_commitd::{
    spawn_port_monitor, BridgeBootstrap, CommitConfig, FlowCommitter, PortManager, TunnelRef,
};
use tracing::{error, info, warn};

/// Reconcile the local Open vSwitch with the controller's state
#[derive(Parser, Debug)]
#[command(name = "ovs-commitd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Bridge to operate on, overriding the configured one
    #[arg(short = 'b', long)]
    bridge: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ensure the integration bridge, TLV mapping and IPFIX export
    Bootstrap,
    /// Apply a flow diff read from rule files (one rule per line)
    Commit {
        #[arg(long)]
        add: Option<PathBuf>,
        #[arg(long)]
        del: Option<PathBuf>,
    },
    /// Atomically replace the whole flow table with a rule file
    Replace { file: PathBuf },
    /// Print the current flow table
    Dump,
    /// Manage tunnel ports
    Tunnel {
        #[command(subcommand)]
        action: TunnelAction,
    },
    /// Manage patch port pairs
    Patch {
        #[command(subcommand)]
        action: PatchAction,
    },
    /// Stream translated Interface events to the log until interrupted
    Monitor,
}

#[derive(Subcommand, Debug)]
enum TunnelAction {
    /// Ensure a geneve tunnel to a remote chassis
    Add { remote_ip: Ipv4Addr, chassis_id: String },
    /// Ensure the flow-based tunnel
    AddFlowbased { chassis_id: String },
    /// Remove a tunnel by remote address or port name
    Del { target: String },
}

#[derive(Subcommand, Debug)]
enum PatchAction {
    /// Ensure a patch pair towards a peer bridge
    Add { base: String, peer_bridge: String },
    /// Remove a patch pair
    Del { base: String },
}

/// Registry stand-in that only logs what it is told.
struct LoggingRegistry;

impl EntityRegistry for LoggingRegistry {
    fn add_entity(
        &self,
        kind: EntityKind,
        name: &str,
        correlation_id: &str,
        ofport: u32,
        is_remote: bool,
    ) {
        info!(%kind, name, correlation_id, ofport, is_remote, "add entity");
    }

    fn move_entity_to_sink(&self, kind: EntityKind, name: &str) {
        info!(%kind, name, "move entity to sink");
    }

    fn force_version_bump(&self) {
        info!("force version bump");
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

fn read_rules(path: Option<&Path>) -> Result<Vec<String>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read rules from {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

async fn bootstrap(config: &CommitConfig, channel: Arc<OvsCli>, bridge: &str) -> Result<()> {
    let boot = BridgeBootstrap::new(channel.clone())
        .with_tlv_retry(config.bridge.tlv_max_attempts, config.tlv_retry_delay());

    boot.ensure_integration_bridge(bridge).await?;
    if config.bridge.clean_flows {
        FlowCommitter::new(channel.clone())
            .with_bridge(bridge)
            .clean_flows(bridge)
            .await?;
    }
    boot.ensure_tunnel_metadata_mapping(bridge, config.bridge.tlv_class)
        .await?;
    boot.configure_ipfix(bridge, config.ipfix_settings().as_ref())
        .await?;

    if config.bridge.dsr_port {
        match PortManager::new(channel).ensure_dsr_port(bridge).await {
            Some(dsr) => info!(name = %dsr.name, mac = %dsr.mac, ofport = dsr.ofport, "DSR port ready"),
            None => warn!("DSR port unavailable"),
        }
    }
    match boot.system_id().await {
        Some(id) => info!(system_id = %id, "Bootstrap complete"),
        None => info!("Bootstrap complete, no system-id"),
    }
    Ok(())
}

async fn monitor(channel: Arc<OvsCli>) -> Result<()> {
    let handle = spawn_port_monitor(channel.as_ref(), Arc::new(LoggingRegistry))
        .await
        .context("failed to start interface monitor")?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, stopping monitor");
        }
        res = handle => {
            res.context("interface monitor task failed")?;
        }
    }
    Ok(())
}

async fn run(args: Args, config: CommitConfig) -> Result<()> {
    let channel = Arc::new(OvsCli::new(config.cli_config()));
    let bridge = args
        .bridge
        .clone()
        .unwrap_or_else(|| config.bridge.name.clone());
    let flows = || {
        FlowCommitter::new(channel.clone())
            .with_bridge(bridge.clone())
            .with_batch_size(config.flows.batch_size)
            .with_temp_dir(config.flows.temp_dir.clone())
    };

    match args.command {
        Command::Bootstrap => bootstrap(&config, channel.clone(), &bridge).await?,
        Command::Commit { add, del } => {
            let additions = read_rules(add.as_deref())?;
            let removals = read_rules(del.as_deref())?;
            let applied = flows().commit(&additions, &removals).await;
            println!("{}", applied);
        }
        Command::Replace { file } => {
            let rules = read_rules(Some(file.as_path()))?;
            flows().transactional_replace(&rules, &bridge).await?;
        }
        Command::Dump => {
            for rule in flows().dump_flows(&bridge).await? {
                println!("{}", rule);
            }
        }
        Command::Tunnel { action } => {
            let ports = PortManager::new(channel.clone());
            match action {
                TunnelAction::Add {
                    remote_ip,
                    chassis_id,
                } => {
                    let name = ports
                        .ensure_tunnel(remote_ip, &chassis_id, &bridge)
                        .await
                        .context("failed to create tunnel port")?;
                    println!("{}", name);
                }
                TunnelAction::AddFlowbased { chassis_id } => {
                    let name = ports
                        .ensure_flowbased_tunnel(&chassis_id, &bridge)
                        .await
                        .context("failed to create flow-based tunnel port")?;
                    println!("{}", name);
                }
                TunnelAction::Del { target } => {
                    ports.remove_tunnel(TunnelRef::from(target.as_str())).await
                }
            }
        }
        Command::Patch { action } => {
            let ports = PortManager::new(channel.clone());
            match action {
                PatchAction::Add { base, peer_bridge } => {
                    ports.ensure_patchport(&base, &peer_bridge, &bridge).await
                }
                PatchAction::Del { base } => ports.remove_patchport(&base).await,
            }
        }
        Command::Monitor => monitor(channel.clone()).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match CommitConfig::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ovs-commitd: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.logging.level);

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
