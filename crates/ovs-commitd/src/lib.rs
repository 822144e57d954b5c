//! OVS commit layer
//!
//! Makes the local Open vSwitch match the controller's computed state and
//! reports the switch's port inventory back:
//! - [`FlowCommitter`]: batched flow diffs with per-rule fallback, atomic
//!   full-table replace
//! - [`PortManager`]: tunnel, flow-based tunnel, patch port and DSR port
//!   lifecycle
//! - [`BridgeBootstrap`]: integration bridge, fail-mode, TLV mapping, IPFIX
//! - [`PortEventTranslator`]: Interface monitor rows to entity registry events

pub mod bridge;
pub mod commands;
pub mod config;
pub mod flow;
pub mod port;
pub mod port_event;
pub mod query;
pub mod tables;
pub mod types;

pub use bridge::BridgeBootstrap;
pub use config::CommitConfig;
pub use flow::FlowCommitter;
pub use port::PortManager;
pub use port_event::{spawn_port_monitor, PortEventTranslator};
pub use types::{FlowDiff, TunnelRef};
