//! Type definitions and naming rules for the commit layer

use std::fmt;
use std::net::Ipv4Addr;

/// Prefix of every port this controller creates for tunnels.
pub const TUNNEL_PORT_PREFIX: &str = "tupleNet-";

/// Suffix of the peer-bridge side of a patch port pair.
pub const PATCH_PEER_SUFFIX: &str = "-peer";

/// Suffix of the DSR gateway internal port.
pub const DSR_PORT_SUFFIX: &str = "-dsrgw";

/// Default integration bridge.
pub const DEFAULT_BRIDGE: &str = "br-int";

/// Tunnel encapsulation used for inter-chassis ports.
pub const TUNNEL_TYPE: &str = "geneve";

/// OpenFlow version passed to every rule-bearing `ovs-ofctl` call.
///
/// OpenFlow 1.0 and 1.1 reset the packet and byte counters of a re-added
/// flow, 1.2 keeps them.
pub const OPENFLOW_VERSION: &str = "OpenFlow12";

/// Fail-mode the integration bridge must run in.
pub const SECURE_FAIL_MODE: &str = "secure";

/// Default option class of the tunnel metadata TLV.
pub const DEFAULT_TLV_CLASS: u16 = 0xffee;

/// Tunnel metadata field the TLV is mapped onto.
pub const TLV_FIELD: &str = "tun_metadata0";

/// Maximum rules per batched `ovs-ofctl` invocation.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Name of the tunnel port towards `remote`.
///
/// The address is encoded as its 32-bit big-endian integer, so distinct
/// addresses always yield distinct names.
///
/// ```
/// use std::net::Ipv4Addr;
/// use ovs_commitd::types::tunnel_port_name;
///
/// assert_eq!(tunnel_port_name(Ipv4Addr::new(10, 0, 0, 5)), "tupleNet-167772165");
/// ```
pub fn tunnel_port_name(remote: Ipv4Addr) -> String {
    format!("{}{}", TUNNEL_PORT_PREFIX, u32::from(remote))
}

/// Name of the single flow-based tunnel port.
pub fn flowbased_tunnel_name() -> String {
    format!("{}flowbased", TUNNEL_PORT_PREFIX)
}

/// Name of the peer-bridge side of the patch port `base`.
pub fn patch_peer_name(base: &str) -> String {
    format!("{}{}", base, PATCH_PEER_SUFFIX)
}

/// Name of the DSR gateway port on `bridge`.
pub fn dsr_port_name(bridge: &str) -> String {
    format!("{}{}", bridge, DSR_PORT_SUFFIX)
}

/// The `{class=..,type=0,len=8}->tun_metadata0` mapping for `class`.
pub fn tlv_mapping_spec(class: u16) -> String {
    format!("{{class=0x{:x},type=0,len=8}}->{}", class, TLV_FIELD)
}

/// A flow diff: rules to remove and rules to add.
///
/// Removals are applied before additions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowDiff {
    pub additions: Vec<String>,
    pub removals: Vec<String>,
}

impl FlowDiff {
    pub fn new(additions: Vec<String>, removals: Vec<String>) -> Self {
        Self {
            additions,
            removals,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }

    /// Total number of rules in the diff.
    pub fn len(&self) -> usize {
        self.additions.len() + self.removals.len()
    }
}

/// How a tunnel to remove is identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelRef {
    /// By remote chassis address.
    Remote(Ipv4Addr),
    /// By port name.
    Name(String),
}

impl TunnelRef {
    pub fn port_name(&self) -> String {
        match self {
            TunnelRef::Remote(ip) => tunnel_port_name(*ip),
            TunnelRef::Name(name) => name.clone(),
        }
    }
}

impl From<Ipv4Addr> for TunnelRef {
    fn from(ip: Ipv4Addr) -> Self {
        TunnelRef::Remote(ip)
    }
}

impl From<&str> for TunnelRef {
    fn from(name: &str) -> Self {
        match name.parse::<Ipv4Addr>() {
            Ok(ip) => TunnelRef::Remote(ip),
            Err(_) => TunnelRef::Name(name.to_string()),
        }
    }
}

impl fmt::Display for TunnelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelRef::Remote(ip) => write!(f, "{} ({})", tunnel_port_name(*ip), ip),
            TunnelRef::Name(name) => f.write_str(name),
        }
    }
}

/// The DSR gateway internal port as seen by the switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsrPort {
    pub name: String,
    pub mac: String,
    pub ofport: u32,
}

/// IPFIX export settings attached to a bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpfixSettings {
    /// Collector address, `ip:port`.
    pub collector: String,
    pub domain_id: u32,
    pub point_id: u32,
    pub sampling_rate: u32,
}
