//! Port and tunnel lifecycle
//!
//! Creates and removes the virtual ports derived from topology decisions:
//! geneve tunnels towards remote chassis, the flow-based tunnel, patch port
//! pairs between bridges and the DSR gateway internal port. Every
//! operation is idempotent and names ports deterministically, so repeating
//! a topology decision never leaks or duplicates ports.

use std::net::Ipv4Addr;
use std::sync::Arc;

use ovs_common::{OvsChannel, OvsProgram, OvsResult};
use tracing::{debug, error, info, instrument, warn};

use crate::commands::*;
use crate::query::{bridge_exists, interface_exists, interface_property};
use crate::tables::{external_ids, interface_fields, options, port_types};
use crate::types::*;

/// Lifecycle manager for controller-owned ports.
pub struct PortManager<C: OvsChannel> {
    channel: Arc<C>,
}

impl<C: OvsChannel> PortManager<C> {
    pub fn new(channel: Arc<C>) -> Self {
        Self { channel }
    }

    async fn vsctl(&self, args: &[String]) -> OvsResult<String> {
        self.channel.run_with_retry(OvsProgram::Vsctl, args, None).await
    }

    /// Ensures a geneve tunnel to `remote` tagged with `chassis_id`.
    ///
    /// An existing port with the derived name and the same chassis id is
    /// left alone. Any other port of that name is replaced. Returns `None`
    /// if the port could not be created.
    #[instrument(skip(self))]
    pub async fn ensure_tunnel(
        &self,
        remote: Ipv4Addr,
        chassis_id: &str,
        bridge: &str,
    ) -> Option<String> {
        let name = tunnel_port_name(remote);
        let remote_ip = remote.to_string();
        self.ensure_geneve_port(name, &remote_ip, chassis_id, bridge).await
    }

    /// Ensures the flow-based tunnel (`remote_ip=flow`) for `chassis_id`.
    #[instrument(skip(self))]
    pub async fn ensure_flowbased_tunnel(&self, chassis_id: &str, bridge: &str) -> Option<String> {
        self.ensure_geneve_port(flowbased_tunnel_name(), "flow", chassis_id, bridge)
            .await
    }

    async fn ensure_geneve_port(
        &self,
        name: String,
        remote_ip: &str,
        chassis_id: &str,
        bridge: &str,
    ) -> Option<String> {
        let chassis_key = format!("{}:{}", interface_fields::EXTERNAL_IDS, external_ids::CHASSIS_ID);
        let current = interface_property(self.channel.as_ref(), &name, &chassis_key).await;
        if current.as_deref() == Some(chassis_id) {
            info!(port = %name, "Tunnel port with the same chassis-id exists, skipping");
            return Some(name);
        }

        self.remove_tunnel(TunnelRef::Name(name.clone())).await;

        let columns = [
            map_assignment("options", options::REMOTE_IP, remote_ip),
            map_assignment("options", options::KEY, "flow"),
            map_assignment("options", options::CSUM, "true"),
            map_assignment(interface_fields::EXTERNAL_IDS, external_ids::CHASSIS_ID, chassis_id),
        ];
        info!(port = %name, remote_ip, "Adding tunnel port");
        match self
            .vsctl(&build_add_port(bridge, &name, TUNNEL_TYPE, &columns))
            .await
        {
            Ok(_) => Some(name),
            Err(e) => {
                error!(port = %name, error = %e, "Cannot create tunnel port");
                None
            }
        }
    }

    /// Removes a tunnel port. A missing port is not an error.
    #[instrument(skip(self), fields(tunnel = %tunnel))]
    pub async fn remove_tunnel(&self, tunnel: TunnelRef) {
        let name = tunnel.port_name();
        if !interface_exists(self.channel.as_ref(), &name).await {
            debug!(port = %name, "Port does not exist, nothing to remove");
            return;
        }
        match self.vsctl(&build_del_port(&name)).await {
            Ok(_) => info!(port = %name, "Deleted tunnel port"),
            Err(e) => warn!(port = %name, error = %e, "Cannot delete tunnel port"),
        }
    }

    /// Ensures the patch pair `base` on `bridge` and `base-peer` on `peer_bridge`.
    ///
    /// Nothing is created while the peer bridge is missing. Whichever sides
    /// are missing are created in a single transaction.
    #[instrument(skip(self))]
    pub async fn ensure_patchport(&self, base: &str, peer_bridge: &str, bridge: &str) {
        let channel = self.channel.as_ref();
        if !bridge_exists(channel, peer_bridge).await {
            info!("Peer bridge does not exist, not creating patch ports");
            return;
        }

        let peer = patch_peer_name(base);
        let mut segments = Vec::new();
        if !interface_exists(channel, base).await {
            segments.push(patch_side(bridge, base, &peer));
        }
        if !interface_exists(channel, &peer).await {
            segments.push(patch_side(peer_bridge, &peer, base));
        }
        if segments.is_empty() {
            debug!("Patch ports already exist");
            return;
        }

        match self.vsctl(&build_transaction(segments)).await {
            Ok(_) => info!(port = base, peer = %peer, "Created patch ports"),
            Err(e) => warn!(error = %e, "Failed to create patch ports"),
        }
    }

    /// Removes the patch port `base` and the peer it is linked to.
    #[instrument(skip(self))]
    pub async fn remove_patchport(&self, base: &str) {
        let channel = self.channel.as_ref();
        let peer_key = format!("options:{}", options::PEER);
        let Some(peer) = interface_property(channel, base, &peer_key).await else {
            warn!("Failed to get peer patch port information");
            return;
        };

        match self.vsctl(&build_del_port(base)).await {
            Ok(_) => info!(port = base, "Removed patch port"),
            Err(e) => warn!(port = base, error = %e, "Failed to delete patch port"),
        }

        if !interface_exists(channel, &peer).await {
            warn!(port = %peer, "Peer patch port does not exist");
            return;
        }
        match self.vsctl(&build_del_port(&peer)).await {
            Ok(_) => info!(port = %peer, "Removed patch port"),
            Err(e) => warn!(port = %peer, error = %e, "Failed to delete patch port"),
        }
    }

    /// Ensures the DSR gateway internal port on `bridge` and reads it back.
    #[instrument(skip(self))]
    pub async fn ensure_dsr_port(&self, bridge: &str) -> Option<DsrPort> {
        let channel = self.channel.as_ref();
        let name = dsr_port_name(bridge);

        if !interface_exists(channel, &name).await {
            if let Err(e) = self
                .vsctl(&build_add_port(bridge, &name, port_types::INTERNAL, &[]))
                .await
            {
                warn!(port = %name, error = %e, "Failed to add internal port");
                return None;
            }
        }

        let mac = interface_property(channel, &name, interface_fields::MAC_IN_USE).await;
        let ofport = interface_property(channel, &name, interface_fields::OFPORT)
            .await
            .and_then(|p| p.parse::<u32>().ok());
        match (mac, ofport) {
            (Some(mac), Some(ofport)) => Some(DsrPort { name, mac, ofport }),
            _ => {
                error!(port = %name, "Failed to get mac_in_use or ofport");
                None
            }
        }
    }

    /// Sets `bfd:<config>` on a port. Failure is logged only.
    pub async fn configure_bfd(&self, port: &str, config: &str) {
        if let Err(e) = self.vsctl(&build_set_bfd(port, config)).await {
            info!(port, config, error = %e, "Failed to configure bfd, port may not exist");
        }
    }
}

fn patch_side(bridge: &str, name: &str, peer: &str) -> Vec<String> {
    build_add_port(
        bridge,
        name,
        port_types::PATCH,
        &[
            map_assignment("options", options::PEER, peer),
            map_assignment(interface_fields::EXTERNAL_IDS, external_ids::IFACE_ID, name),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovs_commit_test::FakeSwitch;
    use pretty_assertions::assert_eq;

    fn setup() -> (Arc<FakeSwitch>, PortManager<FakeSwitch>) {
        let sw = Arc::new(FakeSwitch::new());
        sw.add_bridge("br-int");
        let ports = PortManager::new(sw.clone());
        (sw, ports)
    }

    #[tokio::test]
    async fn test_ensure_tunnel_creates_geneve_port() {
        let (sw, ports) = setup();
        let name = ports
            .ensure_tunnel(Ipv4Addr::new(10, 0, 0, 5), "chassis-42", "br-int")
            .await;

        assert_eq!(name.as_deref(), Some("tupleNet-167772165"));
        assert_eq!(sw.interface_type("tupleNet-167772165").as_deref(), Some("geneve"));
        assert_eq!(
            sw.interface_option("tupleNet-167772165", "remote_ip").as_deref(),
            Some("10.0.0.5")
        );
        assert_eq!(sw.interface_option("tupleNet-167772165", "key").as_deref(), Some("flow"));
        assert_eq!(sw.interface_option("tupleNet-167772165", "csum").as_deref(), Some("true"));
        assert_eq!(
            sw.interface_external_id("tupleNet-167772165", "chassis-id").as_deref(),
            Some("chassis-42")
        );
    }

    #[tokio::test]
    async fn test_ensure_tunnel_replaces_stale_chassis() {
        let (sw, ports) = setup();
        sw.add_interface("br-int", "tupleNet-167772165", "geneve", &[("chassis-id", "old")]);

        ports
            .ensure_tunnel(Ipv4Addr::new(10, 0, 0, 5), "chassis-42", "br-int")
            .await;

        assert_eq!(sw.count_calls("del-port"), 1);
        assert_eq!(
            sw.interface_external_id("tupleNet-167772165", "chassis-id").as_deref(),
            Some("chassis-42")
        );
    }

    #[tokio::test]
    async fn test_ensure_tunnel_failure_returns_none() {
        let (sw, ports) = setup();
        sw.fail_when(|c| c.command() == Some("add-port"));

        let name = ports
            .ensure_tunnel(Ipv4Addr::new(10, 0, 0, 6), "chassis-43", "br-int")
            .await;
        assert_eq!(name, None);
    }

    #[tokio::test]
    async fn test_flowbased_tunnel_idempotent() {
        let (sw, ports) = setup();
        let first = ports.ensure_flowbased_tunnel("chassis-1", "br-int").await;
        let second = ports.ensure_flowbased_tunnel("chassis-1", "br-int").await;

        assert_eq!(first.as_deref(), Some("tupleNet-flowbased"));
        assert_eq!(first, second);
        assert_eq!(sw.count_calls("add-port"), 1);
        assert_eq!(
            sw.interface_option("tupleNet-flowbased", "remote_ip").as_deref(),
            Some("flow")
        );
    }

    #[tokio::test]
    async fn test_remove_tunnel_missing_is_noop() {
        let (sw, ports) = setup();
        ports.remove_tunnel(TunnelRef::from("10.9.9.9")).await;
        assert_eq!(sw.count_calls("del-port"), 0);
    }

    #[tokio::test]
    async fn test_remove_tunnel_by_address() {
        let (sw, ports) = setup();
        let ip = Ipv4Addr::new(192, 168, 1, 1);
        ports.ensure_tunnel(ip, "c1", "br-int").await;
        ports.remove_tunnel(ip.into()).await;
        assert!(!sw.has_interface(&tunnel_port_name(ip)));
    }

    #[tokio::test]
    async fn test_patchport_needs_peer_bridge() {
        let (sw, ports) = setup();
        ports.ensure_patchport("patch-ext", "br-ext", "br-int").await;
        assert!(!sw.has_interface("patch-ext"));
        assert_eq!(sw.count_calls("add-port"), 0);
    }

    #[tokio::test]
    async fn test_patchport_single_transaction() {
        let (sw, ports) = setup();
        sw.add_bridge("br-ext");
        ports.ensure_patchport("patch-ext", "br-ext", "br-int").await;

        assert_eq!(sw.count_calls("add-port"), 1);
        assert_eq!(sw.interface_bridge("patch-ext").as_deref(), Some("br-int"));
        assert_eq!(sw.interface_bridge("patch-ext-peer").as_deref(), Some("br-ext"));
        assert_eq!(sw.interface_option("patch-ext", "peer").as_deref(), Some("patch-ext-peer"));
        assert_eq!(sw.interface_option("patch-ext-peer", "peer").as_deref(), Some("patch-ext"));
        assert_eq!(
            sw.interface_external_id("patch-ext-peer", "iface-id").as_deref(),
            Some("patch-ext-peer")
        );

        sw.clear_calls();
        ports.ensure_patchport("patch-ext", "br-ext", "br-int").await;
        assert_eq!(sw.count_calls("add-port"), 0);
    }

    #[tokio::test]
    async fn test_patchport_repairs_missing_side() {
        let (sw, ports) = setup();
        sw.add_bridge("br-ext");
        ports.ensure_patchport("patch-ext", "br-ext", "br-int").await;
        sw.run(OvsProgram::Vsctl, &build_del_port("patch-ext-peer"), None)
            .await
            .unwrap();

        ports.ensure_patchport("patch-ext", "br-ext", "br-int").await;
        assert!(sw.has_interface("patch-ext-peer"));
    }

    #[tokio::test]
    async fn test_remove_patchport() {
        let (sw, ports) = setup();
        sw.add_bridge("br-ext");
        ports.ensure_patchport("patch-ext", "br-ext", "br-int").await;

        ports.remove_patchport("patch-ext").await;
        assert!(!sw.has_interface("patch-ext"));
        assert!(!sw.has_interface("patch-ext-peer"));
    }

    #[tokio::test]
    async fn test_remove_patchport_without_peer_info() {
        let (sw, ports) = setup();
        sw.add_interface("br-int", "patch-x", "patch", &[]);

        ports.remove_patchport("patch-x").await;
        assert!(sw.has_interface("patch-x"));
        assert_eq!(sw.count_calls("del-port"), 0);
    }

    #[tokio::test]
    async fn test_ensure_dsr_port() {
        let (sw, ports) = setup();
        let dsr = ports.ensure_dsr_port("br-int").await.unwrap();

        assert_eq!(dsr.name, "br-int-dsrgw");
        assert_eq!(sw.interface_type("br-int-dsrgw").as_deref(), Some("internal"));
        assert!(dsr.ofport > 0);
        assert!(!dsr.mac.is_empty());

        sw.clear_calls();
        assert_eq!(ports.ensure_dsr_port("br-int").await, Some(dsr));
        assert_eq!(sw.count_calls("add-port"), 0);
    }

    #[tokio::test]
    async fn test_configure_bfd() {
        let (sw, ports) = setup();
        ports.ensure_tunnel(Ipv4Addr::new(10, 0, 0, 7), "c7", "br-int").await;
        ports.configure_bfd("tupleNet-167772167", "enable=true").await;
        assert_eq!(sw.interface_bfd("tupleNet-167772167", "enable").as_deref(), Some("true"));

        // Missing ports are tolerated.
        ports.configure_bfd("missing", "enable=true").await;
    }
}
