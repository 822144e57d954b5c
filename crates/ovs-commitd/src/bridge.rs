//! Integration bridge bootstrap
//!
//! Startup-time configuration of the integration bridge: existence and
//! secure fail-mode, the tunnel metadata TLV mapping, IPFIX export. Every
//! failure here is a bootstrap error and stops startup.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use ovs_common::ovsdb::unquote_string;
use ovs_common::{OvsChannel, OvsError, OvsProgram, OvsResult};
use regex::Regex;
use tracing::{debug, error, info, instrument, warn};

use crate::commands::*;
use crate::query::bridge_exists;
use crate::types::{tlv_mapping_spec, IpfixSettings, SECURE_FAIL_MODE, TLV_FIELD};

/// Default ceiling on TLV verify-then-fix rounds.
pub const DEFAULT_TLV_MAX_ATTEMPTS: u32 = 5;

/// Default pause between TLV rounds.
pub const DEFAULT_TLV_RETRY_DELAY: Duration = Duration::from_millis(200);

/// One row of the `dump-tlv-map` mapping table.
static TLV_ROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*0x([0-9a-fA-F]+)\s+0x([0-9a-fA-F]+)\s+(\d+)\s+(tun_metadata\d+)\s*$")
        .expect("Invalid regex pattern")
});

/// A TLV mapping installed on a bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvMapping {
    pub class: u16,
    pub tlv_type: u8,
    pub len: u8,
    pub field: String,
}

impl TlvMapping {
    /// The mapping the controller requires for `class`.
    pub fn required(class: u16) -> Self {
        Self {
            class,
            tlv_type: 0,
            len: 8,
            field: TLV_FIELD.to_string(),
        }
    }
}

/// Extracts the mapping table from `ovs-ofctl dump-tlv-map` output.
pub fn parse_tlv_dump(output: &str) -> Vec<TlvMapping> {
    output
        .lines()
        .filter_map(|line| {
            let caps = TLV_ROW_RE.captures(line)?;
            Some(TlvMapping {
                class: u16::from_str_radix(&caps[1], 16).ok()?,
                tlv_type: u8::from_str_radix(&caps[2], 16).ok()?,
                len: caps[3].parse().ok()?,
                field: caps[4].to_string(),
            })
        })
        .collect()
}

/// Startup configuration of the integration bridge.
pub struct BridgeBootstrap<C: OvsChannel> {
    channel: Arc<C>,
    tlv_max_attempts: u32,
    tlv_retry_delay: Duration,
}

impl<C: OvsChannel> BridgeBootstrap<C> {
    pub fn new(channel: Arc<C>) -> Self {
        Self {
            channel,
            tlv_max_attempts: DEFAULT_TLV_MAX_ATTEMPTS,
            tlv_retry_delay: DEFAULT_TLV_RETRY_DELAY,
        }
    }

    /// Bounds the TLV loop to `attempts` checks, `delay` apart.
    pub fn with_tlv_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.tlv_max_attempts = attempts.max(1);
        self.tlv_retry_delay = delay;
        self
    }

    async fn run(&self, program: OvsProgram, args: &[String]) -> OvsResult<String> {
        self.channel.run_with_retry(program, args, None).await
    }

    /// Ensures `bridge` exists with fail-mode `secure`, returning its name.
    #[instrument(skip(self))]
    pub async fn ensure_integration_bridge(&self, bridge: &str) -> OvsResult<String> {
        if bridge_exists(self.channel.as_ref(), bridge).await {
            info!("Integration bridge exists");
            self.ensure_secure_fail_mode(bridge).await?;
            return Ok(bridge.to_string());
        }

        self.run(OvsProgram::Vsctl, &build_add_secure_bridge(bridge))
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to create integration bridge");
                OvsError::bootstrap(format!("failed to create integration bridge {}: {}", bridge, e))
            })?;
        info!("Created integration bridge");
        Ok(bridge.to_string())
    }

    async fn ensure_secure_fail_mode(&self, bridge: &str) -> OvsResult<()> {
        let current = self
            .run(OvsProgram::Vsctl, &build_get_fail_mode(bridge))
            .await
            .map_err(|e| {
                OvsError::bootstrap(format!("failed to get fail mode of {}: {}", bridge, e))
            })?;
        if current.trim() == SECURE_FAIL_MODE {
            return Ok(());
        }

        info!(current = current.trim(), "Setting bridge fail-mode to secure");
        self.run(OvsProgram::Vsctl, &build_set_fail_mode(bridge, SECURE_FAIL_MODE))
            .await
            .map_err(|e| {
                OvsError::bootstrap(format!("failed to set {} fail-mode to secure: {}", bridge, e))
            })?;
        Ok(())
    }

    /// Ensures `tun_metadata0` is mapped to `{class,type=0,len=8}` on `bridge`.
    ///
    /// The map is dumped first and left alone when the required mapping is
    /// already there. Otherwise each attempt clears the map, installs the
    /// mapping and dumps again to verify it; running out of attempts is a
    /// bootstrap error.
    #[instrument(skip(self))]
    pub async fn ensure_tunnel_metadata_mapping(&self, bridge: &str, class: u16) -> OvsResult<()> {
        let required = TlvMapping::required(class);
        let spec = tlv_mapping_spec(class);

        if self.has_tlv_mapping(bridge, &required).await? {
            info!("Tunnel metadata mapping in place");
            return Ok(());
        }

        for attempt in 1..=self.tlv_max_attempts {
            self.run(OvsProgram::Ofctl, &build_del_tlv_map(bridge))
                .await
                .map_err(|e| OvsError::bootstrap(format!("failed to clean tlv map: {}", e)))?;
            self.run(OvsProgram::Ofctl, &build_add_tlv_map(bridge, &spec))
                .await
                .map_err(|e| {
                    OvsError::bootstrap(format!("failed to add tlv mapping {}: {}", spec, e))
                })?;
            info!(attempt, mapping = %spec, "Set tunnel metadata mapping");

            tokio::time::sleep(self.tlv_retry_delay).await;
            if self.has_tlv_mapping(bridge, &required).await? {
                info!(attempt, "Tunnel metadata mapping in place");
                return Ok(());
            }
        }

        warn!(attempts = self.tlv_max_attempts, "Tunnel metadata mapping did not converge");
        Err(OvsError::bootstrap(format!(
            "tunnel metadata mapping on {} did not converge after {} attempts",
            bridge, self.tlv_max_attempts
        )))
    }

    async fn has_tlv_mapping(&self, bridge: &str, required: &TlvMapping) -> OvsResult<bool> {
        let dump = self
            .run(OvsProgram::Ofctl, &build_dump_tlv_map(bridge))
            .await
            .map_err(|e| OvsError::bootstrap(format!("failed to dump tlv map: {}", e)))?;
        let mappings = parse_tlv_dump(&dump);
        if !mappings.contains(required) {
            debug!(?mappings, "Tunnel metadata mapping missing or different");
            return Ok(false);
        }
        Ok(true)
    }

    /// Replaces the IPFIX export of `bridge`; `None` only clears it.
    #[instrument(skip(self, settings))]
    pub async fn configure_ipfix(
        &self,
        bridge: &str,
        settings: Option<&IpfixSettings>,
    ) -> OvsResult<()> {
        let fail = |e: OvsError| {
            error!(error = %e, "Failed to alter ipfix record");
            OvsError::bootstrap(format!("failed to alter ipfix record: {}", e))
        };

        self.run(OvsProgram::Vsctl, &build_clear_ipfix(bridge))
            .await
            .map_err(fail)?;

        if let Some(settings) = settings {
            debug!(collector = %settings.collector, "Adding ipfix record");
            self.run(OvsProgram::Vsctl, &build_set_ipfix(bridge, settings))
                .await
                .map_err(fail)?;
        }
        Ok(())
    }

    /// Reads this switch's `system-id`.
    pub async fn system_id(&self) -> Option<String> {
        match self.run(OvsProgram::Vsctl, &build_get_system_id()).await {
            Ok(out) => Some(unquote_string(&out)),
            Err(e) => {
                error!(error = %e, "Failed to get system-id");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovs_commit_test::FakeSwitch;
    use pretty_assertions::assert_eq;

    fn setup() -> (Arc<FakeSwitch>, BridgeBootstrap<FakeSwitch>) {
        let sw = Arc::new(FakeSwitch::new());
        let boot = BridgeBootstrap::new(sw.clone()).with_tlv_retry(3, Duration::from_millis(1));
        (sw, boot)
    }

    #[test]
    fn test_parse_tlv_dump() {
        let dump = "NXST_TLV_TABLE reply (xid=0x4):\n max option space=256 max fields=64\n allocated option space=8\n\n mapping table:\n class\ttype\tlength\tmatch field\n ------\t----\t------\t-----------\n 0xffee\t0x0\t8\ttun_metadata0\n 0x102\t0x80\t4\ttun_metadata1\n";
        assert_eq!(
            parse_tlv_dump(dump),
            vec![
                TlvMapping::required(0xffee),
                TlvMapping {
                    class: 0x102,
                    tlv_type: 0x80,
                    len: 4,
                    field: "tun_metadata1".to_string(),
                },
            ]
        );
        assert!(parse_tlv_dump("NXST_TLV_TABLE reply (xid=0x4):\n").is_empty());
    }

    #[tokio::test]
    async fn test_create_integration_bridge() {
        let (sw, boot) = setup();
        assert_eq!(boot.ensure_integration_bridge("br-int").await.unwrap(), "br-int");
        assert!(sw.bridge_exists("br-int"));
        assert_eq!(sw.fail_mode("br-int").as_deref(), Some("secure"));
        assert_eq!(sw.count_calls("add-br"), 1);
    }

    #[tokio::test]
    async fn test_existing_bridge_fail_mode_corrected() {
        let (sw, boot) = setup();
        sw.add_bridge("br-int");
        sw.set_fail_mode("br-int", "standalone");

        boot.ensure_integration_bridge("br-int").await.unwrap();
        assert_eq!(sw.fail_mode("br-int").as_deref(), Some("secure"));
        assert_eq!(sw.count_calls("add-br"), 0);

        sw.clear_calls();
        boot.ensure_integration_bridge("br-int").await.unwrap();
        assert_eq!(sw.count_calls("set-fail-mode"), 0);
    }

    #[tokio::test]
    async fn test_bridge_failure_is_bootstrap_error() {
        let (sw, boot) = setup();
        sw.fail_when(|c| c.command() == Some("add-br"));
        let err = boot.ensure_integration_bridge("br-int").await.unwrap_err();
        assert!(err.is_bootstrap());
    }

    #[tokio::test]
    async fn test_tlv_mapping_installed() {
        let (sw, boot) = setup();
        sw.add_bridge("br-int");

        boot.ensure_tunnel_metadata_mapping("br-int", 0xffee).await.unwrap();
        assert_eq!(
            sw.tlv_mappings("br-int"),
            vec!["{class=0xffee,type=0,len=8}->tun_metadata0".to_string()]
        );

        sw.clear_calls();
        boot.ensure_tunnel_metadata_mapping("br-int", 0xffee).await.unwrap();
        assert_eq!(sw.count_calls("add-tlv-map"), 0);
    }

    #[tokio::test]
    async fn test_tlv_mapping_wrong_class_replaced() {
        let (sw, boot) = setup();
        sw.add_bridge("br-int");
        boot.ensure_tunnel_metadata_mapping("br-int", 0x0102).await.unwrap();

        boot.ensure_tunnel_metadata_mapping("br-int", 0xffee).await.unwrap();
        assert_eq!(sw.count_calls("del-tlv-map"), 2);
        assert_eq!(
            sw.tlv_mappings("br-int"),
            vec!["{class=0xffee,type=0,len=8}->tun_metadata0".to_string()]
        );
    }

    #[tokio::test]
    async fn test_tlv_mapping_bounded() {
        let (sw, boot) = setup();
        sw.add_bridge("br-int");
        sw.freeze_tlv_map(true);

        let err = boot
            .ensure_tunnel_metadata_mapping("br-int", 0xffee)
            .await
            .unwrap_err();
        assert!(err.is_bootstrap());
        assert_eq!(sw.count_calls("dump-tlv-map"), 4);
        assert_eq!(sw.count_calls("add-tlv-map"), 3);
    }

    #[tokio::test]
    async fn test_tlv_mapping_single_attempt_installs() {
        let sw = Arc::new(FakeSwitch::new());
        sw.add_bridge("br-int");
        let boot = BridgeBootstrap::new(sw.clone()).with_tlv_retry(1, Duration::from_millis(1));

        boot.ensure_tunnel_metadata_mapping("br-int", 0xffee).await.unwrap();
        assert_eq!(sw.count_calls("add-tlv-map"), 1);
        assert_eq!(
            sw.tlv_mappings("br-int"),
            vec!["{class=0xffee,type=0,len=8}->tun_metadata0".to_string()]
        );
    }

    #[tokio::test]
    async fn test_configure_ipfix() {
        let (sw, boot) = setup();
        sw.add_bridge("br-int");
        let settings = IpfixSettings {
            collector: "10.0.0.1:4739".to_string(),
            domain_id: 5,
            point_id: 6,
            sampling_rate: 64,
        };

        boot.configure_ipfix("br-int", Some(&settings)).await.unwrap();
        let record = sw.ipfix("br-int").unwrap();
        assert_eq!(record.get("targets").map(String::as_str), Some("10.0.0.1:4739"));
        assert_eq!(record.get("sampling").map(String::as_str), Some("64"));
        assert_eq!(
            record
                .get("other_config:enable-tunnel-sampling")
                .map(String::as_str),
            Some("false")
        );

        boot.configure_ipfix("br-int", None).await.unwrap();
        assert_eq!(sw.ipfix("br-int"), None);
    }

    #[tokio::test]
    async fn test_configure_ipfix_failure() {
        let (_sw, boot) = setup();
        let err = boot.configure_ipfix("br-missing", None).await.unwrap_err();
        assert!(err.is_bootstrap());
    }

    #[tokio::test]
    async fn test_system_id() {
        let (sw, boot) = setup();
        assert_eq!(boot.system_id().await, None);
        sw.set_system_id("chassis-7");
        assert_eq!(boot.system_id().await.as_deref(), Some("chassis-7"));
    }
}
