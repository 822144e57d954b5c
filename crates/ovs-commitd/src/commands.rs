//! Argument builders for `ovs-vsctl` and `ovs-ofctl` invocations
//!
//! Each builder returns the argument vector for one program; the program
//! itself and the `--timeout` option are supplied by the channel.

use ovs_common::ovsdb::quote_string;

use crate::tables::{BRIDGE_TABLE, INTERFACE_TABLE, IPFIX_TABLE, OPEN_VSWITCH_TABLE};
use crate::types::{IpfixSettings, OPENFLOW_VERSION, SECURE_FAIL_MODE};

fn args<const N: usize>(list: [&str; N]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Renders `column:key="value"` for a map column assignment.
pub fn map_assignment(column: &str, key: &str, value: &str) -> String {
    format!("{}:{}={}", column, key, quote_string(value))
}

// ---- ovs-ofctl ---------------------------------------------------------

/// Batched additions, rules on stdin.
pub fn build_add_flows_batch(bridge: &str) -> Vec<String> {
    args(["add-flow", "-O", OPENFLOW_VERSION, bridge, "-"])
}

/// Batched strict removals, rules on stdin.
pub fn build_del_flows_batch(bridge: &str) -> Vec<String> {
    args(["del-flows", "-O", OPENFLOW_VERSION, bridge, "--strict", "-"])
}

pub fn build_add_flow(bridge: &str, rule: &str) -> Vec<String> {
    args(["add-flow", "-O", OPENFLOW_VERSION, bridge, rule])
}

pub fn build_del_flow_strict(bridge: &str, rule: &str) -> Vec<String> {
    args(["del-flows", "-O", OPENFLOW_VERSION, bridge, rule, "--strict"])
}

/// Atomic replacement of the whole table from a file.
pub fn build_replace_flows(bridge: &str, path: &str) -> Vec<String> {
    args(["replace-flows", "-O", OPENFLOW_VERSION, bridge, path])
}

/// Removes every flow of the bridge.
pub fn build_clean_flows(bridge: &str) -> Vec<String> {
    args(["del-flows", bridge])
}

pub fn build_dump_flows(bridge: &str) -> Vec<String> {
    args(["dump-flows", "-O", OPENFLOW_VERSION, bridge])
}

pub fn build_dump_tlv_map(bridge: &str) -> Vec<String> {
    args(["dump-tlv-map", bridge])
}

pub fn build_del_tlv_map(bridge: &str) -> Vec<String> {
    args(["del-tlv-map", bridge])
}

pub fn build_add_tlv_map(bridge: &str, mapping: &str) -> Vec<String> {
    args(["add-tlv-map", bridge, mapping])
}

/// Injects `payload` as if received on `ofport`, tagged with `cmd_id`.
pub fn build_packet_out(bridge: &str, cmd_id: u16, ofport: u32, payload: &str) -> Vec<String> {
    let actions = format!(
        "load:{}->NXM_OF_IN_PORT[],load:{}->NXM_NX_REG10[16..31],load:1->NXM_NX_REG10[1],resubmit(,0)",
        ofport, cmd_id
    );
    args(["packet-out", bridge, "NONE", &actions, payload])
}

// ---- ovs-vsctl ---------------------------------------------------------

pub fn build_br_exists(bridge: &str) -> Vec<String> {
    args(["br-exists", bridge])
}

/// Creates a bridge already in secure fail-mode, in one transaction.
pub fn build_add_secure_bridge(bridge: &str) -> Vec<String> {
    let mode = format!("fail-mode={}", SECURE_FAIL_MODE);
    args(["add-br", bridge, "--", "set", BRIDGE_TABLE, bridge, &mode])
}

pub fn build_get_fail_mode(bridge: &str) -> Vec<String> {
    args(["get-fail-mode", bridge])
}

pub fn build_set_fail_mode(bridge: &str, mode: &str) -> Vec<String> {
    args(["set-fail-mode", bridge, mode])
}

/// Reads one Interface column, `column` may be `map:key`.
pub fn build_get_interface(name: &str, column: &str) -> Vec<String> {
    args(["get", INTERFACE_TABLE, name, column])
}

/// Segment adding port `name` to `bridge` and setting its type and columns.
///
/// Returned without a leading `--` so segments can be chained.
pub fn build_add_port(bridge: &str, name: &str, port_type: &str, columns: &[String]) -> Vec<String> {
    let port_type = format!("type={}", port_type);
    let mut cmd = args(["add-port", bridge, name, "--", "set", INTERFACE_TABLE, name, &port_type]);
    cmd.extend(columns.iter().cloned());
    cmd
}

pub fn build_del_port(name: &str) -> Vec<String> {
    args(["del-port", name])
}

/// Joins command segments into one `ovs-vsctl` transaction.
pub fn build_transaction(segments: Vec<Vec<String>>) -> Vec<String> {
    let mut cmd = Vec::new();
    for segment in segments {
        cmd.push("--".to_string());
        cmd.extend(segment);
    }
    cmd
}

pub fn build_clear_ipfix(bridge: &str) -> Vec<String> {
    args(["clear", BRIDGE_TABLE, bridge, "ipfix"])
}

/// Creates an IPFIX record and attaches it to `bridge`.
pub fn build_set_ipfix(bridge: &str, settings: &IpfixSettings) -> Vec<String> {
    build_transaction(vec![
        args(["set", BRIDGE_TABLE, bridge, "ipfix=@i"]),
        vec![
            "--id=@i".to_string(),
            "create".to_string(),
            IPFIX_TABLE.to_string(),
            format!("targets={}", quote_string(&settings.collector)),
            format!("obs_domain_id={}", settings.domain_id),
            format!("obs_point_id={}", settings.point_id),
            format!("sampling={}", settings.sampling_rate),
            map_assignment("other_config", "enable-tunnel-sampling", "false"),
        ],
    ])
}

pub fn build_get_system_id() -> Vec<String> {
    args(["get", OPEN_VSWITCH_TABLE, ".", "external_ids:system-id"])
}

/// Sets one `bfd` key, `config` being `key=value`.
pub fn build_set_bfd(port: &str, config: &str) -> Vec<String> {
    let assignment = format!("bfd:{}", config);
    args(["set", INTERFACE_TABLE, port, &assignment])
}
