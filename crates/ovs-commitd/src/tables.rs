//! OVSDB table and column name constants

pub const BRIDGE_TABLE: &str = "Bridge";
pub const INTERFACE_TABLE: &str = "Interface";
pub const IPFIX_TABLE: &str = "IPFIX";
pub const OPEN_VSWITCH_TABLE: &str = "Open_vSwitch";

/// Interface columns
pub mod interface_fields {
    pub const NAME: &str = "name";
    pub const OFPORT: &str = "ofport";
    pub const TYPE: &str = "type";
    pub const EXTERNAL_IDS: &str = "external_ids";
    pub const MAC_IN_USE: &str = "mac_in_use";

    /// Columns the port monitor subscribes to.
    pub const MONITORED: [&str; 4] = [NAME, OFPORT, EXTERNAL_IDS, TYPE];
}

/// Interface `external_ids` keys
pub mod external_ids {
    pub const IFACE_ID: &str = "iface-id";
    pub const CHASSIS_ID: &str = "chassis-id";
    pub const SYSTEM_ID: &str = "system-id";
}

/// Interface `options` keys
pub mod options {
    pub const REMOTE_IP: &str = "remote_ip";
    pub const KEY: &str = "key";
    pub const CSUM: &str = "csum";
    pub const PEER: &str = "peer";
}

/// Interface types
pub mod port_types {
    pub const PATCH: &str = "patch";
    pub const INTERNAL: &str = "internal";
}
