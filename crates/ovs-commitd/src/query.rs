//! Read-only lookups against the switch configuration database.
//!
//! Lookups never fail: an error from the channel (missing row, missing key,
//! unreachable database) is reported as absence, which is how the lifecycle
//! and bootstrap code treat it.

use ovs_common::ovsdb::unquote_string;
use ovs_common::{OvsChannel, OvsProgram};
use tracing::debug;

use crate::commands::{build_br_exists, build_get_interface};
use crate::tables::interface_fields;

/// Returns true if `bridge` exists.
pub async fn bridge_exists<C: OvsChannel + ?Sized>(channel: &C, bridge: &str) -> bool {
    channel
        .run_with_retry(OvsProgram::Vsctl, &build_br_exists(bridge), None)
        .await
        .is_ok()
}

/// Reads an Interface column (or `map:key`), unquoted.
pub async fn interface_property<C: OvsChannel + ?Sized>(
    channel: &C,
    iface: &str,
    column: &str,
) -> Option<String> {
    match channel
        .run_with_retry(OvsProgram::Vsctl, &build_get_interface(iface, column), None)
        .await
    {
        Ok(out) => Some(unquote_string(&out)),
        Err(e) => {
            debug!(iface, column, error = %e, "Interface property unavailable");
            None
        }
    }
}

/// Returns true if an interface named `iface` exists.
pub async fn interface_exists<C: OvsChannel + ?Sized>(channel: &C, iface: &str) -> bool {
    interface_property(channel, iface, interface_fields::NAME)
        .await
        .is_some()
}
