//! The entity registry seam.
//!
//! The registry owns canonical port and chassis entities. The commit layer
//! only ever pushes events into it; it never reads registry state back.

/// Kind of port entity announced to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A local interface bound to a logical port (`external_ids:iface-id`).
    LocalInterface,
    /// A tunnel interface towards a remote chassis (`external_ids:chassis-id`).
    RemoteChassisInterface,
}

impl EntityKind {
    /// Returns the kind name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::LocalInterface => "ovsport",
            EntityKind::RemoteChassisInterface => "ovsport_chassis",
        }
    }

    /// Returns true for interfaces that lead to another chassis.
    pub fn is_remote(&self) -> bool {
        matches!(self, EntityKind::RemoteChassisInterface)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consumer of translated port-inventory events.
///
/// Called from the monitor task, so implementations provide their own
/// interior synchronization.
pub trait EntityRegistry: Send + Sync {
    /// Adds (or refreshes) a port entity.
    fn add_entity(
        &self,
        kind: EntityKind,
        name: &str,
        correlation_id: &str,
        ofport: u32,
        is_remote: bool,
    );

    /// Moves the entity named `name` to the removed/sink state.
    fn move_entity_to_sink(&self, kind: EntityKind, name: &str);

    /// Forces a registry version bump so dependent topology is recomputed.
    fn force_version_bump(&self);
}
