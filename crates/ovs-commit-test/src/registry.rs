//! Entity registry that records every event it receives.

use parking_lot::Mutex;

use ovs_common::{EntityKind, EntityRegistry};

/// One call made into a [`RecordingRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Added {
        kind: EntityKind,
        name: String,
        correlation_id: String,
        ofport: u32,
        is_remote: bool,
    },
    MovedToSink {
        kind: EntityKind,
        name: String,
    },
    VersionBump,
}

impl RegistryEvent {
    /// Shorthand for an `Added` event.
    pub fn added(
        kind: EntityKind,
        name: impl Into<String>,
        correlation_id: impl Into<String>,
        ofport: u32,
    ) -> Self {
        RegistryEvent::Added {
            kind,
            name: name.into(),
            correlation_id: correlation_id.into(),
            ofport,
            is_remote: kind.is_remote(),
        }
    }

    /// Shorthand for a `MovedToSink` event.
    pub fn moved(kind: EntityKind, name: impl Into<String>) -> Self {
        RegistryEvent::MovedToSink {
            kind,
            name: name.into(),
        }
    }
}

/// Registry that keeps an ordered log instead of entity state.
#[derive(Debug, Default)]
pub struct RecordingRegistry {
    events: Mutex<Vec<RegistryEvent>>,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events in arrival order.
    pub fn events(&self) -> Vec<RegistryEvent> {
        self.events.lock().clone()
    }

    /// Removes and returns the events recorded so far.
    pub fn take(&self) -> Vec<RegistryEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Number of forced version bumps.
    pub fn version_bumps(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, RegistryEvent::VersionBump))
            .count()
    }
}

impl EntityRegistry for RecordingRegistry {
    fn add_entity(
        &self,
        kind: EntityKind,
        name: &str,
        correlation_id: &str,
        ofport: u32,
        is_remote: bool,
    ) {
        self.events.lock().push(RegistryEvent::Added {
            kind,
            name: name.to_string(),
            correlation_id: correlation_id.to_string(),
            ofport,
            is_remote,
        });
    }

    fn move_entity_to_sink(&self, kind: EntityKind, name: &str) {
        self.events.lock().push(RegistryEvent::MovedToSink {
            kind,
            name: name.to_string(),
        });
    }

    fn force_version_bump(&self) {
        self.events.lock().push(RegistryEvent::VersionBump);
    }
}
