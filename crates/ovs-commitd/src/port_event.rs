//! Port-event translation
//!
//! Turns Interface table monitor rows into entity registry events. A row
//! carrying `external_ids:iface-id` is a local interface; one carrying
//! `external_ids:chassis-id` is a tunnel towards a remote chassis. Rows that
//! are incomplete, unclassifiable or still waiting for an ofport are
//! dropped; the monitor replays state on reconnect, so a dropped row is
//! picked up again once it is complete.

use std::collections::BTreeMap;
use std::sync::Arc;

use ovs_common::ovsdb::{parse_integer, parse_map, parse_string};
use ovs_common::{EntityKind, EntityRegistry, OvsChannel, OvsResult, TableRow, TableUpdate};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::tables::{external_ids, interface_fields, port_types, INTERFACE_TABLE};

/// Monitor action of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAction {
    Initial,
    Insert,
    New,
    Old,
    Delete,
}

impl RecordAction {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "initial" => Some(RecordAction::Initial),
            "insert" => Some(RecordAction::Insert),
            "new" => Some(RecordAction::New),
            "old" => Some(RecordAction::Old),
            "delete" => Some(RecordAction::Delete),
            _ => None,
        }
    }

    /// `old` and `delete` retire the entity; the rest add or refresh it.
    pub fn is_removal(&self) -> bool {
        matches!(self, RecordAction::Old | RecordAction::Delete)
    }
}

/// A complete Interface row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRecord {
    pub action: RecordAction,
    pub ofport: i64,
    pub name: String,
    pub external_ids: BTreeMap<String, String>,
    pub port_type: Option<String>,
}

impl InterfaceRecord {
    /// Extracts a record from a monitor row.
    pub fn from_row(row: &TableRow) -> Result<Self, DropReason> {
        let action = RecordAction::parse(&row.action)
            .ok_or_else(|| DropReason::UnknownAction(row.action.clone()))?;

        let ofport = row
            .column(interface_fields::OFPORT)
            .and_then(parse_integer)
            .ok_or(DropReason::Incomplete("ofport"))?;
        let name = row
            .column(interface_fields::NAME)
            .and_then(parse_string)
            .ok_or(DropReason::Incomplete("name"))?;
        let external_ids = row
            .column(interface_fields::EXTERNAL_IDS)
            .ok_or(DropReason::Incomplete("external_ids"))
            .and_then(|datum| parse_map(datum).map_err(|_| DropReason::Incomplete("external_ids")))?;
        let port_type = row.column(interface_fields::TYPE).and_then(parse_string);

        Ok(Self {
            action,
            ofport,
            name,
            external_ids,
            port_type,
        })
    }

    /// Classifies the record and returns its correlation id.
    pub fn classify(&self) -> Option<(EntityKind, &str)> {
        if let Some(id) = self.external_ids.get(external_ids::IFACE_ID) {
            Some((EntityKind::LocalInterface, id))
        } else {
            self.external_ids
                .get(external_ids::CHASSIS_ID)
                .map(|id| (EntityKind::RemoteChassisInterface, id.as_str()))
        }
    }

    pub fn is_internal(&self) -> bool {
        self.port_type.as_deref() == Some(port_types::INTERNAL)
    }
}

/// Why a row produced no registry event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    UnknownAction(String),
    /// A required column was missing or malformed.
    Incomplete(&'static str),
    /// Neither `iface-id` nor `chassis-id` is set.
    Unclassified,
    /// The switch has not assigned an ofport yet.
    NegativeOfport(i64),
}

/// What translating one row did to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Added { kind: EntityKind, name: String },
    Removed { kind: EntityKind, name: String },
    Dropped(DropReason),
}

/// Feeds Interface monitor rows into an [`EntityRegistry`].
pub struct PortEventTranslator<R: EntityRegistry + ?Sized> {
    registry: Arc<R>,
}

impl<R: EntityRegistry + ?Sized> PortEventTranslator<R> {
    pub fn new(registry: Arc<R>) -> Self {
        Self { registry }
    }

    /// Translates every row of an update, in order.
    pub fn handle_update(&self, update: &TableUpdate) -> Vec<Outcome> {
        update.rows.iter().map(|row| self.handle_row(row)).collect()
    }

    pub fn handle_row(&self, row: &TableRow) -> Outcome {
        match InterfaceRecord::from_row(row) {
            Ok(record) => self.handle_record(&record),
            Err(DropReason::UnknownAction(action)) => {
                warn!(action = %action, "Unknown interface action");
                Outcome::Dropped(DropReason::UnknownAction(action))
            }
            Err(reason) => {
                debug!(action = %row.action, ?reason, row = ?row.columns, "Record does not contain enough info");
                Outcome::Dropped(reason)
            }
        }
    }

    pub fn handle_record(&self, record: &InterfaceRecord) -> Outcome {
        debug!(action = ?record.action, name = %record.name, "Interface record");

        // A new internal port may mean a new bridge, which may need patch ports.
        if record.is_internal() {
            self.registry.force_version_bump();
        }

        let Some((kind, correlation_id)) = record.classify() else {
            info!(name = %record.name, "external_ids has no chassis-id or iface-id");
            return Outcome::Dropped(DropReason::Unclassified);
        };

        if record.action.is_removal() {
            info!(name = %record.name, %kind, correlation_id, "Moving port to sink");
            self.registry.move_entity_to_sink(kind, &record.name);
            return Outcome::Removed {
                kind,
                name: record.name.clone(),
            };
        }

        let Ok(ofport) = u32::try_from(record.ofport) else {
            info!(name = %record.name, ofport = record.ofport, "Ignoring port without a valid ofport");
            return Outcome::Dropped(DropReason::NegativeOfport(record.ofport));
        };

        info!(name = %record.name, %kind, ofport, correlation_id, "Adding port entity");
        self.registry
            .add_entity(kind, &record.name, correlation_id, ofport, kind.is_remote());
        Outcome::Added {
            kind,
            name: record.name.clone(),
        }
    }

    /// Translates updates until the channel closes.
    pub async fn run(self, mut updates: mpsc::Receiver<TableUpdate>) {
        while let Some(update) = updates.recv().await {
            self.handle_update(&update);
        }
        info!("Interface monitor closed");
    }
}

/// Subscribes to the Interface table and translates it on a background task.
pub async fn spawn_port_monitor<C, R>(channel: &C, registry: Arc<R>) -> OvsResult<JoinHandle<()>>
where
    C: OvsChannel + ?Sized,
    R: EntityRegistry + ?Sized + 'static,
{
    let updates = channel
        .subscribe(INTERFACE_TABLE, &interface_fields::MONITORED)
        .await?;
    info!("Started monitoring interface changes");
    let translator = PortEventTranslator::new(registry);
    Ok(tokio::spawn(translator.run(updates)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovs_commit_test::{interface_update, InterfaceRow, RecordingRegistry, RegistryEvent};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn translator() -> (Arc<RecordingRegistry>, PortEventTranslator<RecordingRegistry>) {
        let registry = Arc::new(RecordingRegistry::new());
        (registry.clone(), PortEventTranslator::new(registry))
    }

    #[test]
    fn test_local_interface_added() {
        let (registry, t) = translator();
        let outcome = t.handle_row(&InterfaceRow::insert("veth0").ofport(3).iface_id("lsp-1").build());

        assert_eq!(
            outcome,
            Outcome::Added {
                kind: EntityKind::LocalInterface,
                name: "veth0".to_string()
            }
        );
        assert_eq!(
            registry.events(),
            vec![RegistryEvent::added(EntityKind::LocalInterface, "veth0", "lsp-1", 3)]
        );
    }

    #[test]
    fn test_chassis_interface_is_remote() {
        let (registry, t) = translator();
        t.handle_row(
            &InterfaceRow::initial("tupleNet-1")
                .ofport(9)
                .chassis_id("chassis-1")
                .port_type("geneve")
                .build(),
        );
        assert_eq!(
            registry.events(),
            vec![RegistryEvent::Added {
                kind: EntityKind::RemoteChassisInterface,
                name: "tupleNet-1".to_string(),
                correlation_id: "chassis-1".to_string(),
                ofport: 9,
                is_remote: true,
            }]
        );
    }

    #[test]
    fn test_iface_id_wins_over_chassis_id() {
        let (registry, t) = translator();
        t.handle_row(
            &InterfaceRow::new_state("p")
                .ofport(1)
                .iface_id("lsp")
                .chassis_id("c")
                .build(),
        );
        assert_eq!(
            registry.events(),
            vec![RegistryEvent::added(EntityKind::LocalInterface, "p", "lsp", 1)]
        );
    }

    #[test]
    fn test_delete_and_old_move_to_sink() {
        let (registry, t) = translator();
        t.handle_row(&InterfaceRow::delete("veth0").ofport(-1).iface_id("lsp-1").build());
        t.handle_row(&InterfaceRow::old("tupleNet-1").ofport(4).chassis_id("c1").build());

        assert_eq!(
            registry.events(),
            vec![
                RegistryEvent::moved(EntityKind::LocalInterface, "veth0"),
                RegistryEvent::moved(EntityKind::RemoteChassisInterface, "tupleNet-1"),
            ]
        );
    }

    #[test]
    fn test_incomplete_records_dropped() {
        let (registry, t) = translator();
        let rows = vec![
            InterfaceRow::insert("a").unassigned_ofport().iface_id("x").build(),
            InterfaceRow::insert("b").iface_id("x").build(),
            InterfaceRow::insert("c").ofport(1).iface_id("x").without_name().build(),
            InterfaceRow::insert("d").ofport(1).without_external_ids().build(),
            InterfaceRow::insert("e").ofport(1).raw_external_ids(json!(["set", []])).build(),
            InterfaceRow::delete("f").unassigned_ofport().iface_id("x").build(),
        ];

        let outcomes = t.handle_update(&interface_update(rows));
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, Outcome::Dropped(DropReason::Incomplete(_)))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_action_dropped() {
        let (registry, t) = translator();
        let outcome = t.handle_row(&InterfaceRow::new("modify", "a").ofport(1).iface_id("x").build());
        assert_eq!(outcome, Outcome::Dropped(DropReason::UnknownAction("modify".to_string())));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unclassified_dropped() {
        let (registry, t) = translator();
        let outcome = t.handle_row(&InterfaceRow::insert("eth0").ofport(1).external_id("foo", "bar").build());
        assert_eq!(outcome, Outcome::Dropped(DropReason::Unclassified));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_internal_port_bumps_version() {
        let (registry, t) = translator();
        let outcome = t.handle_row(&InterfaceRow::insert("br-ext").ofport(65534).port_type("internal").build());

        assert_eq!(outcome, Outcome::Dropped(DropReason::Unclassified));
        assert_eq!(registry.events(), vec![RegistryEvent::VersionBump]);

        t.handle_row(&InterfaceRow::insert("br-int").ofport(65534).port_type("internal").build());
        assert_eq!(registry.version_bumps(), 2);
    }

    #[test]
    fn test_negative_then_valid_ofport() {
        let (registry, t) = translator();
        let first = t.handle_row(&InterfaceRow::insert("veth0").ofport(-1).iface_id("lsp-1").build());
        assert_eq!(first, Outcome::Dropped(DropReason::NegativeOfport(-1)));
        assert!(registry.is_empty());

        t.handle_row(&InterfaceRow::new_state("veth0").ofport(5).iface_id("lsp-1").build());
        assert_eq!(
            registry.events(),
            vec![RegistryEvent::added(EntityKind::LocalInterface, "veth0", "lsp-1", 5)]
        );
    }

    #[tokio::test]
    async fn test_spawn_port_monitor() {
        let sw = ovs_commit_test::FakeSwitch::new();
        let registry = Arc::new(RecordingRegistry::new());
        let handle = spawn_port_monitor(&sw, registry.clone()).await.unwrap();

        sw.push_update(interface_update(vec![
            InterfaceRow::initial("veth0").ofport(2).iface_id("lsp-1").build(),
        ]));
        sw.disconnect_monitors();
        handle.await.unwrap();

        assert_eq!(
            registry.events(),
            vec![RegistryEvent::added(EntityKind::LocalInterface, "veth0", "lsp-1", 2)]
        );
    }
}
