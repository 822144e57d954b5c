//! Fixtures for interface monitor rows and flow rule sets.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use ovs_common::{TableRow, TableUpdate};

/// Builder for one `Interface` monitor row.
///
/// Rows start with a name and an empty `external_ids` map; the ofport and
/// type columns are absent until set.
#[derive(Debug, Clone)]
pub struct InterfaceRow {
    action: String,
    name: Option<String>,
    ofport: Option<Value>,
    external_ids: Option<Value>,
    ids: BTreeMap<String, String>,
    port_type: Option<String>,
}

impl InterfaceRow {
    pub fn new(action: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            name: Some(name.into()),
            ofport: None,
            external_ids: None,
            ids: BTreeMap::new(),
            port_type: None,
        }
    }

    pub fn initial(name: impl Into<String>) -> Self {
        Self::new("initial", name)
    }

    pub fn insert(name: impl Into<String>) -> Self {
        Self::new("insert", name)
    }

    pub fn new_state(name: impl Into<String>) -> Self {
        Self::new("new", name)
    }

    pub fn delete(name: impl Into<String>) -> Self {
        Self::new("delete", name)
    }

    pub fn old(name: impl Into<String>) -> Self {
        Self::new("old", name)
    }

    /// Sets an assigned ofport (may be negative, as OVS reports failures).
    pub fn ofport(mut self, ofport: i64) -> Self {
        self.ofport = Some(json!(ofport));
        self
    }

    /// Sets the ofport column to the empty set.
    pub fn unassigned_ofport(mut self) -> Self {
        self.ofport = Some(json!(["set", []]));
        self
    }

    pub fn iface_id(self, id: &str) -> Self {
        self.external_id("iface-id", id)
    }

    pub fn chassis_id(self, id: &str) -> Self {
        self.external_id("chassis-id", id)
    }

    pub fn external_id(mut self, key: &str, value: &str) -> Self {
        self.ids.insert(key.to_string(), value.to_string());
        self
    }

    pub fn port_type(mut self, port_type: &str) -> Self {
        self.port_type = Some(port_type.to_string());
        self
    }

    pub fn without_name(mut self) -> Self {
        self.name = None;
        self
    }

    /// Omits the `external_ids` column altogether.
    pub fn without_external_ids(mut self) -> Self {
        self.external_ids = Some(Value::Null);
        self
    }

    /// Replaces the `external_ids` datum with an arbitrary value.
    pub fn raw_external_ids(mut self, datum: Value) -> Self {
        self.external_ids = Some(datum);
        self
    }

    pub fn build(self) -> TableRow {
        let mut columns = BTreeMap::new();
        if let Some(name) = self.name {
            columns.insert("name".to_string(), json!(name));
        }
        if let Some(ofport) = self.ofport {
            columns.insert("ofport".to_string(), ofport);
        }
        match self.external_ids {
            Some(Value::Null) => {}
            Some(datum) => {
                columns.insert("external_ids".to_string(), datum);
            }
            None => {
                let pairs: Vec<Value> = self.ids.iter().map(|(k, v)| json!([k, v])).collect();
                columns.insert("external_ids".to_string(), json!(["map", pairs]));
            }
        }
        if let Some(port_type) = self.port_type {
            columns.insert("type".to_string(), json!(port_type));
        }

        TableRow {
            uuid: None,
            action: self.action,
            columns,
        }
    }
}

/// Wraps rows into one `Interface` table update.
pub fn interface_update(rows: Vec<TableRow>) -> TableUpdate {
    TableUpdate {
        table: "Interface".to_string(),
        rows,
    }
}

/// `n` distinct, syntactically valid flow rules.
pub fn numbered_flows(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            format!(
                "table=10,priority=100,ip,nw_dst=10.{}.{}.{},actions=drop",
                (i >> 16) & 0xff,
                (i >> 8) & 0xff,
                i & 0xff
            )
        })
        .collect()
}
