//! Typed extraction of OVSDB JSON datums.
//!
//! The monitor prints cells in RFC 7047 notation: atoms are plain JSON
//! values, while sets and maps are tagged arrays (`["set", [...]]`,
//! `["map", [[k, v], ...]]`). An unassigned optional column shows up as an
//! empty set, so the scalar extractors return `None` for it.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::channel::{TableRow, TableUpdate};
use crate::error::MalformedDatum;

/// Characters that must be escaped inside an OVSDB quoted string.
static QUOTE_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(["\\])"#).expect("Invalid regex pattern"));

/// Quotes a value for use on the `ovs-vsctl` command line.
///
/// `ovs-vsctl` parses `column=value` arguments as OVSDB data, so values
/// with spaces, commas or quotes have to be passed as quoted strings.
///
/// ```
/// use ovs_common::ovsdb::quote_string;
///
/// assert_eq!(quote_string("10.0.0.1:4739"), "\"10.0.0.1:4739\"");
/// assert_eq!(quote_string("a\"b"), "\"a\\\"b\"");
/// ```
pub fn quote_string(s: &str) -> String {
    format!("\"{}\"", QUOTE_ESCAPE_RE.replace_all(s, r"\$1"))
}

/// Reverses [`quote_string`] for values printed by `ovs-vsctl get`.
///
/// Bare (unquoted) values are returned unchanged.
pub fn unquote_string(s: &str) -> String {
    let s = s.trim();
    match s.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => s.to_string(),
    }
}

/// Extracts an integer atom.
pub fn parse_integer(datum: &Value) -> Option<i64> {
    datum.as_i64()
}

/// Extracts a string atom.
pub fn parse_string(datum: &Value) -> Option<String> {
    datum.as_str().map(str::to_string)
}

/// Extracts a UUID atom (`["uuid", "..."]`) or a bare UUID string.
pub fn parse_uuid(datum: &Value) -> Option<String> {
    match datum {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => match items.as_slice() {
            [Value::String(tag), Value::String(uuid)] if tag == "uuid" => Some(uuid.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// Extracts a string-to-string map datum.
///
/// Anything other than `["map", [[k, v], ...]]` with string keys and values
/// is reported as malformed rather than being read as an empty map.
pub fn parse_map(datum: &Value) -> Result<BTreeMap<String, String>, MalformedDatum> {
    let malformed = || MalformedDatum::new("map", datum);

    let pairs = match datum.as_array().map(Vec::as_slice) {
        Some([Value::String(tag), Value::Array(pairs)]) if tag == "map" => pairs,
        _ => return Err(malformed()),
    };

    let mut map = BTreeMap::new();
    for pair in pairs {
        match pair.as_array().map(Vec::as_slice) {
            Some([Value::String(k), Value::String(v)]) => {
                map.insert(k.clone(), v.clone());
            }
            _ => return Err(malformed()),
        }
    }
    Ok(map)
}

/// Parses one line of `ovsdb-client monitor --format=json` output.
///
/// The line is a table object with `headings` and `data`; the `row` and
/// `action` headings are lifted into [`TableRow`] fields and the remaining
/// cells are kept as raw datums keyed by column name.
pub fn parse_monitor_update(table: &str, line: &str) -> Result<TableUpdate, MalformedDatum> {
    let doc: Value =
        serde_json::from_str(line).map_err(|_| MalformedDatum::new("monitor update", line))?;

    let headings: Vec<&str> = doc
        .get("headings")
        .and_then(Value::as_array)
        .ok_or_else(|| MalformedDatum::new("monitor headings", &doc))?
        .iter()
        .map(|h| h.as_str().unwrap_or_default())
        .collect();

    let data = doc
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| MalformedDatum::new("monitor data", &doc))?;

    let mut rows = Vec::with_capacity(data.len());
    for cells in data {
        let cells = cells
            .as_array()
            .ok_or_else(|| MalformedDatum::new("monitor row", cells))?;

        let mut row = TableRow {
            uuid: None,
            action: String::new(),
            columns: BTreeMap::new(),
        };
        for (heading, cell) in headings.iter().zip(cells) {
            match *heading {
                "row" => row.uuid = parse_uuid(cell),
                "action" => row.action = parse_string(cell).unwrap_or_default(),
                column => {
                    row.columns.insert(column.to_string(), cell.clone());
                }
            }
        }
        rows.push(row);
    }

    Ok(TableUpdate {
        table: table.to_string(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_quote_round_trip() {
        for raw in ["simple", "with space", "quote\"inside", "back\\slash"] {
            assert_eq!(unquote_string(&quote_string(raw)), raw);
        }
        assert_eq!(unquote_string("secure"), "secure");
        assert_eq!(unquote_string("\"chassis-42\"\n"), "chassis-42");
    }

    #[test]
    fn test_parse_scalars() {
        assert_eq!(parse_integer(&json!(5)), Some(5));
        assert_eq!(parse_integer(&json!(-1)), Some(-1));
        assert_eq!(parse_integer(&json!(["set", []])), None);
        assert_eq!(parse_string(&json!("tupleNet-1")), Some("tupleNet-1".to_string()));
        assert_eq!(parse_string(&json!(["set", []])), None);
    }

    #[test]
    fn test_parse_uuid() {
        assert_eq!(parse_uuid(&json!(["uuid", "abc"])), Some("abc".to_string()));
        assert_eq!(parse_uuid(&json!("abc")), Some("abc".to_string()));
        assert_eq!(parse_uuid(&json!(["named-uuid", "abc"])), None);
    }

    #[test]
    fn test_parse_map() {
        let map = parse_map(&json!(["map", [["iface-id", "lsp-1"], ["attached-mac", "aa"]]]))
            .unwrap();
        assert_eq!(map.get("iface-id").map(String::as_str), Some("lsp-1"));
        assert_eq!(map.len(), 2);

        assert!(parse_map(&json!(["map", []])).unwrap().is_empty());
    }

    #[test]
    fn test_parse_map_malformed() {
        assert!(parse_map(&json!(["set", []])).is_err());
        assert!(parse_map(&json!("iface-id=lsp-1")).is_err());
        assert!(parse_map(&json!(["map", [["iface-id"]]])).is_err());
        assert!(parse_map(&json!(["map", [["ofport", 5]]])).is_err());
    }

    #[test]
    fn test_parse_monitor_update() {
        let line = json!({
            "caption": "Interface table",
            "headings": ["row", "action", "name", "ofport", "external_ids", "type"],
            "data": [
                [["uuid", "u1"], "initial", "br-int", 65534, ["map", []], "internal"],
                [["uuid", "u2"], "insert", "tupleNet-1", ["set", []],
                    ["map", [["chassis-id", "c1"]]], "geneve"]
            ]
        })
        .to_string();

        let update = parse_monitor_update("Interface", &line).unwrap();
        assert_eq!(update.table, "Interface");
        assert_eq!(update.rows.len(), 2);

        let first = &update.rows[0];
        assert_eq!(first.uuid.as_deref(), Some("u1"));
        assert_eq!(first.action, "initial");
        assert_eq!(first.column("ofport"), Some(&json!(65534)));
        assert_eq!(first.column("type"), Some(&json!("internal")));

        let second = &update.rows[1];
        assert_eq!(second.action, "insert");
        assert_eq!(second.column("ofport").and_then(parse_integer), None);
    }

    #[test]
    fn test_parse_monitor_update_rejects_garbage() {
        assert!(parse_monitor_update("Interface", "not json").is_err());
        assert!(parse_monitor_update("Interface", "{\"data\": []}").is_err());
    }
}
