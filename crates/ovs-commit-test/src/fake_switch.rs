//! In-memory stand-in for a local Open vSwitch.
//!
//! [`FakeSwitch`] interprets the subset of `ovs-vsctl` and `ovs-ofctl`
//! commands the commit layer issues, keeping bridges, interfaces, flow
//! tables and TLV maps in memory. `ovs-vsctl` invocations are applied as a
//! transaction: either every `--`-separated command succeeds or the state is
//! left untouched, as with the real database.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use ovs_common::ovsdb::{quote_string, unquote_string};
use ovs_common::process::render_command;
use ovs_common::{OvsChannel, OvsError, OvsProgram, OvsResult, TableUpdate, DEFAULT_RETRY_ATTEMPTS};

/// Ofport OVS assigns to a bridge's own internal interface.
const LOCAL_OFPORT: i64 = 65534;

/// One command received by the fake switch.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub program: OvsProgram,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl RecordedCall {
    /// First argument that is neither an option nor an option value.
    pub fn command(&self) -> Option<&str> {
        let mut skip_next = false;
        for arg in &self.args {
            if skip_next {
                skip_next = false;
                continue;
            }
            if arg == "-O" {
                skip_next = true;
                continue;
            }
            if !arg.starts_with("--") {
                return Some(arg.as_str());
            }
        }
        None
    }

    /// Returns true if any argument equals `arg`.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Returns true if this call reads its flows from stdin.
    pub fn is_batch(&self) -> bool {
        self.has_arg("-")
    }
}

type Matcher = Box<dyn Fn(&RecordedCall) -> bool + Send + Sync>;

struct FailRule {
    matcher: Matcher,
    remaining: Option<usize>,
}

#[derive(Debug, Clone, Default)]
struct Interface {
    bridge: String,
    iface_type: String,
    ofport: i64,
    mac: String,
    options: BTreeMap<String, String>,
    external_ids: BTreeMap<String, String>,
    bfd: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TlvEntry {
    class: u16,
    tlv_type: u8,
    len: u8,
    field: String,
}

#[derive(Debug, Clone, Default)]
struct Bridge {
    fail_mode: Option<String>,
    flows: Vec<String>,
    tlv_map: Vec<TlvEntry>,
    ipfix: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default)]
struct SwitchState {
    bridges: BTreeMap<String, Bridge>,
    interfaces: BTreeMap<String, Interface>,
    external_ids: BTreeMap<String, String>,
    next_ofport: i64,
    tlv_frozen: bool,
}

impl SwitchState {
    fn bridge(&self, name: &str) -> Result<&Bridge, String> {
        self.bridges
            .get(name)
            .ok_or_else(|| format!("no bridge named {}", name))
    }

    fn bridge_mut(&mut self, name: &str) -> Result<&mut Bridge, String> {
        self.bridges
            .get_mut(name)
            .ok_or_else(|| format!("no bridge named {}", name))
    }

    fn interface(&self, name: &str) -> Result<&Interface, String> {
        self.interfaces
            .get(name)
            .ok_or_else(|| format!("no row \"{}\" in table Interface", name))
    }

    fn interface_mut(&mut self, name: &str) -> Result<&mut Interface, String> {
        self.interfaces
            .get_mut(name)
            .ok_or_else(|| format!("no row \"{}\" in table Interface", name))
    }

    fn attach(&mut self, bridge: &str, name: &str, iface_type: &str, ofport: Option<i64>) {
        let ofport = ofport.unwrap_or_else(|| {
            self.next_ofport += 1;
            self.next_ofport
        });
        let iface = Interface {
            bridge: bridge.to_string(),
            iface_type: iface_type.to_string(),
            ofport,
            mac: format!("02:00:00:00:{:02x}:{:02x}", (ofport >> 8) & 0xff, ofport & 0xff),
            ..Interface::default()
        };
        self.interfaces.insert(name.to_string(), iface);
    }

    fn add_bridge(&mut self, name: &str) -> Result<(), String> {
        if self.bridges.contains_key(name) {
            return Err(format!("cannot create a bridge named {} because a bridge named {} already exists", name, name));
        }
        self.bridges.insert(name.to_string(), Bridge::default());
        self.attach(name, name, "internal", Some(LOCAL_OFPORT));
        Ok(())
    }
}

/// Strict-match identity of a rule: everything before its action list.
fn match_clause(rule: &str) -> String {
    let rule = rule.trim();
    let head = match rule.find("actions=") {
        Some(idx) => &rule[..idx],
        None => rule,
    };
    head.trim().trim_end_matches(',').trim().to_string()
}

fn split_assignment(token: &str) -> Result<(&str, Option<&str>, String), String> {
    let (lhs, value) = token
        .split_once('=')
        .ok_or_else(|| format!("{}: argument does not end in \"=\" followed by a value", token))?;
    let (column, key) = match lhs.split_once(':') {
        Some((column, key)) => (column, Some(key)),
        None => (lhs, None),
    };
    Ok((column, key, unquote_string(value)))
}

fn parse_number(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

/// Parses `{class=0xffee,type=0,len=8}->tun_metadata0`.
fn parse_tlv_spec(spec: &str) -> Result<TlvEntry, String> {
    let bad = || format!("{}: invalid tlv mapping", spec);
    let (fields, target) = spec.split_once("}->").ok_or_else(bad)?;
    let fields = fields.strip_prefix('{').ok_or_else(bad)?;

    let mut entry = TlvEntry {
        class: 0,
        tlv_type: 0,
        len: 0,
        field: target.trim().to_string(),
    };
    for kv in fields.split(',') {
        let (k, v) = kv.split_once('=').ok_or_else(bad)?;
        let n = parse_number(v).ok_or_else(bad)?;
        match k.trim() {
            "class" => entry.class = u16::try_from(n).map_err(|_| bad())?,
            "type" => entry.tlv_type = u8::try_from(n).map_err(|_| bad())?,
            "len" => entry.len = u8::try_from(n).map_err(|_| bad())?,
            _ => return Err(bad()),
        }
    }
    Ok(entry)
}

fn render_tlv_dump(bridge: &Bridge) -> String {
    let mut out = String::from(
        "NXST_TLV_TABLE reply (xid=0x4):\n max option space=256 max fields=64\n allocated option space=0\n",
    );
    if bridge.tlv_map.is_empty() {
        return out;
    }
    out.push_str("\n mapping table:\n class\ttype\tlength\tmatch field\n ------\t----\t------\t-----------\n");
    for e in &bridge.tlv_map {
        out.push_str(&format!(
            " 0x{:x}\t0x{:x}\t{}\t{}\n",
            e.class, e.tlv_type, e.len, e.field
        ));
    }
    out
}

/// In-memory switch implementing [`OvsChannel`].
pub struct FakeSwitch {
    state: Mutex<SwitchState>,
    calls: Mutex<Vec<RecordedCall>>,
    fail_rules: Mutex<Vec<FailRule>>,
    subscribers: Mutex<Vec<mpsc::Sender<TableUpdate>>>,
    retry_attempts: u32,
    yield_per_call: bool,
}

impl Default for FakeSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSwitch {
    /// Creates an empty switch: no bridges, no interfaces.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SwitchState::default()),
            calls: Mutex::new(Vec::new()),
            fail_rules: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            yield_per_call: false,
        }
    }

    /// Overrides the attempts used by `run_with_retry`.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Yields to the scheduler before every call, so concurrent callers
    /// interleave the way separate processes would.
    pub fn with_yield_per_call(mut self) -> Self {
        self.yield_per_call = true;
        self
    }

    // ---- setup -------------------------------------------------------

    /// Creates a bridge with no fail-mode set. Panics if it already exists.
    pub fn add_bridge(&self, name: &str) {
        if let Err(msg) = self.state.lock().add_bridge(name) {
            panic!("{}", msg);
        }
    }

    /// Sets a bridge's fail-mode directly.
    pub fn set_fail_mode(&self, bridge: &str, mode: &str) {
        if let Some(br) = self.state.lock().bridges.get_mut(bridge) {
            br.fail_mode = Some(mode.to_string());
        }
    }

    /// Attaches an interface to a bridge, as if created by another agent.
    pub fn add_interface(&self, bridge: &str, name: &str, iface_type: &str, external_ids: &[(&str, &str)]) {
        let mut state = self.state.lock();
        state.attach(bridge, name, iface_type, None);
        if let Some(iface) = state.interfaces.get_mut(name) {
            for (k, v) in external_ids {
                iface.external_ids.insert(k.to_string(), v.to_string());
            }
        }
    }

    /// Sets `Open_vSwitch . external_ids:system-id`.
    pub fn set_system_id(&self, id: &str) {
        self.state
            .lock()
            .external_ids
            .insert("system-id".to_string(), id.to_string());
    }

    /// Installs a flow directly, bypassing the command surface.
    pub fn seed_flow(&self, bridge: &str, rule: &str) {
        if let Some(br) = self.state.lock().bridges.get_mut(bridge) {
            br.flows.push(rule.to_string());
        }
    }

    /// When frozen, `add-tlv-map` succeeds but the mapping never appears.
    pub fn freeze_tlv_map(&self, frozen: bool) {
        self.state.lock().tlv_frozen = frozen;
    }

    // ---- failure injection --------------------------------------------

    /// Fails every call accepted by `matcher`.
    pub fn fail_when<F>(&self, matcher: F)
    where
        F: Fn(&RecordedCall) -> bool + Send + Sync + 'static,
    {
        self.fail_rules.lock().push(FailRule {
            matcher: Box::new(matcher),
            remaining: None,
        });
    }

    /// Fails the next `times` calls accepted by `matcher`.
    pub fn fail_times<F>(&self, times: usize, matcher: F)
    where
        F: Fn(&RecordedCall) -> bool + Send + Sync + 'static,
    {
        self.fail_rules.lock().push(FailRule {
            matcher: Box::new(matcher),
            remaining: Some(times),
        });
    }

    /// Removes all failure rules.
    pub fn clear_failures(&self) {
        self.fail_rules.lock().clear();
    }

    // ---- call log -----------------------------------------------------

    /// Every call received so far, including failed ones.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Number of calls whose command is `command`.
    pub fn count_calls(&self, command: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.command() == Some(command))
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    // ---- inspection ---------------------------------------------------

    pub fn bridge_exists(&self, bridge: &str) -> bool {
        self.state.lock().bridges.contains_key(bridge)
    }

    pub fn fail_mode(&self, bridge: &str) -> Option<String> {
        self.state
            .lock()
            .bridges
            .get(bridge)
            .and_then(|b| b.fail_mode.clone())
    }

    /// Flow table of a bridge in installation order.
    pub fn flows(&self, bridge: &str) -> Vec<String> {
        self.state
            .lock()
            .bridges
            .get(bridge)
            .map(|b| b.flows.clone())
            .unwrap_or_default()
    }

    /// Interface names, sorted.
    pub fn interface_names(&self) -> Vec<String> {
        self.state.lock().interfaces.keys().cloned().collect()
    }

    pub fn has_interface(&self, name: &str) -> bool {
        self.state.lock().interfaces.contains_key(name)
    }

    pub fn interface_bridge(&self, name: &str) -> Option<String> {
        self.state.lock().interfaces.get(name).map(|i| i.bridge.clone())
    }

    pub fn interface_type(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .interfaces
            .get(name)
            .map(|i| i.iface_type.clone())
    }

    pub fn interface_option(&self, name: &str, key: &str) -> Option<String> {
        self.state
            .lock()
            .interfaces
            .get(name)
            .and_then(|i| i.options.get(key).cloned())
    }

    pub fn interface_external_id(&self, name: &str, key: &str) -> Option<String> {
        self.state
            .lock()
            .interfaces
            .get(name)
            .and_then(|i| i.external_ids.get(key).cloned())
    }

    pub fn interface_bfd(&self, name: &str, key: &str) -> Option<String> {
        self.state
            .lock()
            .interfaces
            .get(name)
            .and_then(|i| i.bfd.get(key).cloned())
    }

    /// TLV mappings of a bridge rendered as `{class=..,type=..,len=..}->field`.
    pub fn tlv_mappings(&self, bridge: &str) -> Vec<String> {
        self.state
            .lock()
            .bridges
            .get(bridge)
            .map(|b| {
                b.tlv_map
                    .iter()
                    .map(|e| format!("{{class=0x{:x},type={},len={}}}->{}", e.class, e.tlv_type, e.len, e.field))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The IPFIX record attached to a bridge, if any.
    pub fn ipfix(&self, bridge: &str) -> Option<BTreeMap<String, String>> {
        self.state
            .lock()
            .bridges
            .get(bridge)
            .and_then(|b| b.ipfix.clone())
    }

    // ---- monitor ------------------------------------------------------

    /// Delivers an update to every live subscriber; returns how many got it.
    pub fn push_update(&self, update: TableUpdate) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers
            .iter()
            .filter(|tx| tx.try_send(update.clone()).is_ok())
            .count()
    }

    /// Drops every subscription, as if the monitor connection went away.
    pub fn disconnect_monitors(&self) {
        self.subscribers.lock().clear();
    }

    // ---- interpreter --------------------------------------------------

    fn should_fail(&self, call: &RecordedCall) -> bool {
        let mut rules = self.fail_rules.lock();
        let Some(idx) = rules.iter().position(|r| (r.matcher)(call)) else {
            return false;
        };
        if let Some(remaining) = rules[idx].remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                rules.remove(idx);
            }
        }
        true
    }

    fn vsctl(&self, args: &[String]) -> Result<String, String> {
        let segments: Vec<Vec<&str>> = args
            .split(|a| a == "--")
            .map(|seg| seg.iter().map(String::as_str).collect::<Vec<_>>())
            .filter(|seg| !seg.is_empty())
            .collect();

        let mut state = self.state.lock();
        let mut scratch = state.clone();
        let mut named: HashMap<String, BTreeMap<String, String>> = HashMap::new();
        let mut output = Vec::new();

        // `--id=@name create ...` rows are visible to every other command of
        // the transaction, wherever they appear.
        for seg in &segments {
            let (id, cmd) = split_options(seg);
            if cmd.first() == Some(&"create") {
                let mut record = BTreeMap::new();
                for token in cmd.iter().skip(2) {
                    let (column, key, value) = split_assignment(token)?;
                    let column = match key {
                        Some(key) => format!("{}:{}", column, key),
                        None => column.to_string(),
                    };
                    record.insert(column, value);
                }
                if let Some(id) = id {
                    named.insert(id.to_string(), record);
                }
            }
        }

        for seg in &segments {
            let (_, cmd) = split_options(seg);
            let Some((&name, rest)) = cmd.split_first() else {
                continue;
            };
            if let Some(out) = vsctl_command(&mut scratch, &named, name, rest)? {
                output.push(out);
            }
        }

        *state = scratch;
        Ok(output.join("\n"))
    }

    fn ofctl(&self, args: &[String], stdin: Option<&str>) -> Result<String, String> {
        let mut positional = Vec::new();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-O" => {
                    iter.next();
                }
                a if a.starts_with("--") => {}
                a => positional.push(a),
            }
        }

        let (&cmd, rest) = positional
            .split_first()
            .ok_or_else(|| "missing command name".to_string())?;
        let (&bridge, rest) = rest
            .split_first()
            .ok_or_else(|| format!("'{}' command requires at least 1 arguments", cmd))?;

        let mut state = self.state.lock();
        let tlv_frozen = state.tlv_frozen;
        let br = state.bridge_mut(bridge)?;

        let rules = |rest: &[&str]| -> Result<Vec<String>, String> {
            match rest.first() {
                Some(&"-") => Ok(stdin
                    .unwrap_or_default()
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect()),
                Some(rule) => Ok(vec![rule.to_string()]),
                None => Err(format!("'{}' command requires a flow", cmd)),
            }
        };

        match cmd {
            "add-flow" | "add-flows" => {
                for rule in rules(rest)? {
                    let key = match_clause(&rule);
                    match br.flows.iter().position(|f| match_clause(f) == key) {
                        Some(idx) => br.flows[idx] = rule,
                        None => br.flows.push(rule),
                    }
                }
                Ok(String::new())
            }
            "del-flows" => {
                if rest.is_empty() {
                    br.flows.clear();
                    return Ok(String::new());
                }
                for rule in rules(rest)? {
                    let key = match_clause(&rule);
                    br.flows.retain(|f| match_clause(f) != key);
                }
                Ok(String::new())
            }
            "replace-flows" => {
                let path = rest
                    .first()
                    .ok_or_else(|| "'replace-flows' command requires a file".to_string())?;
                let content = std::fs::read_to_string(path)
                    .map_err(|e| format!("{}: open failed ({})", path, e))?;
                br.flows = content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect();
                Ok(String::new())
            }
            "dump-flows" => Ok(br.flows.join("\n")),
            "dump-tlv-map" => Ok(render_tlv_dump(br)),
            "del-tlv-map" => {
                br.tlv_map.clear();
                Ok(String::new())
            }
            "add-tlv-map" => {
                let spec = rest
                    .first()
                    .ok_or_else(|| "'add-tlv-map' command requires a mapping".to_string())?;
                let entry = parse_tlv_spec(spec)?;
                if br.tlv_map.iter().any(|e| e.field == entry.field) {
                    return Err("OFPBAC_BAD_ARGUMENT: duplicate field".to_string());
                }
                if !tlv_frozen {
                    br.tlv_map.push(entry);
                }
                Ok(String::new())
            }
            "packet-out" => Ok(String::new()),
            other => Err(format!("unknown command '{}'", other)),
        }
    }
}

/// Splits leading `--option` tokens from a vsctl command segment,
/// returning the `--id=@name` binding if present.
fn split_options<'a>(seg: &'a [&'a str]) -> (Option<&'a str>, &'a [&'a str]) {
    let mut id = None;
    let mut idx = 0;
    while idx < seg.len() && seg[idx].starts_with("--") {
        if let Some(name) = seg[idx].strip_prefix("--id=") {
            id = Some(name);
        }
        idx += 1;
    }
    (id, &seg[idx..])
}

fn nth_arg<'a>(cmd: &str, args: &[&'a str], i: usize) -> Result<&'a str, String> {
    args.get(i)
        .copied()
        .ok_or_else(|| format!("'{}' command requires at least {} arguments", cmd, i + 1))
}

fn vsctl_command(
    state: &mut SwitchState,
    named: &HashMap<String, BTreeMap<String, String>>,
    cmd: &str,
    args: &[&str],
) -> Result<Option<String>, String> {
    let arg = |i: usize| nth_arg(cmd, args, i);

    match cmd {
        "br-exists" => {
            state.bridge(arg(0)?)?;
            Ok(None)
        }
        "add-br" => {
            state.add_bridge(arg(0)?)?;
            Ok(None)
        }
        "get-fail-mode" => Ok(Some(state.bridge(arg(0)?)?.fail_mode.clone().unwrap_or_default())),
        "set-fail-mode" => {
            state.bridge_mut(arg(0)?)?.fail_mode = Some(arg(1)?.to_string());
            Ok(None)
        }
        "add-port" => {
            let (bridge, port) = (arg(0)?, arg(1)?);
            state.bridge(bridge)?;
            if state.interfaces.contains_key(port) {
                return Err(format!("cannot create a port named {} because a port named {} already exists", port, port));
            }
            state.attach(bridge, port, "", None);
            Ok(None)
        }
        "del-port" => {
            let port = args.last().copied().ok_or_else(|| "'del-port' command requires a port".to_string())?;
            if state.interfaces.remove(port).is_none() {
                return Err(format!("no port named {}", port));
            }
            Ok(None)
        }
        "set" => {
            let (table, record) = (arg(0)?, arg(1)?);
            for token in &args[2..] {
                let (column, key, value) = split_assignment(token)?;
                set_column(state, named, table, record, column, key, value)?;
            }
            Ok(None)
        }
        "get" => {
            let (table, record) = (arg(0)?, arg(1)?);
            let mut lines = Vec::new();
            for column in &args[2..] {
                lines.push(get_column(state, table, record, column)?);
            }
            Ok(Some(lines.join("\n")))
        }
        "clear" => {
            let (table, record, column) = (arg(0)?, arg(1)?, arg(2)?);
            match (table.to_ascii_lowercase().as_str(), column) {
                ("bridge", "ipfix") => state.bridge_mut(record)?.ipfix = None,
                ("interface", "bfd") => state.interface_mut(record)?.bfd.clear(),
                _ => return Err(format!("cannot clear {} column {}", table, column)),
            }
            Ok(None)
        }
        // Rows were materialized before the transaction ran.
        "create" => Ok(Some("00000000-0000-0000-0000-000000000001".to_string())),
        other => Err(format!("unknown command '{}'; use --help for help", other)),
    }
}

fn set_column(
    state: &mut SwitchState,
    named: &HashMap<String, BTreeMap<String, String>>,
    table: &str,
    record: &str,
    column: &str,
    key: Option<&str>,
    value: String,
) -> Result<(), String> {
    match table.to_ascii_lowercase().as_str() {
        "bridge" => {
            let br = state.bridge_mut(record)?;
            match (column, key) {
                ("fail-mode" | "fail_mode", None) => br.fail_mode = Some(value),
                ("ipfix", None) => {
                    let row = named
                        .get(&value)
                        .ok_or_else(|| format!("row id \"{}\" is referenced but never created", value))?;
                    br.ipfix = Some(row.clone());
                }
                _ => return Err(format!("Bridge does not contain a column whose name matches \"{}\"", column)),
            }
        }
        "interface" => {
            let iface = state.interface_mut(record)?;
            match (column, key) {
                ("type", None) => iface.iface_type = value,
                ("options", Some(k)) => {
                    iface.options.insert(k.to_string(), value);
                }
                ("external_ids", Some(k)) => {
                    iface.external_ids.insert(k.to_string(), value);
                }
                ("bfd", Some(k)) => {
                    iface.bfd.insert(k.to_string(), value);
                }
                _ => return Err(format!("Interface does not contain a column whose name matches \"{}\"", column)),
            }
        }
        "open_vswitch" => match (column, key) {
            ("external_ids", Some(k)) => {
                state.external_ids.insert(k.to_string(), value);
            }
            _ => return Err(format!("Open_vSwitch column {} is read-only here", column)),
        },
        _ => return Err(format!("unknown table \"{}\"", table)),
    }
    Ok(())
}

fn get_column(state: &SwitchState, table: &str, record: &str, column: &str) -> Result<String, String> {
    let (column, key) = match column.split_once(':') {
        Some((c, k)) => (c, Some(k)),
        None => (column, None),
    };
    let lookup = |map: &BTreeMap<String, String>, key: &str| {
        map.get(key)
            .map(|v| quote_string(v))
            .ok_or_else(|| format!("no key \"{}\" in {} record \"{}\" column {}", key, table, record, column))
    };

    match table.to_ascii_lowercase().as_str() {
        "interface" => {
            let iface = state.interface(record)?;
            match (column, key) {
                ("name", None) => Ok(quote_string(record)),
                ("type", None) => Ok(iface.iface_type.clone()),
                ("ofport", None) => Ok(iface.ofport.to_string()),
                ("mac_in_use", None) => Ok(quote_string(&iface.mac)),
                ("options", Some(k)) => lookup(&iface.options, k),
                ("external_ids", Some(k)) => lookup(&iface.external_ids, k),
                ("bfd", Some(k)) => lookup(&iface.bfd, k),
                _ => Err(format!("Interface does not contain a column whose name matches \"{}\"", column)),
            }
        }
        "bridge" => {
            let br = state.bridge(record)?;
            match (column, key) {
                ("name", None) => Ok(quote_string(record)),
                ("fail_mode", None) => Ok(br.fail_mode.clone().unwrap_or_else(|| "[]".to_string())),
                _ => Err(format!("Bridge does not contain a column whose name matches \"{}\"", column)),
            }
        }
        "open_vswitch" => match (column, key) {
            ("external_ids", Some(k)) => lookup(&state.external_ids, k),
            _ => Err(format!("Open_vSwitch does not contain a column whose name matches \"{}\"", column)),
        },
        _ => Err(format!("unknown table \"{}\"", table)),
    }
}

#[async_trait]
impl OvsChannel for FakeSwitch {
    async fn run(
        &self,
        program: OvsProgram,
        args: &[String],
        stdin: Option<&str>,
    ) -> OvsResult<String> {
        if self.yield_per_call {
            tokio::task::yield_now().await;
        }
        let call = RecordedCall {
            program,
            args: args.to_vec(),
            stdin: stdin.map(str::to_string),
        };
        self.calls.lock().push(call.clone());

        let failed = |exit_code: i32, output: String| OvsError::CommandFailed {
            command: render_command(program.name(), args),
            exit_code,
            output,
        };

        if self.should_fail(&call) {
            return Err(failed(1, "injected failure".to_string()));
        }

        let result = match program {
            OvsProgram::Vsctl => self.vsctl(args),
            OvsProgram::Ofctl => self.ofctl(args, stdin),
        };
        result.map_err(|msg| failed(if call.command() == Some("br-exists") { 2 } else { 1 }, msg))
    }

    fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    async fn subscribe(
        &self,
        _table: &str,
        _columns: &[&str],
    ) -> OvsResult<mpsc::Receiver<TableUpdate>> {
        let (tx, rx) = mpsc::channel(64);
        self.subscribers.lock().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn vsctl(sw: &FakeSwitch, list: &[&str]) -> OvsResult<String> {
        sw.run(OvsProgram::Vsctl, &args(list), None).await
    }

    async fn ofctl(sw: &FakeSwitch, list: &[&str], stdin: Option<&str>) -> OvsResult<String> {
        sw.run(OvsProgram::Ofctl, &args(list), stdin).await
    }

    #[test]
    fn test_match_clause() {
        assert_eq!(match_clause("table=0,priority=100,actions=drop"), "table=0,priority=100");
        assert_eq!(match_clause(" table=1, priority=5 "), "table=1, priority=5");
    }

    #[test]
    fn test_recorded_call_command() {
        let call = RecordedCall {
            program: OvsProgram::Ofctl,
            args: args(&["add-flow", "-O", "OpenFlow12", "br-int", "-"]),
            stdin: None,
        };
        assert_eq!(call.command(), Some("add-flow"));
        assert!(call.is_batch());

        let call = RecordedCall {
            program: OvsProgram::Vsctl,
            args: args(&["--", "add-port", "br-int", "p0"]),
            stdin: None,
        };
        assert_eq!(call.command(), Some("add-port"));
    }

    #[tokio::test]
    async fn test_vsctl_transaction_is_atomic() {
        let sw = FakeSwitch::new();
        sw.add_bridge("br-int");

        let result = vsctl(
            &sw,
            &["--", "add-port", "br-int", "a", "--", "add-port", "br-missing", "b"],
        )
        .await;
        assert!(result.is_err());
        assert!(!sw.has_interface("a"));
    }

    #[tokio::test]
    async fn test_vsctl_get_and_set() {
        let sw = FakeSwitch::new();
        sw.add_bridge("br-int");
        vsctl(&sw, &["add-port", "br-int", "p0", "--", "set", "Interface", "p0", "type=geneve", "external_ids:chassis-id=c1"])
            .await
            .unwrap();

        assert_eq!(sw.interface_type("p0").as_deref(), Some("geneve"));
        let out = vsctl(&sw, &["get", "Interface", "p0", "external_ids:chassis-id"]).await.unwrap();
        assert_eq!(out, "\"c1\"");
        assert!(vsctl(&sw, &["get", "Interface", "p0", "options:peer"]).await.is_err());
    }

    #[tokio::test]
    async fn test_br_exists_exit_code() {
        let sw = FakeSwitch::new();
        match vsctl(&sw, &["br-exists", "br-int"]).await {
            Err(OvsError::CommandFailed { exit_code, .. }) => assert_eq!(exit_code, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ofctl_flows() {
        let sw = FakeSwitch::new();
        sw.add_bridge("br-int");

        ofctl(&sw, &["add-flow", "-O", "OpenFlow12", "br-int", "-"], Some("table=0,priority=1,actions=drop\ntable=0,priority=2,actions=drop"))
            .await
            .unwrap();
        ofctl(&sw, &["del-flows", "-O", "OpenFlow12", "br-int", "table=0,priority=1,actions=drop", "--strict"], None)
            .await
            .unwrap();
        assert_eq!(sw.flows("br-int"), vec!["table=0,priority=2,actions=drop".to_string()]);

        let dump = ofctl(&sw, &["dump-flows", "br-int"], None).await.unwrap();
        assert_eq!(dump, "table=0,priority=2,actions=drop");
    }

    #[tokio::test]
    async fn test_tlv_map() {
        let sw = FakeSwitch::new();
        sw.add_bridge("br-int");
        ofctl(&sw, &["add-tlv-map", "br-int", "{class=0xffee,type=0,len=8}->tun_metadata0"], None)
            .await
            .unwrap();
        assert_eq!(sw.tlv_mappings("br-int"), vec!["{class=0xffee,type=0,len=8}->tun_metadata0".to_string()]);

        let dump = ofctl(&sw, &["dump-tlv-map", "br-int"], None).await.unwrap();
        assert!(dump.contains(" 0xffee\t0x0\t8\ttun_metadata0"));
    }

    #[tokio::test]
    async fn test_fail_times() {
        let sw = FakeSwitch::new();
        sw.add_bridge("br-int");
        sw.fail_times(1, |c| c.command() == Some("br-exists"));

        assert!(vsctl(&sw, &["br-exists", "br-int"]).await.is_err());
        assert!(vsctl(&sw, &["br-exists", "br-int"]).await.is_ok());
        assert_eq!(sw.count_calls("br-exists"), 2);
    }

    #[tokio::test]
    async fn test_clear_failures() {
        let sw = FakeSwitch::new();
        sw.add_bridge("br-int");
        sw.fail_when(|c| c.command() == Some("br-exists"));
        assert!(vsctl(&sw, &["br-exists", "br-int"]).await.is_err());

        sw.clear_failures();
        assert!(vsctl(&sw, &["br-exists", "br-int"]).await.is_ok());
    }

    #[tokio::test]
    async fn test_retry_attempts_override() {
        let sw = FakeSwitch::new().with_retry_attempts(2);
        sw.add_bridge("br-int");
        sw.fail_times(2, |c| c.command() == Some("br-exists"));

        let result = sw
            .run_with_retry(OvsProgram::Vsctl, &args(&["br-exists", "br-int"]), None)
            .await;
        assert!(result.is_err());
        assert_eq!(sw.count_calls("br-exists"), 2);
    }

    #[test]
    #[should_panic(expected = "already exists")]
    fn test_add_bridge_twice_panics() {
        let sw = FakeSwitch::new();
        sw.add_bridge("br-int");
        sw.add_bridge("br-int");
    }

    #[tokio::test]
    async fn test_push_update_reaches_subscribers() {
        let sw = FakeSwitch::new();
        let mut rx = sw.subscribe("Interface", &["name"]).await.unwrap();
        let update = TableUpdate {
            table: "Interface".to_string(),
            rows: Vec::new(),
        };
        assert_eq!(sw.push_update(update.clone()), 1);
        assert_eq!(rx.recv().await, Some(update));
    }
}
