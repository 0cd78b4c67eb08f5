//! In-memory doubles for the switch database and kernel devices.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ovs_agent_common::{AgentError, AgentResult};
use ovsdb_client::{value, Condition, Mutator, Operation, OperationResult, Row};
use serde_json::{json, Value};

use crate::netdev::DeviceManager;
use crate::switch::SwitchDb;
use crate::tables::{columns, keys, OVS_BRIDGE_TABLE, OVS_INTERFACE_TABLE, OVS_PORT_TABLE};
use crate::types::{Bridge, Interface, Port};

type Tables = BTreeMap<String, BTreeMap<String, Row>>;

#[derive(Default)]
struct SwitchState {
    tables: Tables,
    next_uuid: u64,
    transactions: usize,
    fail_next: Option<(usize, String, String)>,
    disconnected: bool,
    delay: Option<Duration>,
}

/// Switch database that applies transactions to in-memory tables.
///
/// Supports the subset of OVSDB the agent uses: inserts with named uuids,
/// set mutations, deletes and `==` conditions. A transaction is applied
/// atomically: any failing operation leaves the tables untouched.
#[derive(Default)]
pub struct FakeSwitchDb {
    state: Mutex<SwitchState>,
}

impl FakeSwitchDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bridge(name: &str) -> Self {
        let db = Self::new();
        db.add_bridge(name);
        db
    }

    pub fn add_bridge(&self, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let uuid = state.alloc_uuid(OVS_BRIDGE_TABLE);
        state.row_insert(
            OVS_BRIDGE_TABLE,
            &uuid,
            json!({"name": name, "ports": ["set", []]}),
        );
        uuid
    }

    /// Adds Interface `device` and Port `logical_port` and puts the port on
    /// `bridge`.
    pub fn seed_binding(&self, bridge: &str, device: &str, logical_port: &str) {
        self.seed_port(Some(bridge), logical_port, device, logical_port);
    }

    /// Adds Interface `device` and Port `logical_port` on no bridge.
    /// Returns the port uuid.
    pub fn seed_detached_binding(&self, device: &str, logical_port: &str) -> String {
        self.seed_port(None, logical_port, device, logical_port)
    }

    /// Adds Port `port` holding Interface `device` tagged with `iface_id`,
    /// on `bridge` when given. Returns the port uuid.
    pub fn seed_port(
        &self,
        bridge: Option<&str>,
        port: &str,
        device: &str,
        iface_id: &str,
    ) -> String {
        let mut state = self.state.lock().unwrap();
        let iface_uuid = state.alloc_uuid(OVS_INTERFACE_TABLE);
        state.row_insert(
            OVS_INTERFACE_TABLE,
            &iface_uuid,
            json!({
                "name": device,
                "type": "system",
                "external_ids": value::string_map([(keys::IFACE_ID, iface_id)])
            }),
        );
        let port_uuid = state.alloc_uuid(OVS_PORT_TABLE);
        state.row_insert(
            OVS_PORT_TABLE,
            &port_uuid,
            json!({"name": port, "interfaces": value::set([value::uuid(&iface_uuid)])}),
        );

        if let Some(bridge) = bridge {
            let bridge_row = state
                .tables
                .get_mut(OVS_BRIDGE_TABLE)
                .and_then(|rows| {
                    rows.values_mut()
                        .find(|r| r.get(columns::NAME) == Some(&json!(bridge)))
                })
                .expect("bridge not seeded");
            let mut ports = bridge_row
                .get(columns::PORTS)
                .map(value::as_uuid_set)
                .unwrap_or_default();
            ports.push(port_uuid.clone());
            bridge_row.insert(columns::PORTS.to_string(), uuid_set(&ports));
        }
        port_uuid
    }

    /// Names of the ports on `bridge`, sorted.
    pub fn bridge_port_names(&self, bridge: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let Some(bridge) = state.decoded(OVS_BRIDGE_TABLE, Bridge::from_row)
            .into_iter()
            .find(|b| b.name == bridge)
        else {
            return Vec::new();
        };
        let mut names: Vec<String> = state
            .decoded(OVS_PORT_TABLE, Port::from_row)
            .into_iter()
            .filter(|p| bridge.ports.contains(&p.uuid))
            .map(|p| p.name)
            .collect();
        names.sort();
        names
    }

    /// Number of transactions submitted, including failed ones.
    pub fn transaction_count(&self) -> usize {
        self.state.lock().unwrap().transactions
    }

    /// Makes operation `index` of the next transaction fail.
    pub fn fail_next_transaction(&self, index: usize, error: &str, details: &str) {
        self.state.lock().unwrap().fail_next =
            Some((index, error.to_string(), details.to_string()));
    }

    /// Makes every call fail as if the connection were lost.
    pub fn disconnect(&self) {
        self.state.lock().unwrap().disconnected = true;
    }

    /// Delays every transaction by `delay`.
    pub fn set_transact_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    fn list<T>(
        &self,
        table: &str,
        decode: fn(&str, &Row) -> AgentResult<T>,
    ) -> AgentResult<Vec<T>> {
        let state = self.state.lock().unwrap();
        if state.disconnected {
            return Err(AgentError::protocol(format!("list {table}"), "disconnected"));
        }
        Ok(state.decoded(table, decode))
    }
}

impl SwitchState {
    fn alloc_uuid(&mut self, table: &str) -> String {
        self.next_uuid += 1;
        format!("{}-{:04}", table.to_lowercase(), self.next_uuid)
    }

    fn row_insert(&mut self, table: &str, uuid: &str, row: Value) {
        if let Value::Object(row) = row {
            self.tables
                .entry(table.to_string())
                .or_default()
                .insert(uuid.to_string(), row);
        }
    }

    fn decoded<T>(&self, table: &str, decode: fn(&str, &Row) -> AgentResult<T>) -> Vec<T> {
        self.tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter_map(|(uuid, row)| decode(uuid, row).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn apply(&mut self, ops: &[Operation]) -> Vec<OperationResult> {
        self.transactions += 1;
        let fail = self.fail_next.take();

        let mut scratch = SwitchState {
            tables: self.tables.clone(),
            next_uuid: self.next_uuid,
            ..Default::default()
        };
        let mut named = HashMap::new();
        let mut results = Vec::with_capacity(ops.len());

        for (index, op) in ops.iter().enumerate() {
            let outcome = match &fail {
                Some((at, error, details)) if *at == index => Err((error.clone(), details.clone())),
                _ => scratch.apply_op(op, &mut named),
            };
            match outcome {
                Ok(result) => results.push(result),
                Err((error, details)) => {
                    results.push(OperationResult {
                        error: Some(error),
                        details: Some(details),
                        ..Default::default()
                    });
                    return results;
                }
            }
        }

        self.tables = scratch.tables;
        self.next_uuid = scratch.next_uuid;
        results
    }

    fn apply_op(
        &mut self,
        op: &Operation,
        named: &mut HashMap<String, String>,
    ) -> Result<OperationResult, (String, String)> {
        match op {
            Operation::Insert {
                table,
                row,
                uuid_name,
            } => {
                let uuid = self.alloc_uuid(table);
                let row = resolve_named(&Value::Object(row.clone()), named);
                self.row_insert(table, &uuid, row);
                if let Some(name) = uuid_name {
                    named.insert(name.clone(), uuid.clone());
                }
                Ok(OperationResult {
                    uuid: Some(value::uuid(&uuid)),
                    ..Default::default()
                })
            }
            Operation::Mutate {
                table,
                conditions,
                mutations,
            } => {
                let matching = self.matching(table, conditions, named)?;
                let rows = self.tables.entry(table.clone()).or_default();
                for uuid in &matching {
                    let Some(row) = rows.get_mut(uuid) else {
                        continue;
                    };
                    for mutation in mutations {
                        let mut current = row
                            .get(mutation.column())
                            .map(value::as_uuid_set)
                            .unwrap_or_default();
                        let operand =
                            value::as_uuid_set(&resolve_named(mutation.value(), named));
                        match mutation.mutator() {
                            Mutator::Insert => {
                                for u in operand {
                                    if !current.contains(&u) {
                                        current.push(u);
                                    }
                                }
                            }
                            Mutator::Delete => current.retain(|u| !operand.contains(u)),
                        }
                        row.insert(mutation.column().to_string(), uuid_set(&current));
                    }
                }
                Ok(OperationResult {
                    count: Some(matching.len() as u64),
                    ..Default::default()
                })
            }
            Operation::Delete { table, conditions } => {
                let matching = self.matching(table, conditions, named)?;
                if let Some(rows) = self.tables.get_mut(table) {
                    for uuid in &matching {
                        rows.remove(uuid);
                    }
                }
                Ok(OperationResult {
                    count: Some(matching.len() as u64),
                    ..Default::default()
                })
            }
            Operation::Select {
                table, conditions, ..
            } => {
                let matching = self.matching(table, conditions, named)?;
                let rows = matching
                    .iter()
                    .filter_map(|uuid| self.tables.get(table).and_then(|t| t.get(uuid)).cloned())
                    .collect();
                Ok(OperationResult {
                    rows: Some(rows),
                    ..Default::default()
                })
            }
        }
    }

    fn matching(
        &self,
        table: &str,
        conditions: &[Condition],
        named: &HashMap<String, String>,
    ) -> Result<Vec<String>, (String, String)> {
        if conditions.iter().any(|c| c.function() != "==") {
            return Err((
                "not supported".to_string(),
                "only == conditions are supported".to_string(),
            ));
        }
        let Some(rows) = self.tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|(uuid, row)| {
                conditions.iter().all(|c| {
                    let expected = resolve_named(c.value(), named);
                    if c.column() == columns::UUID {
                        value::as_uuid(&expected) == Some(uuid.as_str())
                    } else {
                        row.get(c.column()) == Some(&expected)
                    }
                })
            })
            .map(|(uuid, _)| uuid.clone())
            .collect())
    }
}

fn uuid_set(uuids: &[String]) -> Value {
    value::set(uuids.iter().map(|u| value::uuid(u)))
}

/// Replaces `["named-uuid", n]` references with the uuids assigned earlier
/// in the transaction.
fn resolve_named(v: &Value, named: &HashMap<String, String>) -> Value {
    match v {
        Value::Array(items) => match items.as_slice() {
            [Value::String(tag), Value::String(name)] if tag == "named-uuid" => named
                .get(name)
                .map(|uuid| value::uuid(uuid))
                .unwrap_or_else(|| v.clone()),
            _ => Value::Array(items.iter().map(|i| resolve_named(i, named)).collect()),
        },
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_named(v, named)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[async_trait]
impl SwitchDb for FakeSwitchDb {
    async fn list_bridges(&self) -> AgentResult<Vec<Bridge>> {
        self.list(OVS_BRIDGE_TABLE, Bridge::from_row)
    }

    async fn list_ports(&self) -> AgentResult<Vec<Port>> {
        self.list(OVS_PORT_TABLE, Port::from_row)
    }

    async fn list_interfaces(&self) -> AgentResult<Vec<Interface>> {
        self.list(OVS_INTERFACE_TABLE, Interface::from_row)
    }

    async fn transact(&self, ops: Vec<Operation>) -> AgentResult<Vec<OperationResult>> {
        let delay = {
            let state = self.state.lock().unwrap();
            if state.disconnected {
                return Err(AgentError::protocol("transact", "disconnected"));
            }
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.state.lock().unwrap().apply(&ops))
    }
}

/// A link held by [`FakeDevices`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeLink {
    pub tap: bool,
    pub mtu: u32,
    pub vnet_hdr: bool,
    pub up: bool,
}

/// Kernel device table with the same semantics as the iproute2 manager.
#[derive(Default)]
pub struct FakeDevices {
    links: Mutex<BTreeMap<String, FakeLink>>,
    calls: Mutex<Vec<String>>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device of some other kind than tap.
    pub fn add_non_tap(&self, name: &str) {
        self.links.lock().unwrap().insert(
            name.to_string(),
            FakeLink {
                tap: false,
                mtu: 1500,
                vnet_hdr: false,
                up: true,
            },
        );
    }

    pub fn link(&self, name: &str) -> Option<FakeLink> {
        self.links.lock().unwrap().get(name).cloned()
    }

    pub fn link_names(&self) -> Vec<String> {
        self.links.lock().unwrap().keys().cloned().collect()
    }

    /// Calls made so far, e.g. `"create_tap lp1"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str, name: &str) {
        self.calls.lock().unwrap().push(format!("{call} {name}"));
    }
}

#[async_trait]
impl DeviceManager for FakeDevices {
    async fn create_tap(&self, name: &str, mtu: u32, vnet_hdr: bool) -> AgentResult<String> {
        self.record("create_tap", name);
        let mut links = self.links.lock().unwrap();
        match links.get_mut(name) {
            Some(link) if link.tap => link.mtu = mtu,
            Some(_) => return Err(AgentError::device(name, "exists but is not a tap")),
            None => {
                links.insert(
                    name.to_string(),
                    FakeLink {
                        tap: true,
                        mtu,
                        vnet_hdr,
                        up: false,
                    },
                );
            }
        }
        Ok(name.to_string())
    }

    async fn delete_link(&self, name: &str) -> AgentResult<()> {
        self.record("delete_link", name);
        self.links.lock().unwrap().remove(name);
        Ok(())
    }

    async fn set_link_up(&self, name: &str) -> AgentResult<String> {
        self.record("set_link_up", name);
        match self.links.lock().unwrap().get_mut(name) {
            Some(link) if link.tap => {
                link.up = true;
                Ok(name.to_string())
            }
            Some(_) => Err(AgentError::device(name, "exists but is not a tap")),
            None => Err(AgentError::not_found("link", name)),
        }
    }

    async fn set_link_down(&self, name: &str) -> AgentResult<()> {
        self.record("set_link_down", name);
        match self.links.lock().unwrap().get_mut(name) {
            Some(link) => {
                link.up = false;
                Ok(())
            }
            None => Err(AgentError::not_found("link", name)),
        }
    }
}
