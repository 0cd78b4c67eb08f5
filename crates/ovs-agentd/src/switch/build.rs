//! Operation builders for attaching and detaching a bound port.
//!
//! Pure functions; nothing here touches the database.

use ovsdb_client::{value, Condition, Mutation, Mutator, Operation};
use serde_json::{Map, Value};

use crate::tables::{
    columns, keys, OVS_BRIDGE_TABLE, OVS_INTERFACE_TABLE, OVS_PORT_TABLE, SYSTEM_IFACE_TYPE,
};
use crate::types::{Bridge, Port};

/// Named uuid of the interface inserted by [`attach_ops`]
pub const NEW_IFACE_REF: &str = "new_iface";

/// Named uuid of the port inserted by [`attach_ops`]
pub const NEW_PORT_REF: &str = "new_port";

/// Interface `device` of type system, tagged with `iface-id`.
pub fn insert_interface(device: &str, logical_port: &str) -> Operation {
    let mut row = Map::new();
    row.insert(columns::NAME.to_string(), Value::from(device));
    row.insert(columns::TYPE.to_string(), Value::from(SYSTEM_IFACE_TYPE));
    row.insert(
        columns::EXTERNAL_IDS.to_string(),
        value::string_map([(keys::IFACE_ID, logical_port)]),
    );
    Operation::insert(OVS_INTERFACE_TABLE, row).with_uuid_name(NEW_IFACE_REF)
}

/// Port named after the logical port, holding the interface inserted in the
/// same transaction.
pub fn insert_port(logical_port: &str) -> Operation {
    let mut row = Map::new();
    row.insert(columns::NAME.to_string(), Value::from(logical_port));
    row.insert(
        columns::INTERFACES.to_string(),
        value::set([value::named_uuid(NEW_IFACE_REF)]),
    );
    Operation::insert(OVS_PORT_TABLE, row).with_uuid_name(NEW_PORT_REF)
}

/// Adds `port_ref` (a `uuid` or `named-uuid` value) to the bridge's ports.
pub fn add_port_to_bridge(bridge: &Bridge, port_ref: Value) -> Operation {
    Operation::mutate(
        OVS_BRIDGE_TABLE,
        vec![Condition::uuid_eq(&bridge.uuid)],
        vec![Mutation::new(
            columns::PORTS,
            Mutator::Insert,
            value::set([port_ref]),
        )],
    )
}

/// Removes `port_uuid` from the bridge's ports.
pub fn remove_port_from_bridge(bridge: &Bridge, port_uuid: &str) -> Operation {
    Operation::mutate(
        OVS_BRIDGE_TABLE,
        vec![Condition::uuid_eq(&bridge.uuid)],
        vec![Mutation::new(
            columns::PORTS,
            Mutator::Delete,
            value::set([value::uuid(port_uuid)]),
        )],
    )
}

/// Interface, Port and bridge membership for a new binding.
pub fn attach_ops(bridge: &Bridge, device: &str, logical_port: &str) -> Vec<Operation> {
    vec![
        insert_interface(device, logical_port),
        insert_port(logical_port),
        add_port_to_bridge(bridge, value::named_uuid(NEW_PORT_REF)),
    ]
}

/// Re-attaches a port that exists but is not on the bridge.
pub fn reattach_ops(bridge: &Bridge, port: &Port) -> Vec<Operation> {
    vec![add_port_to_bridge(bridge, value::uuid(&port.uuid))]
}

/// Deletes `port` and its interfaces, first taking it off `bridge` when it
/// is attached.
pub fn detach_ops(bridge: Option<&Bridge>, port: &Port) -> Vec<Operation> {
    let mut ops: Vec<Operation> = bridge
        .map(|br| remove_port_from_bridge(br, &port.uuid))
        .into_iter()
        .collect();
    ops.push(Operation::delete(OVS_PORT_TABLE, vec![Condition::uuid_eq(&port.uuid)]));
    ops.extend(port.interfaces.iter().map(|iface| {
        Operation::delete(OVS_INTERFACE_TABLE, vec![Condition::uuid_eq(iface)])
    }));
    ops
}
