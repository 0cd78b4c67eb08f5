//! Table and column name constants for ovs-agentd

/// OVN Southbound database name
pub const SB_DB_NAME: &str = "OVN_Southbound";

/// Southbound port binding table name
pub const SB_PORT_BINDING_TABLE: &str = "Port_Binding";

/// Southbound chassis table name
pub const SB_CHASSIS_TABLE: &str = "Chassis";

/// Local switch database name
pub const OVS_DB_NAME: &str = "Open_vSwitch";

/// Local switch bridge table name
pub const OVS_BRIDGE_TABLE: &str = "Bridge";

/// Local switch port table name
pub const OVS_PORT_TABLE: &str = "Port";

/// Local switch interface table name
pub const OVS_INTERFACE_TABLE: &str = "Interface";

/// Port binding type of logical router ports
pub const PATCH_PORT_TYPE: &str = "patch";

/// Interface type for kernel devices attached by the agent
pub const SYSTEM_IFACE_TYPE: &str = "system";

/// Column names
pub mod columns {
    pub const UUID: &str = "_uuid";
    pub const NAME: &str = "name";

    // Port_Binding
    pub const LOGICAL_PORT: &str = "logical_port";
    pub const TYPE: &str = "type";
    pub const DATAPATH: &str = "datapath";
    pub const TUNNEL_KEY: &str = "tunnel_key";
    pub const CHASSIS: &str = "chassis";
    pub const UP: &str = "up";
    pub const OPTIONS: &str = "options";

    // Bridge / Port / Interface
    pub const PORTS: &str = "ports";
    pub const INTERFACES: &str = "interfaces";
    pub const EXTERNAL_IDS: &str = "external_ids";
}

/// Map keys
pub mod keys {
    /// `Port_Binding.options` key naming the chassis that should claim the port
    pub const REQUESTED_CHASSIS: &str = "requested-chassis";

    /// `Interface.external_ids` key linking the interface to its logical port
    pub const IFACE_ID: &str = "iface-id";
}
