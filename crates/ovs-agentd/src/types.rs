//! Typed views of Southbound and local switch rows

use std::collections::BTreeMap;
use std::fmt;

use ovs_agent_common::{AgentError, AgentResult};
use ovsdb_client::{value, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tables::{columns, keys, PATCH_PORT_TYPE};

fn string_column<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}

fn required_name(row: &Row, table: &str, uuid: &str) -> AgentResult<String> {
    match string_column(row, columns::NAME) {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(AgentError::validation(format!(
            "{table} row {uuid} has no name"
        ))),
    }
}

/// A Southbound `Port_Binding` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub uuid: String,
    pub logical_port: String,
    /// Empty for VIF ports, "patch" for router ports.
    pub port_type: String,
    pub datapath: Option<String>,
    pub tunnel_key: i64,
    /// Chassis row that has claimed the port, if any.
    pub chassis: Option<String>,
    pub up: Option<bool>,
    pub options: BTreeMap<String, String>,
}

impl PortBinding {
    /// Decodes a monitored row. Fails when `logical_port` is missing or
    /// empty.
    pub fn from_row(uuid: &str, row: &Row) -> AgentResult<Self> {
        let logical_port = match string_column(row, columns::LOGICAL_PORT) {
            Some(lp) if !lp.is_empty() => lp.to_string(),
            _ => {
                return Err(AgentError::validation(format!(
                    "Port_Binding {uuid} has an empty logical_port"
                )))
            }
        };

        Ok(Self {
            uuid: uuid.to_string(),
            logical_port,
            port_type: string_column(row, columns::TYPE)
                .unwrap_or_default()
                .to_string(),
            datapath: row.get(columns::DATAPATH).and_then(value::as_optional_uuid),
            tunnel_key: row
                .get(columns::TUNNEL_KEY)
                .and_then(Value::as_i64)
                .unwrap_or_default(),
            chassis: row.get(columns::CHASSIS).and_then(value::as_optional_uuid),
            up: row.get(columns::UP).and_then(value::as_optional_bool),
            options: row
                .get(columns::OPTIONS)
                .map(value::as_string_map)
                .unwrap_or_default(),
        })
    }

    pub fn is_patch(&self) -> bool {
        self.port_type == PATCH_PORT_TYPE
    }

    /// `options:requested-chassis`, or `None` when absent or empty.
    pub fn requested_chassis(&self) -> Option<&str> {
        self.options
            .get(keys::REQUESTED_CHASSIS)
            .map(String::as_str)
            .filter(|c| !c.is_empty())
    }
}

/// A Southbound `Chassis` record, used to name the claimant of a binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chassis {
    pub uuid: String,
    pub name: String,
}

impl Chassis {
    pub fn from_row(uuid: &str, row: &Row) -> AgentResult<Self> {
        Ok(Self {
            uuid: uuid.to_string(),
            name: required_name(row, "Chassis", uuid)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bridge {
    pub uuid: String,
    pub name: String,
    pub ports: Vec<String>,
}

impl Bridge {
    pub fn from_row(uuid: &str, row: &Row) -> AgentResult<Self> {
        Ok(Self {
            uuid: uuid.to_string(),
            name: required_name(row, "Bridge", uuid)?,
            ports: row
                .get(columns::PORTS)
                .map(value::as_uuid_set)
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub uuid: String,
    pub name: String,
    pub interfaces: Vec<String>,
}

impl Port {
    pub fn from_row(uuid: &str, row: &Row) -> AgentResult<Self> {
        Ok(Self {
            uuid: uuid.to_string(),
            name: required_name(row, "Port", uuid)?,
            interfaces: row
                .get(columns::INTERFACES)
                .map(value::as_uuid_set)
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub uuid: String,
    pub name: String,
    pub iface_type: String,
    pub external_ids: BTreeMap<String, String>,
}

impl Interface {
    pub fn from_row(uuid: &str, row: &Row) -> AgentResult<Self> {
        Ok(Self {
            uuid: uuid.to_string(),
            name: required_name(row, "Interface", uuid)?,
            iface_type: string_column(row, columns::TYPE)
                .unwrap_or_default()
                .to_string(),
            external_ids: row
                .get(columns::EXTERNAL_IDS)
                .map(value::as_string_map)
                .unwrap_or_default(),
        })
    }

    /// Logical port this interface is bound to.
    pub fn iface_id(&self) -> Option<&str> {
        self.external_ids.get(keys::IFACE_ID).map(String::as_str)
    }
}

/// How `ensure_binding` treats local state that already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Any existing Port or Interface is a conflict.
    #[default]
    Strict,
    /// Matching state is accepted, and a matching detached port is
    /// re-attached.
    Adopt,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::Strict => write!(f, "strict"),
            ConflictPolicy::Adopt => write!(f, "adopt"),
        }
    }
}
