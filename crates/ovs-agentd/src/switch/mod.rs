//! Local switch configuration: the database seam, lookups, operation
//! builders and the binding transactions built from them.

pub mod build;
pub mod query;
pub mod transaction;

use async_trait::async_trait;
use ovs_agent_common::{AgentError, AgentResult};
use ovsdb_client::{Operation, OperationResult, OvsDbClient, Row};
use tracing::warn;

use crate::tables::{OVS_BRIDGE_TABLE, OVS_INTERFACE_TABLE, OVS_PORT_TABLE};
use crate::types::{Bridge, Interface, Port};

pub use transaction::{ensure_binding, remove_binding, EnsureOutcome, RemoveOutcome};

/// Access to the local switch configuration database.
///
/// Listing reads the client's replica of the monitored tables; only
/// `transact` goes to the server.
#[async_trait]
pub trait SwitchDb: Send + Sync {
    async fn list_bridges(&self) -> AgentResult<Vec<Bridge>>;

    async fn list_ports(&self) -> AgentResult<Vec<Port>>;

    async fn list_interfaces(&self) -> AgentResult<Vec<Interface>>;

    /// Submits `ops` atomically and returns the per-operation results.
    async fn transact(&self, ops: Vec<Operation>) -> AgentResult<Vec<OperationResult>>;
}

fn decoded_rows<T>(
    client: &OvsDbClient,
    table: &str,
    decode: fn(&str, &Row) -> AgentResult<T>,
) -> AgentResult<Vec<T>> {
    if !client.is_connected() {
        return Err(AgentError::protocol(
            format!("list {table}"),
            "switch database connection lost",
        ));
    }
    Ok(client
        .rows(table)
        .iter()
        .filter_map(|(uuid, row)| match decode(uuid, row) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(%table, %uuid, error = %e, "Skipping undecodable row");
                None
            }
        })
        .collect())
}

#[async_trait]
impl SwitchDb for OvsDbClient {
    async fn list_bridges(&self) -> AgentResult<Vec<Bridge>> {
        decoded_rows(self, OVS_BRIDGE_TABLE, Bridge::from_row)
    }

    async fn list_ports(&self) -> AgentResult<Vec<Port>> {
        decoded_rows(self, OVS_PORT_TABLE, Port::from_row)
    }

    async fn list_interfaces(&self) -> AgentResult<Vec<Interface>> {
        decoded_rows(self, OVS_INTERFACE_TABLE, Interface::from_row)
    }

    async fn transact(&self, ops: Vec<Operation>) -> AgentResult<Vec<OperationResult>> {
        OvsDbClient::transact(self, &ops)
            .await
            .map_err(|e| AgentError::protocol("transact", e))
    }
}
