//! Name lookups over the switch database's cached view.

use ovs_agent_common::AgentResult;

use super::SwitchDb;
use crate::types::{Bridge, Interface, Port};

/// Bridge named `name`.
pub async fn find_bridge(db: &dyn SwitchDb, name: &str) -> AgentResult<Option<Bridge>> {
    Ok(db.list_bridges().await?.into_iter().find(|b| b.name == name))
}

/// Port named `name`.
pub async fn find_port(db: &dyn SwitchDb, name: &str) -> AgentResult<Option<Port>> {
    Ok(db.list_ports().await?.into_iter().find(|p| p.name == name))
}

/// Interface named `name`, which is also the kernel device name.
pub async fn find_interface(db: &dyn SwitchDb, name: &str) -> AgentResult<Option<Interface>> {
    Ok(db
        .list_interfaces()
        .await?
        .into_iter()
        .find(|i| i.name == name))
}

/// Port whose interface set contains `iface_uuid`.
pub async fn find_port_with_interface(
    db: &dyn SwitchDb,
    iface_uuid: &str,
) -> AgentResult<Option<Port>> {
    Ok(db
        .list_ports()
        .await?
        .into_iter()
        .find(|p| p.interfaces.iter().any(|i| i == iface_uuid)))
}

/// Bridge whose port set contains `port_uuid`, if any.
pub async fn find_bridge_with_port(
    db: &dyn SwitchDb,
    port_uuid: &str,
) -> AgentResult<Option<Bridge>> {
    Ok(db
        .list_bridges()
        .await?
        .into_iter()
        .find(|b| bridge_has_port(b, port_uuid)))
}

/// Interface rows referenced by `port`.
pub async fn port_interfaces(db: &dyn SwitchDb, port: &Port) -> AgentResult<Vec<Interface>> {
    let mut ifaces = db.list_interfaces().await?;
    ifaces.retain(|i| port.interfaces.contains(&i.uuid));
    Ok(ifaces)
}

/// Whether `port_uuid` is in the bridge's port set.
pub fn bridge_has_port(bridge: &Bridge, port_uuid: &str) -> bool {
    bridge.ports.iter().any(|p| p == port_uuid)
}
