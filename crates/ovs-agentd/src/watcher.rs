//! Binding Watcher: decides which Southbound changes concern this chassis.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ovsdb_client::{EventKind, OvsDbClient, Row, RowEvent};
use tracing::{debug, error, warn};

use crate::orchestrator::Orchestrator;
use crate::tables::{columns, SB_CHASSIS_TABLE, SB_PORT_BINDING_TABLE};
use crate::types::{Chassis, PortBinding};

/// Resolves Chassis row uuids to chassis names.
pub trait ChassisDirectory: Send + Sync {
    fn chassis_name(&self, uuid: &str) -> Option<String>;
}

impl ChassisDirectory for OvsDbClient {
    fn chassis_name(&self, uuid: &str) -> Option<String> {
        let row = self.row(SB_CHASSIS_TABLE, uuid)?;
        Chassis::from_row(uuid, &row).ok().map(|c| c.name)
    }
}

/// uuid to name
impl ChassisDirectory for HashMap<String, String> {
    fn chassis_name(&self, uuid: &str) -> Option<String> {
        self.get(uuid).cloned()
    }
}

/// Why a change was not acted on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    OtherTable,
    InvalidRecord(String),
    PatchPort,
    NoRequestedChassis,
    RequestedForOther(String),
    ClaimedByOther(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::OtherTable => write!(f, "not a port binding"),
            SkipReason::InvalidRecord(msg) => write!(f, "invalid record: {msg}"),
            SkipReason::PatchPort => write!(f, "patch port"),
            SkipReason::NoRequestedChassis => write!(f, "no requested-chassis"),
            SkipReason::RequestedForOther(c) => write!(f, "requested for chassis {c}"),
            SkipReason::ClaimedByOther(c) => write!(f, "claimed by chassis {c}"),
        }
    }
}

/// What the watcher made of one change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Bind(String),
    Unbind(String),
    Skip(SkipReason),
}

/// Result of handling one change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    Bound(String),
    Unbound(String),
    Skipped(SkipReason),
    Failed(String),
}

/// Turns `Port_Binding` changes into orchestrator calls for this chassis.
pub struct BindingWatcher {
    chassis: String,
    directory: Arc<dyn ChassisDirectory>,
    orchestrator: Orchestrator,
}

impl BindingWatcher {
    pub fn new(orchestrator: Orchestrator, directory: Arc<dyn ChassisDirectory>) -> Self {
        Self {
            chassis: orchestrator.context().config.agent.chassis.clone(),
            directory,
            orchestrator,
        }
    }

    fn decode(table: &str, uuid: &str, row: &Row) -> Result<PortBinding, SkipReason> {
        if table != SB_PORT_BINDING_TABLE {
            return Err(SkipReason::OtherTable);
        }
        let binding = PortBinding::from_row(uuid, row)
            .map_err(|e| SkipReason::InvalidRecord(e.to_string()))?;
        if binding.is_patch() {
            return Err(SkipReason::PatchPort);
        }
        Ok(binding)
    }

    /// Filter for added or modified records.
    pub fn filter_add(&self, table: &str, uuid: &str, row: &Row) -> Decision {
        let binding = match Self::decode(table, uuid, row) {
            Ok(b) => b,
            Err(reason) => return Decision::Skip(reason),
        };

        match binding.requested_chassis() {
            None => return Decision::Skip(SkipReason::NoRequestedChassis),
            Some(requested) if requested != self.chassis => {
                return Decision::Skip(SkipReason::RequestedForOther(requested.to_string()))
            }
            Some(_) => {}
        }

        if let Some(claimant) = binding
            .chassis
            .as_deref()
            .and_then(|uuid| self.directory.chassis_name(uuid))
        {
            if claimant != self.chassis {
                return Decision::Skip(SkipReason::ClaimedByOther(claimant));
            }
        }

        Decision::Bind(binding.logical_port)
    }

    /// Filter for deleted records.
    pub fn filter_delete(&self, table: &str, uuid: &str, row: &Row) -> Decision {
        match Self::decode(table, uuid, row) {
            Ok(binding) => Decision::Unbind(binding.logical_port),
            Err(reason) => Decision::Skip(reason),
        }
    }

    pub async fn on_add(&self, table: &str, uuid: &str, row: &Row) -> HandleOutcome {
        let decision = self.filter_add(table, uuid, row);
        self.act(decision).await
    }

    pub async fn on_delete(&self, table: &str, uuid: &str, row: &Row) -> HandleOutcome {
        let decision = self.filter_delete(table, uuid, row);
        self.act(decision).await
    }

    /// Dispatches a monitor event. Modified records take the add path.
    pub async fn handle(&self, event: &RowEvent) -> HandleOutcome {
        match event.kind {
            EventKind::Added | EventKind::Modified => {
                self.on_add(&event.table, &event.uuid, &event.row).await
            }
            EventKind::Deleted => self.on_delete(&event.table, &event.uuid, &event.row).await,
        }
    }

    async fn act(&self, decision: Decision) -> HandleOutcome {
        match decision {
            Decision::Bind(lp) => match self.orchestrator.bind(&lp).await {
                Ok(_) => HandleOutcome::Bound(lp),
                Err(e) => {
                    error!(logical_port = %lp, error = %e, "Bind failed");
                    HandleOutcome::Failed(lp)
                }
            },
            Decision::Unbind(lp) => match self.orchestrator.unbind(&lp).await {
                Ok(()) => HandleOutcome::Unbound(lp),
                Err(e) => {
                    error!(logical_port = %lp, error = %e, "Unbind failed");
                    HandleOutcome::Failed(lp)
                }
            },
            Decision::Skip(reason) => {
                match &reason {
                    SkipReason::InvalidRecord(_) => warn!("Ignoring record: {}", reason),
                    SkipReason::OtherTable => {}
                    _ => debug!("Skipping record: {}", reason),
                }
                HandleOutcome::Skipped(reason)
            }
        }
    }
}

/// Name of the logical port in a raw Port_Binding row, for logging.
pub fn logical_port_of(row: &Row) -> &str {
    row.get(columns::LOGICAL_PORT)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentContext;
    use crate::config::AgentConfig;
    use crate::testing::{FakeDevices, FakeSwitchDb};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    struct Harness {
        watcher: BindingWatcher,
        db: Arc<FakeSwitchDb>,
        devices: Arc<FakeDevices>,
    }

    fn harness(chassis: &str) -> Harness {
        let mut config = AgentConfig::default();
        config.agent.chassis = chassis.to_string();
        let db = Arc::new(FakeSwitchDb::with_bridge("br-int"));
        let devices = Arc::new(FakeDevices::new());
        let orch = Orchestrator::new(AgentContext::new(config), db.clone(), devices.clone());
        let directory: HashMap<String, String> = [
            ("ch-a".to_string(), "host-A".to_string()),
            ("ch-b".to_string(), "host-B".to_string()),
        ]
        .into_iter()
        .collect();
        Harness {
            watcher: BindingWatcher::new(orch, Arc::new(directory)),
            db,
            devices,
        }
    }

    fn binding(lp: &str, port_type: &str, requested: Option<&str>) -> Row {
        let options: Vec<Value> = requested
            .map(|c| vec![json!(["requested-chassis", c])])
            .unwrap_or_default();
        json!({
            "logical_port": lp,
            "type": port_type,
            "tunnel_key": 1,
            "chassis": ["set", []],
            "options": ["map", options]
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_filter_add_decisions() {
        let h = harness("host-A");
        let w = &h.watcher;

        assert_eq!(
            w.filter_add("Port_Binding", "pb1", &binding("lp1", "", Some("host-A"))),
            Decision::Bind("lp1".to_string())
        );
        assert_eq!(
            w.filter_add("Chassis", "pb1", &binding("lp1", "", Some("host-A"))),
            Decision::Skip(SkipReason::OtherTable)
        );
        assert_eq!(
            w.filter_add("Port_Binding", "pb1", &binding("lr0-ls0", "patch", Some("host-A"))),
            Decision::Skip(SkipReason::PatchPort)
        );
        assert_eq!(
            w.filter_add("Port_Binding", "pb1", &binding("lp1", "", None)),
            Decision::Skip(SkipReason::NoRequestedChassis)
        );
        assert_eq!(
            w.filter_add("Port_Binding", "pb1", &binding("lp1", "", Some("host-B"))),
            Decision::Skip(SkipReason::RequestedForOther("host-B".to_string()))
        );
        assert!(matches!(
            w.filter_add("Port_Binding", "pb1", &binding("", "", Some("host-A"))),
            Decision::Skip(SkipReason::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_filter_add_claimed_by_known_other_chassis() {
        let h = harness("host-A");
        let mut row = binding("lp1", "", Some("host-A"));

        row.insert("chassis".to_string(), json!(["uuid", "ch-b"]));
        assert_eq!(
            h.watcher.filter_add("Port_Binding", "pb1", &row),
            Decision::Skip(SkipReason::ClaimedByOther("host-B".to_string()))
        );

        row.insert("chassis".to_string(), json!(["uuid", "ch-a"]));
        assert_eq!(
            h.watcher.filter_add("Port_Binding", "pb1", &row),
            Decision::Bind("lp1".to_string())
        );

        // Unknown claimant does not block.
        row.insert("chassis".to_string(), json!(["uuid", "ch-unknown"]));
        assert_eq!(
            h.watcher.filter_add("Port_Binding", "pb1", &row),
            Decision::Bind("lp1".to_string())
        );
    }

    #[test]
    fn test_filter_delete_ignores_chassis() {
        let h = harness("host-A");
        assert_eq!(
            h.watcher
                .filter_delete("Port_Binding", "pb1", &binding("lp1", "", Some("host-B"))),
            Decision::Unbind("lp1".to_string())
        );
        assert_eq!(
            h.watcher
                .filter_delete("Port_Binding", "pb1", &binding("lr0", "patch", None)),
            Decision::Skip(SkipReason::PatchPort)
        );
    }

    #[tokio::test]
    async fn test_patch_port_is_never_realized() {
        let h = harness("host-A");
        let row = binding("lr0-ls0", "patch", Some("host-A"));

        h.watcher.on_add("Port_Binding", "pb1", &row).await;
        h.watcher.on_delete("Port_Binding", "pb1", &row).await;

        assert!(h.devices.calls().is_empty());
        assert_eq!(h.db.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_binding_for_other_chassis_is_noop() {
        let h = harness("host-A");
        let outcome = h
            .watcher
            .on_add("Port_Binding", "pb1", &binding("lp1", "", Some("host-B")))
            .await;

        assert!(matches!(outcome, HandleOutcome::Skipped(_)));
        assert!(h.devices.link_names().is_empty());
        assert_eq!(h.db.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_bind_then_unbind_end_to_end() {
        let h = harness("host-A");
        let row = binding("lp1", "", Some("host-A"));

        let outcome = h
            .watcher
            .handle(&RowEvent {
                table: "Port_Binding".to_string(),
                uuid: "pb1".to_string(),
                kind: EventKind::Added,
                row: row.clone(),
            })
            .await;
        assert_eq!(outcome, HandleOutcome::Bound("lp1".to_string()));

        let link = h.devices.link("lp1").unwrap();
        assert!(link.tap && link.up && link.vnet_hdr);
        assert_eq!(link.mtu, 1500);
        assert_eq!(h.db.bridge_port_names("br-int"), vec!["lp1".to_string()]);
        let ifaces = crate::switch::SwitchDb::list_interfaces(h.db.as_ref())
            .await
            .unwrap();
        assert_eq!(ifaces.len(), 1);
        assert_eq!(ifaces[0].iface_id(), Some("lp1"));

        let outcome = h
            .watcher
            .handle(&RowEvent {
                table: "Port_Binding".to_string(),
                uuid: "pb1".to_string(),
                kind: EventKind::Deleted,
                row,
            })
            .await;
        assert_eq!(outcome, HandleOutcome::Unbound("lp1".to_string()));
        assert!(h.db.bridge_port_names("br-int").is_empty());
        assert!(h.devices.link("lp1").is_none());
    }

    #[tokio::test]
    async fn test_failure_is_reported_not_propagated() {
        let h = harness("host-A");
        h.devices.add_non_tap("lp1");

        let outcome = h
            .watcher
            .on_add("Port_Binding", "pb1", &binding("lp1", "", Some("host-A")))
            .await;
        assert_eq!(outcome, HandleOutcome::Failed("lp1".to_string()));
        assert_eq!(h.db.transaction_count(), 0);
    }

    #[test]
    fn test_logical_port_of() {
        assert_eq!(logical_port_of(&binding("lp7", "", None)), "lp7");
        assert_eq!(logical_port_of(&Row::new()), "");
    }
}
