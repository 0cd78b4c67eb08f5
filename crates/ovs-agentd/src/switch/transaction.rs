//! Binding transactions against the local switch database.
//!
//! Each call reads the cached view, decides, and submits at most one
//! atomic transaction.

use ovs_agent_common::{AgentError, AgentResult};
use ovsdb_client::{Operation, OperationResult};
use tracing::{debug, info, instrument, warn};

use super::build::{attach_ops, detach_ops, reattach_ops};
use super::query::{
    bridge_has_port, find_bridge, find_bridge_with_port, find_interface, find_port,
    find_port_with_interface, port_interfaces,
};
use super::SwitchDb;
use crate::types::{Bridge, ConflictPolicy, Interface, Port};

/// What `ensure_binding` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Interface, Port and bridge membership were created.
    Created,
    /// A matching detached Port was put back on the bridge.
    Reattached,
    /// Everything was already in place.
    AlreadyBound,
}

/// What `remove_binding` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The Port and its interfaces were deleted.
    Removed,
    /// No Port for the logical port on this bridge, or it sits on another
    /// bridge.
    NotPresent,
    /// The Interface named `device`, or the Port named after the logical
    /// port, is tagged with another `iface-id`. Nothing was touched and the
    /// device belongs to that other binding.
    NotOwned,
}

/// Makes `device` a port of `bridge` tagged with `logical_port`.
#[instrument(skip(db))]
pub async fn ensure_binding(
    db: &dyn SwitchDb,
    bridge: &str,
    device: &str,
    logical_port: &str,
    policy: ConflictPolicy,
) -> AgentResult<EnsureOutcome> {
    let br = find_bridge(db, bridge)
        .await?
        .ok_or_else(|| AgentError::not_found("bridge", bridge))?;

    let iface = find_interface(db, device).await?;
    let port = match find_port(db, device).await? {
        Some(port) => Some(port),
        None if device != logical_port => find_port(db, logical_port).await?,
        None => None,
    };

    if iface.is_none() && port.is_none() {
        submit(db, attach_ops(&br, device, logical_port)).await?;
        info!("Attached {} to {} for {}", device, bridge, logical_port);
        return Ok(EnsureOutcome::Created);
    }

    match policy {
        ConflictPolicy::Strict => Err(AgentError::conflict(
            logical_port,
            describe_existing(iface.as_ref(), port.as_ref()),
        )),
        ConflictPolicy::Adopt => adopt(db, &br, device, logical_port, iface, port).await,
    }
}

async fn adopt(
    db: &dyn SwitchDb,
    bridge: &Bridge,
    device: &str,
    logical_port: &str,
    iface: Option<Interface>,
    port: Option<Port>,
) -> AgentResult<EnsureOutcome> {
    let Some(iface) = iface else {
        return Err(AgentError::conflict(
            logical_port,
            describe_existing(None, port.as_ref()),
        ));
    };
    if iface.iface_id() != Some(logical_port) {
        return Err(AgentError::conflict(
            logical_port,
            format!(
                "interface '{}' is bound to '{}'",
                device,
                iface.iface_id().unwrap_or_default()
            ),
        ));
    }

    let owner = find_port_with_interface(db, &iface.uuid).await?;
    let port = match (owner, port) {
        (Some(owner), Some(named)) if owner.uuid != named.uuid => {
            return Err(AgentError::conflict(
                logical_port,
                format!(
                    "interface '{}' belongs to port '{}', not '{}'",
                    device, owner.name, named.name
                ),
            ))
        }
        (Some(owner), _) => owner,
        (None, _) => {
            return Err(AgentError::conflict(
                logical_port,
                format!("interface '{device}' exists without a port"),
            ))
        }
    };

    if bridge_has_port(bridge, &port.uuid) {
        debug!("Port {} already on {}", port.name, bridge.name);
        return Ok(EnsureOutcome::AlreadyBound);
    }

    submit(db, reattach_ops(bridge, &port)).await?;
    info!("Re-attached port {} to {}", port.name, bridge.name);
    Ok(EnsureOutcome::Reattached)
}

fn describe_existing(iface: Option<&Interface>, port: Option<&Port>) -> String {
    match (iface, port) {
        (Some(i), Some(p)) => {
            format!("interface '{}' and port '{}' already exist", i.name, p.name)
        }
        (Some(i), None) => format!("interface '{}' already exists", i.name),
        (None, Some(p)) => format!("port '{}' already exists", p.name),
        (None, None) => "no existing state".to_string(),
    }
}

/// Deletes the logical port's Port and its interfaces, taking the Port off
/// `bridge` first when attached. Absent state is not an error.
///
/// The Port is looked up by logical port name only and must hold an
/// interface tagged with `iface-id == logical_port`. An Interface named
/// `device` tagged for another logical port means the device is not ours.
#[instrument(skip(db))]
pub async fn remove_binding(
    db: &dyn SwitchDb,
    bridge: &str,
    device: &str,
    logical_port: &str,
) -> AgentResult<RemoveOutcome> {
    let br = find_bridge(db, bridge)
        .await?
        .ok_or_else(|| AgentError::not_found("bridge", bridge))?;

    if let Some(iface) = find_interface(db, device).await? {
        if iface.iface_id() != Some(logical_port) {
            warn!(
                "Interface {} is bound to {}, not {}, leaving it alone",
                device,
                iface.iface_id().unwrap_or_default(),
                logical_port
            );
            return Ok(RemoveOutcome::NotOwned);
        }
    }

    let Some(port) = find_port(db, logical_port).await? else {
        debug!("No port for {} ({}), nothing to remove", logical_port, device);
        return Ok(RemoveOutcome::NotPresent);
    };

    let owned = port_interfaces(db, &port)
        .await?
        .iter()
        .any(|iface| iface.iface_id() == Some(logical_port));
    if !owned {
        warn!(
            "Port {} has no interface with iface-id {}, leaving it alone",
            port.name, logical_port
        );
        return Ok(RemoveOutcome::NotOwned);
    }

    let attached = if bridge_has_port(&br, &port.uuid) {
        Some(&br)
    } else if let Some(other) = find_bridge_with_port(db, &port.uuid).await? {
        debug!("Port {} is on {}, not {}, leaving it alone", port.name, other.name, bridge);
        return Ok(RemoveOutcome::NotPresent);
    } else {
        None
    };

    submit(db, detach_ops(attached, &port)).await?;
    match attached {
        Some(_) => info!("Removed port {} from {}", port.name, bridge),
        None => info!("Deleted detached port {}", port.name),
    }
    Ok(RemoveOutcome::Removed)
}

/// Runs `ops` and fails on the first per-operation error.
async fn submit(db: &dyn SwitchDb, ops: Vec<Operation>) -> AgentResult<Vec<OperationResult>> {
    let summary: Vec<(&'static str, String)> = ops
        .iter()
        .map(|op| (op.op_name(), op.table().to_string()))
        .collect();
    let results = db.transact(ops).await?;
    check_results(&summary, &results)?;
    Ok(results)
}

fn check_results(ops: &[(&'static str, String)], results: &[OperationResult]) -> AgentResult<()> {
    for (index, result) in results.iter().enumerate() {
        if !result.is_error() {
            continue;
        }
        let what = match ops.get(index) {
            Some((op, table)) => format!("operation {index} ({op} {table})"),
            None => "commit".to_string(),
        };
        return Err(AgentError::protocol(
            "transact",
            format!(
                "{} failed: {} (details: {})",
                what,
                result.error.as_deref().unwrap_or_default(),
                result.details.as_deref().unwrap_or_default()
            ),
        ));
    }

    if results.len() < ops.len() {
        return Err(AgentError::protocol(
            "transact",
            format!("expected {} results, got {}", ops.len(), results.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSwitchDb;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_ensure_binding_creates_all_rows() {
        let db = FakeSwitchDb::with_bridge("br-int");

        let outcome = ensure_binding(&db, "br-int", "lp1", "lp1", ConflictPolicy::Strict)
            .await
            .unwrap();

        assert_eq!(outcome, EnsureOutcome::Created);
        assert_eq!(db.transaction_count(), 1);
        let iface = find_interface(&db, "lp1").await.unwrap().unwrap();
        assert_eq!(iface.iface_id(), Some("lp1"));
        assert_eq!(iface.iface_type, "system");
        let port = find_port(&db, "lp1").await.unwrap().unwrap();
        assert_eq!(port.interfaces, vec![iface.uuid]);
        assert_eq!(db.bridge_port_names("br-int"), vec!["lp1".to_string()]);
    }

    #[tokio::test]
    async fn test_ensure_binding_twice_conflicts_in_strict_mode() {
        let db = FakeSwitchDb::with_bridge("br-int");
        ensure_binding(&db, "br-int", "lp1", "lp1", ConflictPolicy::Strict)
            .await
            .unwrap();

        let err = ensure_binding(&db, "br-int", "lp1", "lp1", ConflictPolicy::Strict)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Conflict { .. }));
        assert_eq!(db.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_ensure_binding_twice_is_noop_in_adopt_mode() {
        let db = FakeSwitchDb::with_bridge("br-int");
        ensure_binding(&db, "br-int", "lp1", "lp1", ConflictPolicy::Adopt)
            .await
            .unwrap();

        let outcome = ensure_binding(&db, "br-int", "lp1", "lp1", ConflictPolicy::Adopt)
            .await
            .unwrap();
        assert_eq!(outcome, EnsureOutcome::AlreadyBound);
        assert_eq!(db.transaction_count(), 1);
        assert_eq!(db.bridge_port_names("br-int"), vec!["lp1".to_string()]);
    }

    #[tokio::test]
    async fn test_adopt_reattaches_detached_port() {
        let db = FakeSwitchDb::with_bridge("br-int");
        db.seed_detached_binding("lp1", "lp1");

        let outcome = ensure_binding(&db, "br-int", "lp1", "lp1", ConflictPolicy::Adopt)
            .await
            .unwrap();
        assert_eq!(outcome, EnsureOutcome::Reattached);
        assert_eq!(db.bridge_port_names("br-int"), vec!["lp1".to_string()]);
    }

    #[tokio::test]
    async fn test_adopt_rejects_interface_bound_elsewhere() {
        let db = FakeSwitchDb::with_bridge("br-int");
        db.seed_binding("br-int", "lp1", "other-lp");

        let err = ensure_binding(&db, "br-int", "lp1", "lp1", ConflictPolicy::Adopt)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_missing_bridge_is_not_found() {
        let db = FakeSwitchDb::with_bridge("br-ex");
        let err = ensure_binding(&db, "br-int", "lp1", "lp1", ConflictPolicy::Strict)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NotFound { kind: "bridge", .. }));

        let err = remove_binding(&db, "br-int", "lp1", "lp1").await.unwrap_err();
        assert!(matches!(err, AgentError::NotFound { kind: "bridge", .. }));
    }

    #[tokio::test]
    async fn test_operation_error_names_the_failing_operation() {
        let db = FakeSwitchDb::with_bridge("br-int");
        db.fail_next_transaction(1, "constraint violation", "duplicate port name");

        let err = ensure_binding(&db, "br-int", "lp1", "lp1", ConflictPolicy::Strict)
            .await
            .unwrap_err();
        match err {
            AgentError::Protocol { operation, message } => {
                assert_eq!(operation, "transact");
                assert!(message.contains("operation 1 (insert Port)"), "{message}");
                assert!(message.contains("constraint violation"), "{message}");
                assert!(message.contains("duplicate port name"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(db.bridge_port_names("br-int").is_empty());
    }

    #[tokio::test]
    async fn test_remove_binding_cleans_up_everything() {
        let db = FakeSwitchDb::with_bridge("br-int");
        ensure_binding(&db, "br-int", "lp1", "lp1", ConflictPolicy::Strict)
            .await
            .unwrap();

        let outcome = remove_binding(&db, "br-int", "lp1", "lp1").await.unwrap();
        assert_eq!(outcome, RemoveOutcome::Removed);
        assert!(db.bridge_port_names("br-int").is_empty());
        assert!(find_port(&db, "lp1").await.unwrap().is_none());
        assert!(find_interface(&db, "lp1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_binding_is_idempotent() {
        let db = FakeSwitchDb::with_bridge("br-int");

        let outcome = remove_binding(&db, "br-int", "lp1", "lp1").await.unwrap();
        assert_eq!(outcome, RemoveOutcome::NotPresent);

        ensure_binding(&db, "br-int", "lp1", "lp1", ConflictPolicy::Strict)
            .await
            .unwrap();
        remove_binding(&db, "br-int", "lp1", "lp1").await.unwrap();
        let outcome = remove_binding(&db, "br-int", "lp1", "lp1").await.unwrap();
        assert_eq!(outcome, RemoveOutcome::NotPresent);
        assert_eq!(db.transaction_count(), 2);
    }

    #[tokio::test]
    async fn test_remove_binding_leaves_foreign_bridge_ports() {
        let db = FakeSwitchDb::with_bridge("br-int");
        db.add_bridge("br-ex");
        db.seed_binding("br-ex", "lp1", "lp1");

        let outcome = remove_binding(&db, "br-int", "lp1", "lp1").await.unwrap();
        assert_eq!(outcome, RemoveOutcome::NotPresent);
        assert_eq!(db.bridge_port_names("br-ex"), vec!["lp1".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_binding_ignores_port_of_sanitized_twin() {
        // "a_b" sanitizes to the device name "a-b", which is also a live
        // logical port of its own.
        let db = FakeSwitchDb::with_bridge("br-int");
        ensure_binding(&db, "br-int", "a-b", "a-b", ConflictPolicy::Strict)
            .await
            .unwrap();

        let outcome = remove_binding(&db, "br-int", "a-b", "a_b").await.unwrap();
        assert_eq!(outcome, RemoveOutcome::NotOwned);
        assert_eq!(db.bridge_port_names("br-int"), vec!["a-b".to_string()]);
        let iface = find_interface(&db, "a-b").await.unwrap().unwrap();
        assert_eq!(iface.iface_id(), Some("a-b"));
        assert_eq!(db.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_binding_requires_matching_iface_id() {
        let db = FakeSwitchDb::with_bridge("br-int");
        db.seed_port(Some("br-int"), "lp1", "tap9", "someone-else");

        let outcome = remove_binding(&db, "br-int", "lp1", "lp1").await.unwrap();
        assert_eq!(outcome, RemoveOutcome::NotOwned);
        assert_eq!(db.bridge_port_names("br-int"), vec!["lp1".to_string()]);
        assert!(find_interface(&db, "tap9").await.unwrap().is_some());
        assert_eq!(db.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_binding_deletes_detached_port() {
        let db = FakeSwitchDb::with_bridge("br-int");
        db.seed_detached_binding("lp1", "lp1");

        let outcome = remove_binding(&db, "br-int", "lp1", "lp1").await.unwrap();
        assert_eq!(outcome, RemoveOutcome::Removed);
        assert!(find_port(&db, "lp1").await.unwrap().is_none());
        assert!(find_interface(&db, "lp1").await.unwrap().is_none());
        assert_eq!(db.transaction_count(), 1);
    }

    #[test]
    fn test_check_results_short_reply() {
        let ops = vec![("insert", "Port".to_string()), ("mutate", "Bridge".to_string())];
        let err = check_results(&ops, &[OperationResult::default()]).unwrap_err();
        assert!(err.to_string().contains("expected 2 results"));
    }
}
