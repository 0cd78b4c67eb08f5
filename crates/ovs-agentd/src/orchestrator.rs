//! Device orchestration: orders kernel device operations around the
//! binding transactions.
//!
//! Bind: create tap, attach, bring up. Stops at the first failure, which
//! can leave a tap without a port behind.
//!
//! Unbind: detach, bring down, delete. Every step runs; the first failure
//! is returned once all steps are done.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ovs_agent_common::{AgentError, AgentResult};
use tracing::{info, instrument, warn};

use crate::agent::AgentContext;
use crate::netdev::{sanitize_iface_name, DeviceManager};
use crate::switch::{ensure_binding, remove_binding, EnsureOutcome, RemoveOutcome, SwitchDb};

/// Binds and unbinds logical ports on the configured bridge.
pub struct Orchestrator {
    ctx: AgentContext,
    switch: Arc<dyn SwitchDb>,
    devices: Arc<dyn DeviceManager>,
}

impl Orchestrator {
    /// Creates an orchestrator acting through `switch` and `devices`.
    pub fn new(
        ctx: AgentContext,
        switch: Arc<dyn SwitchDb>,
        devices: Arc<dyn DeviceManager>,
    ) -> Self {
        Self {
            ctx,
            switch,
            devices,
        }
    }

    /// Context the orchestrator was built with.
    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    /// Runs `fut` unless shutdown cancels it first or `deadline` elapses.
    async fn guarded<T, F>(
        &self,
        operation: &str,
        deadline: Option<Duration>,
        fut: F,
    ) -> AgentResult<T>
    where
        F: Future<Output = AgentResult<T>>,
    {
        let bounded = async {
            match deadline {
                Some(after) => match tokio::time::timeout(after, fut).await {
                    Ok(res) => res,
                    Err(_) => Err(AgentError::Timeout {
                        operation: operation.to_string(),
                        after,
                    }),
                },
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => Err(AgentError::cancelled(operation)),
            res = bounded => res,
        }
    }

    /// Realizes `logical_port` on this host.
    #[instrument(skip(self), fields(bridge = %self.ctx.config.agent.bridge))]
    pub async fn bind(&self, logical_port: &str) -> AgentResult<EnsureOutcome> {
        let config = &self.ctx.config;
        let device = sanitize_iface_name(logical_port);

        let device = self
            .guarded(
                "create_tap",
                None,
                self.devices
                    .create_tap(&device, config.netdev.mtu, config.netdev.vnet_hdr),
            )
            .await?;

        let outcome = self
            .guarded(
                "ensure_binding",
                Some(config.transaction_timeout()),
                ensure_binding(
                    self.switch.as_ref(),
                    &config.agent.bridge,
                    &device,
                    logical_port,
                    config.agent.conflict_policy,
                ),
            )
            .await?;

        self.guarded("set_link_up", None, self.devices.set_link_up(&device))
            .await?;

        info!("Bound {} as {} ({:?})", logical_port, device, outcome);
        Ok(outcome)
    }

    /// Tears down `logical_port` on this host.
    #[instrument(skip(self), fields(bridge = %self.ctx.config.agent.bridge))]
    pub async fn unbind(&self, logical_port: &str) -> AgentResult<()> {
        let config = &self.ctx.config;
        let device = sanitize_iface_name(logical_port);
        let mut first_error: Option<AgentError> = None;

        match self
            .guarded(
                "remove_binding",
                Some(config.transaction_timeout()),
                remove_binding(
                    self.switch.as_ref(),
                    &config.agent.bridge,
                    &device,
                    logical_port,
                ),
            )
            .await
        {
            Ok(RemoveOutcome::NotOwned) => {
                warn!("Device {} belongs to another binding, keeping it", device);
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to detach {}: {}", logical_port, e);
                first_error.get_or_insert(e);
            }
        }

        match self
            .guarded("set_link_down", None, self.devices.set_link_down(&device))
            .await
        {
            Ok(()) => {}
            Err(AgentError::NotFound { .. }) => {
                warn!("Device {} already gone", device);
            }
            Err(e) => {
                warn!("Failed to bring {} down: {}", device, e);
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = self
            .guarded("delete_link", None, self.devices.delete_link(&device))
            .await
        {
            warn!("Failed to delete {}: {}", device, e);
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Unbound {} ({})", logical_port, device);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::netdev::MockDeviceManager;
    use crate::testing::{FakeDevices, FakeSwitchDb};
    use crate::types::ConflictPolicy;
    use mockall::Sequence;
    use pretty_assertions::assert_eq;

    fn context() -> AgentContext {
        let mut config = AgentConfig::default();
        config.agent.chassis = "host-A".to_string();
        AgentContext::new(config)
    }

    fn orchestrator(
        ctx: AgentContext,
        db: Arc<FakeSwitchDb>,
        devices: Arc<dyn DeviceManager>,
    ) -> Orchestrator {
        Orchestrator::new(ctx, db, devices)
    }

    #[tokio::test]
    async fn test_bind_orders_create_attach_up() {
        let db = Arc::new(FakeSwitchDb::with_bridge("br-int"));
        let mut mock = MockDeviceManager::new();
        let mut seq = Sequence::new();

        mock.expect_create_tap()
            .withf(|name: &str, mtu: &u32, vnet_hdr: &bool| {
                name == "lp-1" && *mtu == 1500 && *vnet_hdr
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|name, _, _| Ok(name.to_string()));

        let attached = Arc::clone(&db);
        mock.expect_set_link_up()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |name| {
                // The port must already be on the bridge when the link goes up.
                assert_eq!(attached.bridge_port_names("br-int"), vec!["lp_1".to_string()]);
                Ok(name.to_string())
            });

        let orch = orchestrator(context(), db, Arc::new(mock));
        let outcome = orch.bind("lp_1").await.unwrap();
        assert_eq!(outcome, EnsureOutcome::Created);
    }

    #[tokio::test]
    async fn test_bind_aborts_when_tap_creation_fails() {
        let db = Arc::new(FakeSwitchDb::with_bridge("br-int"));
        let mut mock = MockDeviceManager::new();
        mock.expect_create_tap()
            .returning(|name, _, _| Err(AgentError::device(name, "exists but is not a tap")));
        mock.expect_set_link_up().times(0);

        let orch = orchestrator(context(), Arc::clone(&db), Arc::new(mock));
        let err = orch.bind("lp1").await.unwrap_err();
        assert!(matches!(err, AgentError::Device { .. }));
        assert_eq!(db.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_bind_aborts_on_conflict() {
        let db = Arc::new(FakeSwitchDb::with_bridge("br-int"));
        db.seed_binding("br-int", "lp1", "lp1");
        let mut mock = MockDeviceManager::new();
        mock.expect_create_tap()
            .returning(|name, _, _| Ok(name.to_string()));
        mock.expect_set_link_up().times(0);

        let orch = orchestrator(context(), db, Arc::new(mock));
        let err = orch.bind("lp1").await.unwrap_err();
        assert!(matches!(err, AgentError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_bind_with_adopt_policy_is_repeatable() {
        let mut config = AgentConfig::default();
        config.agent.chassis = "host-A".to_string();
        config.agent.conflict_policy = ConflictPolicy::Adopt;
        let db = Arc::new(FakeSwitchDb::with_bridge("br-int"));
        let devices = Arc::new(FakeDevices::new());

        let orch = orchestrator(AgentContext::new(config), Arc::clone(&db), devices.clone());
        assert_eq!(orch.bind("lp1").await.unwrap(), EnsureOutcome::Created);
        assert_eq!(orch.bind("lp1").await.unwrap(), EnsureOutcome::AlreadyBound);
        assert!(devices.link("lp1").unwrap().up);
        assert_eq!(db.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_unbind_runs_every_step_and_reports_first_error() {
        let db = Arc::new(FakeSwitchDb::with_bridge("br-int"));
        db.disconnect();
        let mut mock = MockDeviceManager::new();
        let mut seq = Sequence::new();
        mock.expect_set_link_down()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(AgentError::device("lp1", "operation not permitted")));
        mock.expect_delete_link()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let orch = orchestrator(context(), db, Arc::new(mock));
        let err = orch.unbind("lp1").await.unwrap_err();
        assert!(matches!(err, AgentError::Protocol { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_unbind_keeps_device_of_other_binding() {
        let db = Arc::new(FakeSwitchDb::with_bridge("br-int"));
        let devices = Arc::new(FakeDevices::new());
        let orch = orchestrator(context(), Arc::clone(&db), devices.clone());
        orch.bind("a-b").await.unwrap();

        orch.unbind("a_b").await.unwrap();
        assert!(devices.link("a-b").unwrap().up);
        assert_eq!(db.bridge_port_names("br-int"), vec!["a-b".to_string()]);
        assert!(!devices.calls().iter().any(|c| c.starts_with("delete_link")));
    }

    #[tokio::test]
    async fn test_unbind_of_missing_device_succeeds() {
        let db = Arc::new(FakeSwitchDb::with_bridge("br-int"));
        let devices = Arc::new(FakeDevices::new());

        let orch = orchestrator(context(), db, devices.clone());
        orch.unbind("lp1").await.unwrap();
        assert_eq!(
            devices.calls(),
            vec!["set_link_down lp1".to_string(), "delete_link lp1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_bind() {
        let db = Arc::new(FakeSwitchDb::with_bridge("br-int"));
        let devices = Arc::new(FakeDevices::new());
        let ctx = context();
        ctx.cancel.cancel();

        let orch = orchestrator(ctx, Arc::clone(&db), devices.clone());
        let err = orch.bind("lp1").await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled { .. }));
        assert!(devices.link_names().is_empty());
        assert_eq!(db.transaction_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_transaction_times_out() {
        let db = Arc::new(FakeSwitchDb::with_bridge("br-int"));
        db.set_transact_delay(Duration::from_secs(60));
        let devices = Arc::new(FakeDevices::new());

        let orch = orchestrator(context(), db, devices.clone());
        let err = orch.bind("lp1").await.unwrap_err();
        match err {
            AgentError::Timeout { operation, after } => {
                assert_eq!(operation, "ensure_binding");
                assert_eq!(after, Duration::from_secs(10));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!devices.link("lp1").unwrap().up);
    }
}
