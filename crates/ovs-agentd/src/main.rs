//! ovs-agentd - OVN port binding agent
//!
//! Entry point for the ovs-agentd daemon.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use ovs_agentd::tables::{
    OVS_BRIDGE_TABLE, OVS_DB_NAME, OVS_INTERFACE_TABLE, OVS_PORT_TABLE, SB_CHASSIS_TABLE,
    SB_DB_NAME, SB_PORT_BINDING_TABLE,
};
use ovs_agentd::{
    logging, Agent, AgentConfig, AgentContext, BindingWatcher, CliArgs, IpLinkManager,
    Orchestrator,
};
use ovsdb_client::{MonitorRequest, OvsDbClient};

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let mut config = AgentConfig::load_or_default(&args.config)?;
    config.apply_overrides(&args);
    config.validate()?;
    let _log_guard = logging::init(&config.logging)?;

    info!("--- Starting ovs-agentd ---");
    info!(
        chassis = %config.agent.chassis,
        bridge = %config.agent.bridge,
        policy = %config.agent.conflict_policy,
        "Configuration loaded"
    );

    let ovs_endpoint = config.ovsdb_endpoint()?;
    let sb_endpoint = config.southbound_endpoint()?;
    let queue_capacity = config.runtime.event_queue_capacity;
    let settle = config.startup_settle();
    let ip_cmd = config.netdev.ip_cmd.clone();
    let ctx = AgentContext::new(config);

    let ovs = OvsDbClient::connect(&ovs_endpoint, OVS_DB_NAME)
        .await
        .with_context(|| format!("connecting to switch database at {ovs_endpoint}"))?;
    ovs.monitor(&[
        MonitorRequest::all_columns(OVS_BRIDGE_TABLE),
        MonitorRequest::all_columns(OVS_PORT_TABLE),
        MonitorRequest::all_columns(OVS_INTERFACE_TABLE),
    ])
    .await
    .context("monitoring switch database")?;
    let ovs = Arc::new(ovs);

    let southbound = OvsDbClient::connect(&sb_endpoint, SB_DB_NAME)
        .await
        .with_context(|| format!("connecting to Southbound at {sb_endpoint}"))?;
    let events = southbound.subscribe(queue_capacity);
    southbound
        .monitor(&[
            MonitorRequest::columns(SB_CHASSIS_TABLE, &["name"]),
            MonitorRequest::all_columns(SB_PORT_BINDING_TABLE),
        ])
        .await
        .context("monitoring Southbound")?;
    let southbound = Arc::new(southbound);

    // Let both replicas settle before acting on the initial snapshot.
    tokio::time::sleep(settle).await;

    let orchestrator = Orchestrator::new(
        ctx.clone(),
        ovs.clone(),
        Arc::new(IpLinkManager::new(ip_cmd)),
    );
    let watcher = BindingWatcher::new(orchestrator, southbound.clone());
    let stats = Agent::new(ctx, watcher)
        .run_until(events, shutdown_signal())
        .await
        .into_result()
        .context("ovs-agentd stopped unexpectedly")?;

    info!(
        processed = stats.processed,
        failed = stats.failed,
        "ovs-agentd stopped"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("ovs-agentd failed: {:#}", e);
            eprintln!("ovs-agentd: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
