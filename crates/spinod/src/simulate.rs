//! Simulation mode — runs a whole cluster inside one process.
//!
//! The simulator:
//! 1. Creates an in-memory cluster and joins every configured member
//! 2. Starts one Spino node per member and activates its services
//! 3. Attaches an observer whose routing table is fed through an event
//!    pump task and logs every change it sees
//! 4. Makes the first member leave and rejoin, printing the view of the
//!    last member after each step
//! 5. Picks the next host of every service through a host provider

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Context;
use spino_cluster::{FactMap, InMemoryCluster, Membership, SpinoNode, pump};
use spino_core::config::SimulateConfig;
use spino_core::{MemberId, RoutingTable, SpinoConfig};
use spino_proxy::HostProvider;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const OBSERVER: &str = "observer";

/// Run the simulation described by `config`.
pub async fn run_simulation(config: SpinoConfig, json: bool) -> anyhow::Result<()> {
    let simulate: SimulateConfig = config
        .simulate
        .clone()
        .or_else(|| SpinoConfig::scaffold().simulate)
        .unwrap_or_default();
    if simulate.members.is_empty() {
        anyhow::bail!("simulation needs at least one member");
    }

    info!(
        group = %config.cluster.group,
        members = simulate.members.len(),
        "starting simulation"
    );

    let cluster = InMemoryCluster::new(&config.cluster);
    let services: BTreeSet<String> = simulate
        .members
        .iter()
        .flat_map(|m| m.services.iter().map(|s| s.name.clone()))
        .collect();

    // ── Observer fed through the event pump ──────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let observer_table = Arc::new(RoutingTable::new());
    let (sink, event_pump) = pump::channel(observer_table.clone());
    let observer = cluster.handle(OBSERVER);
    observer.watch_members(Arc::new(sink.clone()));
    observer.watch_facts(Arc::new(sink));
    let pump_handle = tokio::spawn(event_pump.run(shutdown_rx.clone()));

    let mut watcher_handles = Vec::new();
    for service in &services {
        let (_, mut changes) =
            observer_table.subscribe_channel(service, config.notify.channel_capacity);
        let table = observer_table.clone();
        let mut shutdown = shutdown_rx.clone();
        watcher_handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    change = changes.recv() => match change {
                        Some(change) => {
                            let addresses: Vec<String> = table
                                .addresses(&change.service)
                                .iter()
                                .map(ToString::to_string)
                                .collect();
                            info!(service = %change.service, ?addresses, "observer saw change");
                        }
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
        }));
    }

    // ── Members ──────────────────────────────────────────────────
    let mut nodes = Vec::with_capacity(simulate.members.len());
    for member in &simulate.members {
        let handle = Arc::new(cluster.join(member.id.as_str()));
        let node = SpinoNode::new(handle.clone(), handle)
            .with_notify_config(config.notify.clone());
        node.start()?;

        for service in &member.services {
            node.activate(&service.name, &service.address)
                .with_context(|| format!("member {} activating {}", member.id, service.name))?;
        }
        nodes.push(node);
    }

    let viewer = nodes.last().context("no nodes started")?;
    print_view("after activation", viewer, &services, json)?;

    let flapping = MemberId::from(simulate.members[0].id.as_str());
    cluster.leave(&flapping);
    print_view(&format!("after {flapping} left"), viewer, &services, json)?;

    cluster.join(flapping.clone());
    print_view(&format!("after {flapping} rejoined"), viewer, &services, json)?;

    for service in &services {
        let provider = HostProvider::for_node(viewer, service);
        match provider.next_host() {
            Some(host) => info!(%service, host = %host.url(), hosts = provider.len(), "next host"),
            None => info!(%service, "no hosts available"),
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────
    for node in &nodes {
        node.shutdown();
    }
    if shutdown_tx.send(true).is_err() {
        debug!("background tasks already stopped");
    }
    let stats = pump_handle.await?;
    for handle in watcher_handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "observer watcher task failed");
        }
    }

    info!(applied = stats.applied, "simulation finished");
    Ok(())
}

fn print_view(
    label: &str,
    node: &SpinoNode,
    services: &BTreeSet<String>,
    json: bool,
) -> anyhow::Result<()> {
    let view: BTreeMap<&str, Vec<String>> = services
        .iter()
        .map(|service| {
            let mut addresses: Vec<String> = node
                .addresses(service)
                .iter()
                .map(ToString::to_string)
                .collect();
            addresses.sort();
            (service.as_str(), addresses)
        })
        .collect();

    if json {
        let line = serde_json::json!({
            "step": label,
            "member": node.local_member().as_str(),
            "services": view,
        });
        println!("{}", serde_json::to_string(&line)?);
    } else {
        println!("── {label} (as seen by {})", node.local_member());
        for (service, addresses) in &view {
            println!("  {service}: {}", addresses.join(", "));
        }
    }
    Ok(())
}
