use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use wildlink_backhaul::{
    BackhaulManager, DeferredStore, MemoryDeferredStore, MeshTransport, SqliteDeferredStore,
};
use wildlink_core::{logging, Config};
use wildlink_mesh::{MeshChannels, MeshNode};

mod udp_radio;

use udp_radio::UdpRadio;

const NODE_PROTOCOL_VERSION: u32 = 1;
const NODE_RUNTIME_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    runtime_version: u32,
    protocol_version: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            runtime_version: NODE_RUNTIME_VERSION,
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let config = match parse_config_path(&args)? {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default_config(),
    };
    config.validate().context("invalid configuration")?;
    logging::init_from_config(&config.logging);

    let local_id = config.node.node_id;
    info!(
        node_id = %format_args!("{:#010x}", local_id),
        role = config.node.role.as_str(),
        bind = %config.radio.bind_address,
        peers = config.radio.peers.len(),
        "WildLink node starting"
    );

    let (radio, inbound) = UdpRadio::bind(
        local_id,
        &config.radio.bind_address,
        &config.radio.peers,
        config.transmission.max_packet_size,
    )
    .await
    .context("binding development radio")?;

    let (node, channels) = MeshNode::new(config.clone(), radio)?;
    let MeshChannels {
        mut messages,
        mut control,
    } = channels;
    node.start();
    let mut workers = node.spawn_workers(inbound);

    let store: Box<dyn DeferredStore> = match &config.storage.deferred_db_path {
        Some(path) => Box::new(
            SqliteDeferredStore::open(path)
                .with_context(|| format!("opening deferred store {}", path))?,
        ),
        None => Box::new(MemoryDeferredStore::new()),
    };
    let mut backhaul = BackhaulManager::new(&config, store);
    match config.transport.gateway_node {
        Some(gateway) if gateway != local_id && config.transport.mesh_enabled => {
            backhaul.register(Arc::new(MeshTransport::new(node.clone(), gateway)));
        }
        _ => {}
    }
    let backhaul = Arc::new(backhaul);
    workers.push(spawn_transport_health(backhaul.clone(), node.clone(), &config));

    workers.push(tokio::spawn(async move {
        while let Some(message) = messages.recv().await {
            info!(
                source = %format_args!("{:#010x}", message.source),
                transmission_id = message.transmission_id,
                data_type = ?message.data_type,
                bytes = message.payload.len(),
                "Message received"
            );
        }
    }));
    workers.push(tokio::spawn(async move {
        while let Some(envelope) = control.recv().await {
            info!(
                source = %format_args!("{:#010x}", envelope.source_node),
                message_type = ?envelope.message_type,
                "Control message received"
            );
        }
    }));

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutdown requested");
    node.shutdown();
    for worker in workers {
        worker.abort();
    }
    Ok(())
}

/// Transport-health and deferred-flush worker
fn spawn_transport_health(
    backhaul: Arc<BackhaulManager>,
    node: MeshNode,
    config: &Config,
) -> tokio::task::JoinHandle<()> {
    let health_period = Duration::from_millis(config.transport.health_check_interval_ms);
    let flush_period = Duration::from_millis(config.transport.flush_interval_ms);
    tokio::spawn(async move {
        let mut health = interval(health_period);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut flush = interval(flush_period);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = health.tick() => {
                    let battery = node.with_topology(|t| t.local_battery_level());
                    backhaul.set_battery_level(battery);
                    let status = backhaul.refresh_health().await;
                    info!(transports = ?status, "Transport health refreshed");
                }
                _ = flush.tick() => {
                    if let Err(e) = backhaul.flush_deferred().await {
                        warn!(error = %e, "Deferred flush failed");
                    }
                }
            }
        }
    })
}

fn parse_config_path(args: &[String]) -> Result<Option<PathBuf>> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            if let Some(path) = args_iter.next() {
                return Ok(Some(PathBuf::from(path)));
            }
            bail!("--config was provided without a path");
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_config_path_parsing() {
        assert_eq!(
            parse_config_path(&args(&["wildlink-node", "--config", "node.toml"])).unwrap(),
            Some(PathBuf::from("node.toml"))
        );
        assert_eq!(parse_config_path(&args(&["wildlink-node"])).unwrap(), None);
        assert!(parse_config_path(&args(&["wildlink-node", "--config"])).is_err());
    }
}
