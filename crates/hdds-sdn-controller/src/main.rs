// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SDN control-plane node.
//!
//! One process per shard (`--controller-id`): joins the overlay mesh with
//! its peers, accepts a southbound (OpenFlow) collaborator on
//! `--ofp-tcp-listen-port`, keeps the replicated topology store and
//! heat-degree routing engine for its shard, and installs the resulting
//! flow/group mods through the southbound link.
//!
//! ```bash
//! hdds-sdn-controller --controller-id 1 --config shards.toml --ofp-tcp-listen-port 6653
//! ```

mod config;
mod server;
mod southbound_stub;

use std::net::TcpListener;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use crossbeam::channel::unbounded;
use hdds_sdn_core::config::ShardMap;
use hdds_sdn_core::graph::Graph;
use hdds_sdn_core::orchestrator::Orchestrator;
use hdds_sdn_core::overlay::{Overlay, Topic};
use hdds_sdn_core::topology::TopologyStore;
use parking_lot::Mutex;

use config::{ControllerArgs, ControllerConfig};

fn main() -> ExitCode {
    let args = ControllerArgs::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level.clone())).init();
    let config = ControllerConfig::from_args(args);

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("[main] fatal init error: {e}");
            ExitCode::from(1)
        }
    }
}

fn run(config: ControllerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let self_cid = config.self_cid();
    let shards = Arc::new(ShardMap::from_file(&config.args.config)?);
    if !shards.cids().contains(&self_cid) {
        return Err(format!("controller-id {self_cid} has no entry in {:?}", config.args.config).into());
    }
    let mesh_bind = shards
        .overlay_addr(self_cid)
        .ok_or_else(|| format!("no overlay_addr configured for cid {self_cid} in {:?}", config.args.config))?;

    let self_writer_id = writer_id_for(self_cid);
    let overlay = Arc::new(Overlay::new(
        self_writer_id,
        std::time::Duration::from_millis(hdds_sdn_core::config::defaults::PEER_TIMEOUT_MS),
    ));
    let topology = Arc::new(Mutex::new(TopologyStore::new()));

    let (commands_tx, commands_rx) = unbounded();
    let orchestrator = Arc::new(Orchestrator::new(
        self_cid,
        hdds_sdn_core::config::defaults::DEFAULT_HOST_PORT,
        Graph::new(),
        topology.clone(),
        shards.clone(),
        overlay.clone(),
        commands_tx,
    ));

    server::start_mesh(&mesh_bind, overlay.clone(), shards.clone(), self_cid)?;

    for topic in Topic::ALL {
        let rx = overlay.subscribe(topic);
        let store = topology.clone();
        let orchestrator = orchestrator.clone();
        std::thread::Builder::new()
            .name(format!("subscriber-{topic:?}"))
            .spawn(move || server::subscriber_loop(topic, rx, store, orchestrator))?;
    }

    {
        let overlay = overlay.clone();
        let store = topology.clone();
        let orchestrator = orchestrator.clone();
        std::thread::Builder::new()
            .name("peer-liveness".into())
            .spawn(move || server::peer_liveness_loop(overlay, store, orchestrator))?;
    }
    {
        let overlay = overlay.clone();
        let store = topology.clone();
        std::thread::Builder::new()
            .name("new-subscription".into())
            .spawn(move || server::new_subscription_loop(overlay, store, self_cid))?;
    }
    {
        let overlay = overlay.clone();
        std::thread::Builder::new().name("heartbeat".into()).spawn(move || server::heartbeat_loop(overlay))?;
    }
    {
        let orchestrator = orchestrator.clone();
        let overlay = overlay.clone();
        std::thread::Builder::new()
            .name("pull-trees".into())
            .spawn(move || server::pull_trees_loop(orchestrator, overlay, self_cid))?;
    }

    let southbound_listener = TcpListener::bind(("0.0.0.0", config.args.ofp_tcp_listen_port))?;
    log::info!(
        "[main] southbound collaborator listener on port {} (observe_links={})",
        config.args.ofp_tcp_listen_port,
        config.args.observe_links
    );
    let current_link = Arc::new(Mutex::new(None));
    {
        let (events_tx, events_rx) = unbounded();
        let current = current_link.clone();
        std::thread::Builder::new()
            .name("southbound-accept".into())
            .spawn(move || southbound_stub::accept_loop(southbound_listener, events_tx, current))?;

        let store = topology.clone();
        let overlay = overlay.clone();
        let orchestrator = orchestrator.clone();
        std::thread::Builder::new()
            .name("southbound-events".into())
            .spawn(move || server::southbound_event_loop(events_rx, store, overlay, orchestrator, self_cid))?;
    }
    {
        let current = current_link;
        std::thread::Builder::new()
            .name("southbound-commands".into())
            .spawn(move || southbound_stub::command_writer_loop(commands_rx, current))?;
    }

    {
        let overlay = overlay.clone();
        ctrlc::set_handler(move || {
            log::info!("[main] SIGINT received, shutting down");
            overlay.shutdown();
        })?;
    }

    log::info!("[main] controller {self_cid} running, mesh bound to {mesh_bind}");
    orchestrator.run();
    Ok(())
}

/// Derives this process's overlay writer id from its cid: deterministic
/// and unique enough for a static shard map where cids are assigned by
/// the operator (spec §3 leaves writer-id generation implementation
/// defined; random UUIDs would work just as well but wouldn't be stable
/// across a restart, which matters for reconnect/liveness tests).
fn writer_id_for(cid: hdds_sdn_core::topology::Cid) -> hdds_sdn_core::topology::WriterId {
    let mut id = [0u8; 16];
    id[0..2].copy_from_slice(&cid.to_le_bytes());
    id
}
