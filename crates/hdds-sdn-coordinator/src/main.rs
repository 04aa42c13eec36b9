// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Optional centralized HTTP coordinator for the SDN control plane
//! (spec §4.5 "pull protocol", §6 "Coordinator HTTP surface").
//!
//! A shortcut for the peer-to-peer overlay (spec §4.4's design note: "a
//! logically central coordinator" is one acceptable substrate): every
//! shard's `hdds-sdn-controller` can poll this instead of running the
//! full gossip mesh, trading peer-to-peer liveness semantics for one
//! well-known endpoint.
//!
//! ```bash
//! hdds-sdn-coordinator --bind 0.0.0.0:8500 --config shards.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use hdds_sdn_core::config::ShardMap;

use hdds_sdn_coordinator::{build_app, CoordinatorState};

#[derive(Debug, Parser)]
#[command(name = "hdds-sdn-coordinator", about = "Centralized HTTP coordinator for the SDN control plane")]
struct CoordinatorArgs {
    /// Address the HTTP surface listens on.
    #[arg(long, default_value = "0.0.0.0:8500")]
    bind: SocketAddr,

    /// Path to the `cid -> {dpid}` shard map TOML file (spec §3/§6), the
    /// same file every `hdds-sdn-controller` process loads.
    #[arg(long)]
    config: PathBuf,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = CoordinatorArgs::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&args.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let shards = match ShardMap::from_file(&args.config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!("fatal init error: failed to load {:?}: {e}", args.config);
            return std::process::ExitCode::from(1);
        }
    };

    let state = Arc::new(CoordinatorState::new(shards));
    let app = build_app(state);

    let listener = match tokio::net::TcpListener::bind(args.bind).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("fatal init error: bind {}: {e}", args.bind);
            return std::process::ExitCode::from(1);
        }
    };

    tracing::info!("coordinator HTTP surface listening on {}", args.bind);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("server error: {e}");
        return std::process::ExitCode::from(2);
    }
    std::process::ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("SIGINT received, shutting down");
}
