// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller CLI surface (spec §6): `--controller-id` is required, the
//! rest have sane defaults so the binary can be smoke-tested with a bare
//! shard map and no live OpenFlow collaborator.

use std::path::PathBuf;

use clap::Parser;
use hdds_sdn_core::topology::Cid;

#[derive(Debug, Parser)]
#[command(name = "hdds-sdn-controller", about = "SDN control-plane node for QoS-constrained IP multicast")]
pub struct ControllerArgs {
    /// This controller's shard id, must match an entry in `--config`.
    #[arg(long)]
    pub controller_id: Cid,

    /// TCP port the southbound (OpenFlow) collaborator connects to.
    #[arg(long, default_value_t = 6653)]
    pub ofp_tcp_listen_port: u16,

    /// Port a web dashboard would poll for status; accepted for CLI
    /// compatibility but unused (the dashboard itself is out of scope).
    #[arg(long, default_value_t = 8080)]
    pub wsapi_port: u16,

    /// Enables the overlay's links topic and LLDP-driven link discovery
    /// path on the southbound side.
    #[arg(long, default_value_t = false)]
    pub observe_links: bool,

    /// Path to the `cid -> {dpid}` shard map TOML file (spec §3/§6).
    #[arg(long)]
    pub config: PathBuf,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Resolved configuration the rest of the binary runs on, wrapping the raw
/// CLI args with the loaded shard map's overlay address for this cid.
pub struct ControllerConfig {
    pub args: ControllerArgs,
}

impl ControllerConfig {
    pub fn from_args(args: ControllerArgs) -> Self {
        Self { args }
    }

    pub fn self_cid(&self) -> Cid {
        self.args.controller_id
    }
}
