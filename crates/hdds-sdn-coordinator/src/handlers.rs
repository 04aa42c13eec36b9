// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP handlers for the coordinator's external interface (spec §6).

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hdds_sdn_core::overlay::wire::{LinkOpWire, LinkRecord};
use hdds_sdn_core::topology::{Cid, Dpid};
use serde::{Deserialize, Serialize};

use crate::state::CoordinatorState;

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[derive(Deserialize)]
pub struct CidQuery {
    cid: Cid,
}

/// `GET /enter?cid=<n>`
pub async fn enter(State(state): State<Arc<CoordinatorState>>, Query(q): Query<CidQuery>) -> StatusCode {
    state.mark_entered(q.cid);
    StatusCode::OK
}

/// `GET /leave?cid=<n>`
pub async fn leave(State(state): State<Arc<CoordinatorState>>, Query(q): Query<CidQuery>) -> StatusCode {
    state.mark_left(q.cid);
    StatusCode::OK
}

#[derive(Serialize)]
pub struct SwitchView {
    pub dpid: String,
    pub cid: Cid,
    pub port_count: u16,
}

fn dpid_hex(dpid: Dpid) -> String {
    format!("{dpid:016X}")
}

/// `GET /switches`
pub async fn switches(State(state): State<Arc<CoordinatorState>>) -> Json<Vec<SwitchView>> {
    let topology = state.topology.lock();
    let out = topology
        .switches
        .values()
        .map(|s| SwitchView { dpid: dpid_hex(s.dpid), cid: s.cid, port_count: s.port_count })
        .collect();
    Json(out)
}

#[derive(Serialize)]
pub struct LinkView {
    pub src_dpid: String,
    pub src_port_no: String,
    pub dst_dpid: String,
    pub dst_port_no: String,
}

fn port_hex(port_no: u16) -> String {
    format!("{port_no:08X}")
}

/// `GET /links` — filtered to links whose source switch's shard is
/// currently live (spec §6: "filtered by online shards").
pub async fn links(State(state): State<Arc<CoordinatorState>>) -> Json<Vec<LinkView>> {
    let topology = state.topology.lock();
    let out = topology
        .links
        .keys()
        .filter(|l| topology.switches.get(&l.src_dpid).map(|s| state.is_live(s.cid)).unwrap_or(false))
        .map(|l| LinkView {
            src_dpid: dpid_hex(l.src_dpid),
            src_port_no: port_hex(l.src_port_no),
            dst_dpid: dpid_hex(l.dst_dpid),
            dst_port_no: port_hex(l.dst_port_no),
        })
        .collect();
    Json(out)
}

/// `GET /all_links` — binary-encoded list of every link regardless of
/// shard liveness, reusing the overlay's own `LinkRecord` codec: a u32
/// count followed by that many length-prefixed records.
pub async fn all_links(State(state): State<Arc<CoordinatorState>>) -> Response {
    let topology = state.topology.lock();
    let mut body = Vec::new();
    body.extend_from_slice(&(topology.links.len() as u32).to_le_bytes());
    for link in topology.links.keys() {
        let rec = LinkRecord {
            src_dpid: link.src_dpid as i64,
            src_port_no: link.src_port_no as i16,
            dst_dpid: link.dst_dpid as i64,
            dst_port_no: link.dst_port_no as i16,
            op: LinkOpWire::Add,
        };
        let encoded = rec.encode();
        body.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        body.extend_from_slice(&encoded);
    }
    ([(header::CONTENT_TYPE, "application/octet-stream")], body).into_response()
}

/// `GET /trees?cid=<n>` — binary-encoded `(trees, session_table)` pending
/// for `cid` (spec §6). Encodes one entry per pending session: group
/// number, source dpid, receiver dpids, and the tree's edge list, all
/// length-prefixed the same way the overlay records are.
pub async fn trees(State(state): State<Arc<CoordinatorState>>, Query(q): Query<CidQuery>) -> Response {
    let pending_srcs: HashSet<Dpid> = state.pending.lock().pending_for(q.cid).into_iter().collect();
    let sessions = state.sessions.lock();
    let trees = state.trees();

    let mut body = Vec::new();
    let entries: Vec<_> = sessions.iter().filter(|s| pending_srcs.contains(&s.src_dpid)).collect();
    body.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for session in entries {
        body.extend_from_slice(&session.group_no.to_le_bytes());
        body.extend_from_slice(&(session.src_dpid as i64).to_le_bytes());
        body.extend_from_slice(&(session.receivers.len() as u16).to_le_bytes());
        for r in &session.receivers {
            body.extend_from_slice(&(*r as i64).to_le_bytes());
        }
        let edges: Vec<(Dpid, Dpid)> = trees.get(&session.src_dpid).map(|t| t.edges()).unwrap_or_default();
        body.extend_from_slice(&(edges.len() as u16).to_le_bytes());
        for (parent, child) in edges {
            body.extend_from_slice(&(parent as i64).to_le_bytes());
            body.extend_from_slice(&(child as i64).to_le_bytes());
        }
    }
    ([(header::CONTENT_TYPE, "application/octet-stream")], body).into_response()
}

#[derive(Deserialize)]
pub struct GroupRequest {
    pub src: Dpid,
    pub dst: Vec<Dpid>,
}

/// `POST /group_add` — creates a new session if `src` isn't already
/// registered, using unconstrained defaults for delay/bandwidth since the
/// wire body carries neither (spec §6 names only `{src, dst[]}`).
pub async fn group_add(State(state): State<Arc<CoordinatorState>>, Json(req): Json<GroupRequest>) -> StatusCode {
    let receivers: HashSet<Dpid> = req.dst.into_iter().collect();
    let created = state.sessions.lock().add_session(req.src, receivers, f64::MAX, 0.0).is_some();
    if !created {
        return StatusCode::CONFLICT;
    }
    state.resync();
    StatusCode::OK
}

/// `POST /group_mod` — replaces an existing session's receiver set.
pub async fn group_mod(State(state): State<Arc<CoordinatorState>>, Json(req): Json<GroupRequest>) -> StatusCode {
    let wanted: HashSet<Dpid> = req.dst.into_iter().collect();
    {
        let mut sessions = state.sessions.lock();
        let Some(current) = sessions.get(req.src).map(|s| s.receivers.clone()) else {
            return StatusCode::NOT_FOUND;
        };
        for added in wanted.difference(&current) {
            sessions.add_receiver(req.src, *added);
        }
        for removed in current.difference(&wanted) {
            sessions.remove_receiver(req.src, *removed);
        }
    }
    state.resync();
    StatusCode::OK
}
