// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for the control plane (see spec §7).
//!
//! Hand-rolled enums rather than a derive-macro crate: every variant maps to
//! one of the handling strategies the orchestrator dispatches on (retry,
//! drop, warn, reroute, reschedule, or fatal exit), so matching on the
//! variant *is* the recovery policy.

use std::fmt;

/// Top-level error type returned by the core control-plane APIs.
#[derive(Debug)]
pub enum SdnError {
    /// Overlay read timeout, HTTP 5xx from the coordinator: retry with
    /// bounded backoff, never surfaced past the calling loop.
    TransientIo(String),
    /// A link/host referenced a switch/port that isn't in the store yet.
    /// Dropped silently; state transfer will redeliver the prerequisite.
    StaleReference(String),
    /// The heat-degree engine could not find a tree honoring all
    /// constraints; caller falls back to the best-effort Steiner tree on
    /// the raw graph.
    Infeasible { session: u64, reason: String },
    /// Overcommit was detected after install; a reroute has been queued.
    Overcommit { session: u64, edge: (u64, u64) },
    /// The southbound collaborator rejected a command (`OFPErrorMsg`).
    SouthboundRejected { dpid: u64, code: u32, kind: String },
    /// Two writers announced the same `cid` with different `writer_id`s.
    /// Fatal: the later one refuses to start.
    DuplicateCid { cid: i16 },
    /// Plain I/O failure not covered by the taxonomy above.
    Io(std::io::Error),
}

impl fmt::Display for SdnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientIo(msg) => write!(f, "transient I/O error: {msg}"),
            Self::StaleReference(msg) => write!(f, "stale reference: {msg}"),
            Self::Infeasible { session, reason } => {
                write!(f, "infeasible routing for session {session}: {reason}")
            }
            Self::Overcommit { session, edge } => write!(
                f,
                "bandwidth overcommit on edge {:?} used by session {session}",
                edge
            ),
            Self::SouthboundRejected { dpid, code, kind } => write!(
                f,
                "southbound rejection from dpid {dpid:016X}: {kind} (code {code})"
            ),
            Self::DuplicateCid { cid } => write!(f, "duplicate controller id {cid} on overlay"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for SdnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SdnError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Errors specific to the distance oracle (C2).
#[derive(Debug)]
pub enum OracleError {
    /// Update referenced a node never seen by the oracle.
    UnknownNode(u64),
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNode(n) => write!(f, "oracle has no labels for node {n}"),
        }
    }
}

impl std::error::Error for OracleError {}

impl From<OracleError> for SdnError {
    fn from(e: OracleError) -> Self {
        Self::StaleReference(e.to_string())
    }
}

/// Errors specific to the pub/sub overlay (C6).
#[derive(Debug)]
pub enum OverlayError {
    /// Message shorter than its fixed-width record layout.
    Truncated { topic: &'static str, have: usize, want: usize },
    /// Unknown `op` discriminant in a decoded record.
    BadOp { topic: &'static str, op: u8 },
    Io(std::io::Error),
}

impl fmt::Display for OverlayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { topic, have, want } => write!(
                f,
                "truncated {topic} record: have {have} bytes, need {want}"
            ),
            Self::BadOp { topic, op } => write!(f, "unknown op {op} on topic {topic}"),
            Self::Io(e) => write!(f, "overlay I/O error: {e}"),
        }
    }
}

impl std::error::Error for OverlayError {}

impl From<std::io::Error> for OverlayError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<OverlayError> for SdnError {
    fn from(e: OverlayError) -> Self {
        Self::TransientIo(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SdnError>;
