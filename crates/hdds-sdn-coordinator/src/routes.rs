// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Route table for the coordinator HTTP surface (spec §6). The dashboard
//! and any other web UI are out of scope (spec §1): this binary only
//! exposes the JSON/binary endpoints shards pull their work through.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::CoordinatorState;

pub fn api_routes() -> Router<Arc<CoordinatorState>> {
    Router::new()
        .route("/enter", get(handlers::enter))
        .route("/leave", get(handlers::leave))
        .route("/switches", get(handlers::switches))
        .route("/links", get(handlers::links))
        .route("/all_links", get(handlers::all_links))
        .route("/trees", get(handlers::trees))
        .route("/group_add", post(handlers::group_add))
        .route("/group_mod", post(handlers::group_mod))
}
