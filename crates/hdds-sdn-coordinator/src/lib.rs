// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Library half of the coordinator binary, split out so integration tests
//! can drive the real HTTP surface (spec §6) without going through the
//! CLI entry point.

pub mod handlers;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::CoordinatorState;

/// Builds the coordinator's full axum [`Router`] over a shared
/// [`CoordinatorState`] (spec §6's eight endpoints). Southbound
/// collaborators and shard controllers are untrusted-origin peers on a
/// LAN control network, not browsers, so CORS is wide open rather than
/// modeled per spec's non-goal on peer authentication.
pub fn build_app(state: Arc<CoordinatorState>) -> Router {
    routes::api_routes()
        .with_state(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}
