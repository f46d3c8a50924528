//! Dispatch API Module
//!
//! Technician responses to offers, plus the on-demand timeout sweep used by
//! operators and by deployments that drive the cadence externally.

mod handler;

use axum::{Router, routing::post};

use crate::core::ServerState;

/// Dispatch router
pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/dispatch", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/attempts/{id}/accept", post(handler::accept))
        .route("/attempts/{id}/decline", post(handler::decline))
        .route("/scan", post(handler::scan))
}
