//! Intervention API Module
//!
//! Client-facing lifecycle: submission (which starts the offer chain),
//! detail lookup, cancellation and technician status progression.

mod handler;

use axum::{
    Router,
    routing::{get, post},
};

use crate::core::ServerState;

/// Intervention router
pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/interventions", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        // Submit a request; dispatch starts immediately
        .route("/", post(handler::create))
        // Intervention with its full offer history
        .route("/{id}", get(handler::get_by_id))
        // Client-side abandon; also releases any open payment hold
        .route("/{id}/cancel", post(handler::cancel))
        // Technician-driven status progression
        .route("/{id}/status", post(handler::progress))
}
