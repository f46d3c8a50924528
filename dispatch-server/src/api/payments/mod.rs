//! Payment API Module
//!
//! Fund-hold lifecycle for confirmed quotes: authorize at confirmation,
//! release on abandon. Capture happens through the billing flow, not here.

mod handler;

use axum::{Router, routing::post};

use crate::core::ServerState;

/// Payment router
pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/payments", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/authorize", post(handler::authorize))
        .route("/{intervention_id}/cancel", post(handler::cancel))
}
