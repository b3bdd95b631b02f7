use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;

use super::api;
use crate::app::SharedState;

/// Create the axum router with all routes.
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        // --- Core ---
        .route("/status", get(status_handler))
        // --- Print jobs ---
        .route("/api/print", post(api::print::submit_print))
        .route("/api/print/stop", post(api::print::stop_print))
        .route("/api/print/queue", get(api::print::get_queue))
        // --- Readback ---
        .route("/api/printer/dpi", post(api::printer::read_dpi))
        .route("/api/printer/material", post(api::printer::read_material))
        // --- Middleware ---
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn status_handler(State(state): State<SharedState>) -> Json<Value> {
    let config = state.config().await;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "family": config.printer_family,
        "dry_run": config.dry_run_mode,
    }))
}
