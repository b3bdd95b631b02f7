//! Printer readback API (DPI, material).

use axum::Json;
use axum::extract::State;
use labelprinter::{LabelPrinterError, Outcome, Query};
use serde::Deserialize;
use serde_json::json;

use super::{ApiResult, err_json, ok_json};
use crate::app::SharedState;
use crate::services::printer;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DpiRequest {
    /// Defaults to the configured paper type.
    pub paper_type: Option<u8>,
}

/// POST /api/printer/dpi
pub async fn read_dpi(
    State(state): State<SharedState>,
    body: Option<Json<DpiRequest>>,
) -> ApiResult {
    let paper_type = match body.and_then(|Json(b)| b.paper_type) {
        Some(paper_type) => paper_type,
        None => state.config().await.paper_type,
    };
    run_query(&state, Query::ReadDpi { paper_type }).await
}

/// POST /api/printer/material
pub async fn read_material(State(state): State<SharedState>) -> ApiResult {
    run_query(&state, Query::ReadMaterial).await
}

async fn run_query(state: &SharedState, query: Query) -> ApiResult {
    if let Some(job_id) = state.active_job_id().await {
        return Err(err_json(409, &format!("Printer is busy with job {job_id}")));
    }

    let (outcome, report) = printer::query(state, query).await.map_err(|e| match e {
        LabelPrinterError::Unsupported { .. } => err_json(400, &e.to_string()),
        _ => err_json(500, &e.to_string()),
    })?;

    match (outcome, report) {
        (Outcome::Success, Some(report)) => Ok(ok_json(json!({ "report": report }))),
        (Outcome::Success, None) => Err(err_json(404, "Printer reported no readback data")),
        (Outcome::Failure(kind), _) => Err(err_json(502, &kind.to_string())),
    }
}
