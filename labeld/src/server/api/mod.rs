//! REST API handlers grouped by domain.

pub mod print;
pub mod printer;

use axum::Json;
use axum::http::StatusCode;
use serde_json::{Value, json};

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

/// Standard success response.
pub fn ok_json(data: Value) -> Json<Value> {
    Json(json!({ "status": "ok", "data": data }))
}

/// Standard error response.
pub fn err_json(status: u16, message: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(json!({ "status": "error", "error": message })),
    )
}
