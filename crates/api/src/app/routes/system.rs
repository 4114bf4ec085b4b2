use axum::{Json, extract::Path, http::StatusCode, response::IntoResponse};

use keepsats_accounting::{ledger_type_details_for_value, list_all};

use crate::app::errors;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn list_ledger_types() -> impl IntoResponse {
    Json(serde_json::json!({ "items": list_all() }))
}

pub async fn get_ledger_type(Path(value): Path<String>) -> axum::response::Response {
    match ledger_type_details_for_value(&value) {
        Some(details) => (StatusCode::OK, Json(details)).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("unknown ledger type {value}")),
    }
}
