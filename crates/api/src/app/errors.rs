use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use keepsats_infra::LedgerStoreError;

pub fn store_error_to_response(err: LedgerStoreError) -> axum::response::Response {
    match err {
        LedgerStoreError::Duplicate { .. } => json_error(StatusCode::CONFLICT, "duplicate", err.to_string()),
        other => {
            tracing::error!(error = %other, "ledger store error");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "ledger store unavailable")
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
