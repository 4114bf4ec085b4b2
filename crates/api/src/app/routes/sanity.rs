use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::services::AppServices;

/// Last sanity run; `503` when it failed so monitors can alert on it.
pub async fn latest(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let results = services.latest_sanity().await;
    let status = if results.failed {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(results)).into_response()
}

pub async fn run_now(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let results = services.run_sanity().await;
    let status = if results.failed {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(results)).into_response()
}
