use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use keepsats_accounting::held_balances as aggregate_held;
use keepsats_infra::LedgerQuery;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

#[derive(Debug, Deserialize)]
pub struct HeldParams {
    /// Only customers with something still held.
    #[serde(default)]
    pub open: bool,
}

pub async fn held_balances(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<HeldParams>,
) -> axum::response::Response {
    let entries = match services.ledger.all_entries().await {
        Ok(entries) => entries,
        Err(e) => return errors::store_error_to_response(e),
    };
    let items = aggregate_held(&entries)
        .into_iter()
        .filter(|h| !params.open || !h.net_held.is_zero())
        .map(dto::held_balance_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

/// Entries matching the query string, newest first by default.
pub async fn list_entries(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<LedgerQuery>,
) -> axum::response::Response {
    match services.ledger.query(&query).await {
        Ok(items) => (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
