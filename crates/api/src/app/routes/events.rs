use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use keepsats_events::TrackedEvent;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Queue a tracked event for the dispatch workers. Redelivery is safe.
pub async fn submit_event(
    Extension(services): Extension<Arc<AppServices>>,
    Json(event): Json<TrackedEvent>,
) -> axum::response::Response {
    let accepted = dto::EventAccepted {
        event_id: event.event_id(),
        kind: event.kind(),
    };
    match services.events.send(event).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(accepted)).into_response(),
        Err(e) => errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "dispatch_closed", e.to_string()),
    }
}

pub async fn submit_quote(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::QuoteRequest>,
) -> axum::response::Response {
    match body.into_quote() {
        Ok(quote) => {
            services.quotes.record(quote.clone());
            (StatusCode::CREATED, Json(quote)).into_response()
        }
        Err(e) => errors::json_error(StatusCode::BAD_REQUEST, "invalid_quote", e.to_string()),
    }
}
