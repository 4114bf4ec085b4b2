use axum::{
    Router,
    routing::{get, post},
};

pub mod events;
pub mod ledger;
pub mod sanity;
pub mod system;

/// Router for every endpoint except `/health`.
pub fn router() -> Router {
    Router::new()
        .route("/ledger-types", get(system::list_ledger_types))
        .route("/ledger-types/:value", get(system::get_ledger_type))
        .route("/held", get(ledger::held_balances))
        .route("/entries", get(ledger::list_entries))
        .route("/sanity", get(sanity::latest).post(sanity::run_now))
        .route("/events", post(events::submit_event))
        .route("/quotes", post(events::submit_quote))
}
