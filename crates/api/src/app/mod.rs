//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, locks, dispatcher, workers and sanity engine
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router().layer(Extension(services)))
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(crate::middleware::request_log)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use keepsats_infra::{Settings, WorkerPoolHandle};
    use tower::ServiceExt;

    use services::{Collaborators, build_services};

    async fn app() -> (Router, Arc<AppServices>, WorkerPoolHandle) {
        let (services, workers) = build_services(Settings::default(), Collaborators::default())
            .await
            .unwrap();
        (build_app(services.clone()), services, workers)
    }

    async fn json(res: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (app, _services, _workers) = app().await;
        let res = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ledger_type_lookup_falls_back_and_misses_cleanly() {
        let (app, _services, _workers) = app().await;

        let res = app
            .clone()
            .oneshot(Request::get("/ledger-types/HOLD_KEEPSATS").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json(res).await["value"], "HOLD_KEEPSATS");

        let res = app
            .clone()
            .oneshot(Request::get("/ledger-types/NOT_A_TYPE").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(res).await["error"], "not_found");

        let res = app
            .oneshot(Request::get("/ledger-types").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json(res).await;
        assert_eq!(
            body["items"].as_array().unwrap().len(),
            keepsats_accounting::LedgerType::ALL.len()
        );
    }

    #[tokio::test]
    async fn empty_ledger_is_sane() {
        let (app, services, _workers) = app().await;
        let res = app
            .oneshot(Request::get("/sanity").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json(res).await;
        assert_eq!(body["failed"], false);
        let names: Vec<_> = body["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, services.sanity.check_names());
        assert_eq!(names, ["balance_sheet", "held_balances", "hold_release_pairing"]);
    }

    #[tokio::test]
    async fn bad_quote_is_rejected() {
        let (app, services, _workers) = app().await;
        let res = app
            .oneshot(
                Request::post("/quotes")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"hive_usd":"0","hbd_usd":"1","btc_usd":"100000"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(services.quotes.is_empty());
    }
}
