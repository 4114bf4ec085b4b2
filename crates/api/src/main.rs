use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::time::MissedTickBehavior;

use keepsats_api::app::build_app;
use keepsats_api::app::services::{AppServices, Collaborators, build_services};
use keepsats_infra::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    keepsats_observability::init();

    let config_path = std::env::var_os("KEEPSATS_CONFIG").map(PathBuf::from);
    let settings = Settings::load(config_path.as_deref()).context("loading settings")?;
    let addr = settings.http_addr.clone();
    let every = settings.sanity.interval().max(Duration::from_secs(1));

    let (services, workers) = build_services(settings, Collaborators::default())
        .await
        .context("wiring services")?;

    let sanity = tokio::spawn(scheduled_sanity(services.clone(), every));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, build_app(services))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sanity.abort();
    let stats = workers.shutdown().await;
    tracing::info!(?stats, "dispatch workers stopped");
    Ok(())
}

async fn scheduled_sanity(services: Arc<AppServices>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        services.run_sanity().await;
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
