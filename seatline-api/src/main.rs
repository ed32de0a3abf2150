use std::net::SocketAddr;
use std::sync::Arc;

use seatline_api::{app, AppState};
use seatline_core::RefreshCoordinator;
use seatline_store::{DbClient, PgFlightStore, PgLagProvider, PgRefreshTrigger, PgSeatStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seatline_api=debug,seatline_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = seatline_store::app_config::Config::load()?;
    tracing::info!("Starting Seatline API on port {}", config.server.port);

    // Primary: bookings, seat locks and the replication status view
    let primary = DbClient::new(&config.database.url, config.database.max_connections).await?;
    primary.migrate().await?;

    // Replica: reporting views only
    let analytics = DbClient::new(&config.analytics.url, 2).await?;

    let trigger = PgRefreshTrigger::new(
        analytics.pool.clone(),
        &config.analytics.views,
        config.analytics.concurrently,
    )?;
    let lag = PgLagProvider::new(primary.pool.clone(), config.replication.application_name.clone());

    let refresh = RefreshCoordinator::spawn(Arc::new(lag), Arc::new(trigger), config.refresh.settings());

    let app_state = AppState::new(
        Arc::new(PgSeatStore::new(primary.pool.clone())),
        Arc::new(PgFlightStore::new(primary.pool.clone())),
        refresh,
    )?;

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
