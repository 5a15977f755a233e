use account_service::{
    build_router,
    config::AccountConfig,
    db,
    repositories::AccountRepository,
    services::{metrics::init_metrics, seed_admin, FirebaseIdentityProvider},
    store::postgres::PgStore,
    AppState,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    // Load configuration - fail fast if invalid
    let config = AccountConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;
    let metrics = init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting account service"
    );

    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    let store = PgStore::new(pool.clone(), Duration::from_millis(config.database.timeout_ms));
    let identity = FirebaseIdentityProvider::new(&config.identity)
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
    tracing::info!("Identity provider client initialized");

    let state = AppState::new(config.clone(), Arc::new(store), Arc::new(identity))
        .with_metrics(metrics);
    if let Some(seed) = &config.admin_seed {
        seed_admin(&AccountRepository::new(state.store.clone()), seed).await?;
    }
    let app = build_router(state)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let grace = Duration::from_secs(config.common.shutdown_grace_seconds);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(grace))
    .await?;

    pool.close().await;
    tracing::info!("Service shutdown complete");
    Ok(())
}

/// Resolves on SIGINT/SIGTERM. In-flight requests then get `grace` to finish
/// before the process exits regardless.
async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!(grace_seconds = grace.as_secs(), "Shutdown signal received, draining");

    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        tracing::warn!("Grace period elapsed, forcing exit");
        std::process::exit(0);
    });
}
