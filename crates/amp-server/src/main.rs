mod api;
mod middleware;

use std::sync::Arc;

use amp_tracker::{MetricsSource, Tracker};
use amp_xapi::XApiClient;
use tracing_subscriber::EnvFilter;

use crate::{
    api::{build_app, default_rate_limit_state, AppState},
    middleware::AuthState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = amp_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = amp_db::PoolConfig::from_app_config(&config);
    let pool = amp_db::connect_pool(&config.database_url, pool_config).await?;
    amp_db::run_migrations(&pool).await?;

    let source: Option<Arc<dyn MetricsSource>> = match &config.x_bearer_token {
        Some(token) => Some(Arc::new(XApiClient::new(token, config.xapi_timeout_secs)?)),
        None => {
            tracing::warn!("X_BEARER_TOKEN not set; engagement tracking disabled");
            None
        }
    };
    let store = Arc::new(amp_db::PgStore::new(pool.clone()));
    let tracker = Tracker::new(store, source);
    tracker.start_scheduler().await;

    let auth = AuthState::from_env(matches!(config.env, amp_core::Environment::Development))?;
    let app = build_app(AppState { pool, tracker }, auth, default_rate_limit_state());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
