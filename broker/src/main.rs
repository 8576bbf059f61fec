mod config;
mod error;
mod handlers;
mod monitor;
mod state;

use crate::config::BrokerConfig;
use crate::state::AppState;
use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8081";
pub const WORKER_HEARTBEAT_TIMEOUT_SECS: u64 = 20;
pub const FAILOVER_SWEEP_INTERVAL_SECS: u64 = 5;
pub const RESULT_EXPIRES_SECS: u64 = 86_400;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("broker=debug,tower_http=info")),
        )
        .init();

    let config = BrokerConfig::from_env();
    let state = AppState::new();

    // router HTTP
    let app = handlers::build_router(state.clone());

    // monitor de heartbeats y expiración en segundo plano
    let monitor_state = state.clone();
    let monitor_config = config.clone();
    tokio::spawn(async move {
        monitor::monitor_workers(monitor_state, monitor_config).await;
    });

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("broker escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("broker apagándose");
        })
        .await?;
    Ok(())
}
