mod config;
mod error;
mod handlers;
mod jobs;
mod queue;

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ApiConfig;
use crate::handlers::ApiState;
use crate::queue::HttpTaskQueue;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("api=debug,tower_http=info")),
        )
        .init();

    let config = ApiConfig::from_env();
    info!(
        "broker={} result_backend={}",
        config.queue.broker_url, config.queue.result_backend_url
    );

    // un único cliente de la cola para todo el proceso
    let queue = Arc::new(HttpTaskQueue::connect(config.queue.clone()).await?);
    let app = handlers::build_router(ApiState {
        queue: queue.clone(),
    });

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("api escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("api apagándose");
        })
        .await?;

    queue.close();
    Ok(())
}
