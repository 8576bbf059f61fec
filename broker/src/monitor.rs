use std::time::SystemTime;

use tracing::debug;

use crate::config::BrokerConfig;
use crate::state::AppState;

/// Loop de mantenimiento del broker:
/// - detecta workers muertos (sin heartbeat) y falla sus jobs en vuelo
/// - borra resultados expirados y workers muertos hace mucho
pub async fn monitor_workers(state: AppState, config: BrokerConfig) {
    let mut ticker = tokio::time::interval(config.sweep_interval);
    loop {
        ticker.tick().await;

        let report = state.sweep(
            SystemTime::now(),
            config.heartbeat_timeout,
            config.result_expires,
        );
        debug!(
            "sweep: {} workers muertos, {} jobs perdidos, {} resultados expirados, {} workers olvidados",
            report.dead_workers.len(),
            report.lost_jobs.len(),
            report.expired_jobs.len(),
            report.pruned_workers.len()
        );
    }
}
