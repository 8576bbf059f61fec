use std::time::Duration;

use common::{env_parse_or, QueueConfig};

const DEFAULT_WORKER_CONCURRENCY: u32 = 2;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_EXECUTION_TIME_LIMIT_SECONDS: u64 = 3_600;
const DEFAULT_TASK_STEP_DELAY_MS: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub broker_url: String,
    pub max_concurrency: u32,
    pub heartbeat_interval: Duration,
    /// Espera entre pedidos cuando la cola está vacía
    pub poll_interval: Duration,
    pub execution: ExecutionSettings,
}

/// Cómo se ejecuta cada job dentro del worker.
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Pasado este tiempo el job se aborta y se reporta FAILED.
    pub execution_time_limit_seconds: u64,
    /// Pausa entre pasos de progreso de `background_task`
    pub step_delay: Duration,
}

impl ExecutionSettings {
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.execution_time_limit_seconds)
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            execution_time_limit_seconds: DEFAULT_EXECUTION_TIME_LIMIT_SECONDS,
            step_delay: Duration::from_millis(DEFAULT_TASK_STEP_DELAY_MS),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self {
            broker_url: QueueConfig::from_env().broker_url,
            max_concurrency: env_parse_or("WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY).max(1),
            heartbeat_interval: Duration::from_secs(
                env_parse_or("WORKER_HEARTBEAT_INTERVAL_SECS", DEFAULT_HEARTBEAT_INTERVAL_SECS)
                    .max(1),
            ),
            poll_interval: Duration::from_millis(env_parse_or(
                "WORKER_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )),
            execution: ExecutionSettings {
                execution_time_limit_seconds: env_parse_or(
                    "EXECUTION_TIME_LIMIT_SECONDS",
                    DEFAULT_EXECUTION_TIME_LIMIT_SECONDS,
                )
                .max(1),
                step_delay: Duration::from_millis(env_parse_or(
                    "TASK_STEP_DELAY_MS",
                    DEFAULT_TASK_STEP_DELAY_MS,
                )),
            },
        }
    }
}
