use std::time::Duration;

use common::{env_or, env_parse_or};

use crate::{
    DEFAULT_LISTEN_ADDR, FAILOVER_SWEEP_INTERVAL_SECS, RESULT_EXPIRES_SECS,
    WORKER_HEARTBEAT_TIMEOUT_SECS,
};

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub listen_addr: String,
    /// Sin heartbeat durante este tiempo => worker muerto
    pub heartbeat_timeout: Duration,
    pub sweep_interval: Duration,
    /// Cuánto se guardan los resultados de jobs terminados
    pub result_expires: Duration,
}

impl BrokerConfig {
    pub fn from_env() -> Self {
        Self {
            listen_addr: env_or("BROKER_LISTEN_ADDR", DEFAULT_LISTEN_ADDR),
            heartbeat_timeout: Duration::from_secs(env_parse_or(
                "WORKER_HEARTBEAT_TIMEOUT_SECS",
                WORKER_HEARTBEAT_TIMEOUT_SECS,
            )),
            sweep_interval: Duration::from_secs(
                env_parse_or("FAILOVER_SWEEP_INTERVAL_SECS", FAILOVER_SWEEP_INTERVAL_SECS).max(1),
            ),
            result_expires: Duration::from_secs(env_parse_or(
                "RESULT_EXPIRES_SECS",
                RESULT_EXPIRES_SECS,
            )),
        }
    }
}
