use common::{env_or, QueueConfig};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5000";

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub listen_addr: String,
    pub queue: QueueConfig,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self {
            listen_addr: env_or("API_LISTEN_ADDR", DEFAULT_LISTEN_ADDR),
            queue: QueueConfig::from_env(),
        }
    }
}
