use std::{env, str::FromStr};

pub const DEFAULT_BROKER_URL: &str = "http://127.0.0.1:8081";

/// Lee una variable de entorno; si no está definida (o está vacía) usa `default`.
pub fn env_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

/// Igual que `env_or` pero parseando el valor. Un valor inválido cae al default.
pub fn env_parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Dónde vive la cola de tareas.
/// - `broker_url`: alta de jobs y plano de control (stats de workers)
/// - `result_backend_url`: lectura de estado y resultados
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub broker_url: String,
    pub result_backend_url: String,
}

impl QueueConfig {
    /// `BROKER_URL` y `RESULT_BACKEND_URL`; el backend de resultados por
    /// defecto es el mismo broker.
    pub fn from_env() -> Self {
        let broker_url = env_or("BROKER_URL", DEFAULT_BROKER_URL);
        let result_backend_url = env_or("RESULT_BACKEND_URL", &broker_url);
        Self::new(broker_url, result_backend_url)
    }

    pub fn new(broker_url: impl Into<String>, result_backend_url: impl Into<String>) -> Self {
        Self {
            broker_url: trim_slash(broker_url.into()),
            result_backend_url: trim_slash(result_backend_url.into()),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BROKER_URL, DEFAULT_BROKER_URL)
    }
}

fn trim_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}
