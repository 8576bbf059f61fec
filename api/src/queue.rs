use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{EnqueueRequest, EnqueueResponse, JobId, JobRecord, QueueConfig, WorkerStats};
use reqwest::{Client, StatusCode};
use tracing::{info, warn};

use crate::error::QueueError;

const BROKER_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Lo que la API necesita de la cola de tareas.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Encola una invocación; no espera a que arranque.
    async fn enqueue(&self, task: &str, args: serde_json::Value) -> Result<JobId, QueueError>;

    /// Estado actual del job; `None` si el backend no lo conoce.
    async fn job(&self, job_id: &str) -> Result<Option<JobRecord>, QueueError>;

    /// Estadísticas de los workers conectados en este momento.
    async fn worker_stats(&self) -> Result<Vec<WorkerStats>, QueueError>;
}

/// Cliente HTTP contra el broker.
pub struct HttpTaskQueue {
    client: Client,
    config: QueueConfig,
    closed: AtomicBool,
}

impl HttpTaskQueue {
    /// Arma el cliente y prueba el broker una vez. Un broker caído no impide
    /// arrancar: los jobs fallarán con 503 hasta que vuelva.
    pub async fn connect(config: QueueConfig) -> Result<Self, QueueError> {
        let client = Client::builder()
            .timeout(BROKER_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| QueueError::BrokerUnavailable(e.to_string()))?;

        let queue = Self {
            client,
            config,
            closed: AtomicBool::new(false),
        };

        match queue.ping().await {
            Ok(()) => info!("conectado al broker en {}", queue.config.broker_url),
            Err(e) => warn!(
                "el broker en {} no responde todavía: {}",
                queue.config.broker_url, e
            ),
        }
        Ok(queue)
    }

    pub async fn ping(&self) -> Result<(), QueueError> {
        self.ensure_open()?;
        let url = format!("{}/health", self.config.broker_url);
        let resp = self.client.get(&url).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(QueueError::BrokerUnavailable(format!(
                "health devolvió {}",
                resp.status()
            )))
        }
    }

    /// A partir de acá toda operación responde BrokerUnavailable.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("cliente de la cola cerrado");
        }
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::BrokerUnavailable("cliente cerrado".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for HttpTaskQueue {
    async fn enqueue(&self, task: &str, args: serde_json::Value) -> Result<JobId, QueueError> {
        self.ensure_open()?;
        let url = format!("{}/api/v1/jobs", self.config.broker_url);
        let resp = self
            .client
            .post(&url)
            .json(&EnqueueRequest {
                task: task.to_string(),
                args,
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(QueueError::BrokerUnavailable(format!(
                "el broker rechazó el job con {}",
                resp.status()
            )));
        }
        let EnqueueResponse { id } = resp.json().await?;
        Ok(id)
    }

    async fn job(&self, job_id: &str) -> Result<Option<JobRecord>, QueueError> {
        self.ensure_open()?;
        let url = format!("{}/api/v1/jobs/{}", self.config.result_backend_url, job_id);
        let resp = self.client.get(&url).send().await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(resp.json().await?)),
            s if s.is_server_error() => Err(QueueError::BrokerUnavailable(format!(
                "el backend de resultados devolvió {s}"
            ))),
            s => Err(QueueError::Protocol(format!(
                "el backend de resultados devolvió {s} para el job {job_id}"
            ))),
        }
    }

    async fn worker_stats(&self) -> Result<Vec<WorkerStats>, QueueError> {
        self.ensure_open()?;
        let url = format!("{}/api/v1/workers/stats", self.config.broker_url);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(QueueError::BrokerUnavailable(format!(
                "stats devolvió {}",
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }
}
