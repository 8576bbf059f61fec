use anyhow::Result;
use async_trait::async_trait;
use common::{
    JobId, JobState, ProgressMeta, Task, TaskAssignmentRequest, TaskAssignmentResponse,
    TaskCompleteRequest, TaskOutcome, TaskProgressRequest, WorkerHeartbeatRequest, WorkerId,
    WorkerRegisterRequest, WorkerRegisterResponse,
};
use reqwest::{Client, Response, StatusCode};
use thiserror::Error;

use crate::tasks::ProgressSink;

/// Cliente HTTP del worker contra el broker.
#[derive(Clone)]
pub struct BrokerClient {
    client: Client,
    base_url: String,
}

/// El broker contestó, pero con un status de error.
#[derive(Debug, Error)]
#[error("{what}: el broker devolvió {status}: {body}")]
pub struct BrokerRejected {
    pub what: &'static str,
    pub status: StatusCode,
    pub body: String,
}

/// Status con el que el broker rechazó el pedido; `None` si ni llegó a contestar.
pub fn rejection_status(e: &anyhow::Error) -> Option<StatusCode> {
    e.downcast_ref::<BrokerRejected>().map(|r| r.status)
}

/// 404 en heartbeat o tasks/next: el broker no conoce nuestro worker_id.
pub fn broker_forgot_us(e: &anyhow::Error) -> bool {
    rejection_status(e) == Some(StatusCode::NOT_FOUND)
}

async fn ok_or_bail(resp: Response, what: &'static str) -> Result<Response> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(BrokerRejected { what, status, body }.into());
    }
    Ok(resp)
}

impl BrokerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn register(&self, hostname: String, max_concurrency: u32) -> Result<WorkerId> {
        let url = format!("{}/api/v1/workers/register", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&WorkerRegisterRequest {
                hostname,
                max_concurrency,
            })
            .send()
            .await?;
        let WorkerRegisterResponse { worker_id } = ok_or_bail(resp, "register").await?.json().await?;
        Ok(worker_id)
    }

    pub async fn heartbeat(&self, worker_id: &str, cpu_percent: f32, mem_bytes: u64) -> Result<()> {
        let url = format!("{}/api/v1/workers/heartbeat", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&WorkerHeartbeatRequest {
                worker_id: worker_id.to_string(),
                cpu_percent,
                mem_bytes,
            })
            .send()
            .await?;
        ok_or_bail(resp, "heartbeat").await?;
        Ok(())
    }

    pub async fn next_task(&self, worker_id: &str) -> Result<Option<Task>> {
        let url = format!("{}/api/v1/tasks/next", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&TaskAssignmentRequest {
                worker_id: worker_id.to_string(),
            })
            .send()
            .await?;
        let assignment: TaskAssignmentResponse = ok_or_bail(resp, "tasks/next").await?.json().await?;
        Ok(assignment.task)
    }

    pub async fn progress(
        &self,
        worker_id: &str,
        job_id: &str,
        state: JobState,
        meta: ProgressMeta,
    ) -> Result<()> {
        let url = format!("{}/api/v1/tasks/progress", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&TaskProgressRequest {
                worker_id: worker_id.to_string(),
                job_id: job_id.to_string(),
                state,
                meta: Some(meta),
            })
            .send()
            .await?;
        ok_or_bail(resp, "tasks/progress").await?;
        Ok(())
    }

    pub async fn complete(&self, worker_id: &str, job_id: &str, outcome: TaskOutcome) -> Result<()> {
        let url = format!("{}/api/v1/tasks/complete", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&TaskCompleteRequest {
                worker_id: worker_id.to_string(),
                job_id: job_id.to_string(),
                outcome,
            })
            .send()
            .await?;
        ok_or_bail(resp, "tasks/complete").await?;
        Ok(())
    }
}

/// Progreso de un job concreto, publicado en el broker.
pub struct JobProgress {
    pub broker: BrokerClient,
    pub worker_id: WorkerId,
    pub job_id: JobId,
}

#[async_trait]
impl ProgressSink for JobProgress {
    async fn update_state(&self, state: JobState, meta: ProgressMeta) -> Result<()> {
        self.broker
            .progress(&self.worker_id, &self.job_id, state, meta)
            .await
    }
}
