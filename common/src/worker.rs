use serde::{Deserialize, Serialize};

pub type WorkerId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegisterRequest {
    pub hostname: String,
    pub max_concurrency: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegisterResponse {
    pub worker_id: WorkerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeatRequest {
    pub worker_id: WorkerId,
    pub cpu_percent: f32,
    pub mem_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeatResponse {
    pub ok: bool,
}

/// Estadísticas del plano de control: una entrada por worker vivo.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkerStats {
    pub worker_id: WorkerId,
    pub hostname: String,
    pub max_concurrency: u32,
    pub last_heartbeat_secs_ago: u64,
    pub active_jobs: u32,
    pub jobs_started: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub last_cpu_percent: Option<f32>,
    pub last_mem_bytes: Option<u64>,
}
