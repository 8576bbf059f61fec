use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobState};
use crate::results::{JobValue, ProgressMeta};
use crate::worker::WorkerId;

/// Invocación que el broker le entrega a un worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub job_id: JobId,
    /// Nombre de la computación registrada, ej: "background_task"
    pub name: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignmentRequest {
    pub worker_id: WorkerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignmentResponse {
    pub task: Option<Task>,
}

/// El worker publica RUNNING o un estado de progreso con nombre propio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgressRequest {
    pub worker_id: WorkerId,
    pub job_id: JobId,
    pub state: JobState,
    #[serde(default)]
    pub meta: Option<ProgressMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success { value: JobValue },
    Failure { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompleteRequest {
    pub worker_id: WorkerId,
    pub job_id: JobId,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompleteResponse {
    pub ok: bool,
}
