use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::results::{JobValue, ProgressMeta};
use crate::worker::WorkerId;

pub type JobId = String;

/// Genera un id de job nuevo (nunca se reutiliza mientras viva el broker).
pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().to_string()
}

/// Estado de un job.
///
/// `PENDING -> RUNNING -> (progreso)* -> {SUCCEEDED, FAILED}`. Los estados de
/// progreso llevan el nombre que elija el worker (p.ej. `PROGRESS`); en el
/// wire se serializan todos como strings en mayúsculas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum JobState {
    Pending,
    Running,
    Progress(String),
    Succeeded,
    Failed,
}

impl JobState {
    pub fn progress(name: impl Into<String>) -> Self {
        JobState::from(name.into())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Running | JobState::Progress(_) => 1,
            JobState::Succeeded | JobState::Failed => 2,
        }
    }

    /// Un job sólo avanza: nunca vuelve a PENDING y nada sale de un estado
    /// terminal. Los estados de progreso se pueden repetir.
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        if self.is_terminal() || matches!(next, JobState::Pending) {
            return false;
        }
        next.rank() >= self.rank()
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Progress(name) => name,
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<JobState> for String {
    fn from(state: JobState) -> Self {
        state.as_str().to_string()
    }
}

impl From<String> for JobState {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "PENDING" => JobState::Pending,
            "RUNNING" => JobState::Running,
            "SUCCEEDED" => JobState::Succeeded,
            "FAILED" => JobState::Failed,
            _ => JobState::Progress(raw),
        }
    }
}

/// Lo que el broker guarda de cada job (backend de resultados).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Nombre de la computación registrada en el worker
    pub task: String,
    /// Argumentos tal cual llegaron del cliente
    pub args: serde_json::Value,
    pub state: JobState,

    /// Metadatos de progreso que publica el worker mientras corre
    #[serde(default)]
    pub meta: Option<ProgressMeta>,
    /// Sólo presente en SUCCEEDED
    #[serde(default)]
    pub result: Option<JobValue>,
    /// Sólo presente en FAILED
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub worker_id: Option<WorkerId>,

    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn pending(id: JobId, task: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id,
            task: task.into(),
            args,
            state: JobState::Pending,
            meta: None,
            result: None,
            error: None,
            worker_id: None,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}
