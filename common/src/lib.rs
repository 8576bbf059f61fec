pub mod config;
pub mod job;
pub mod results;
pub mod status;
pub mod task;
pub mod worker;

pub use config::{env_or, env_parse_or, QueueConfig};
pub use job::{new_job_id, JobId, JobRecord, JobState};
pub use results::{step_meta, JobValue, ProgressMeta};
pub use status::{EnqueueRequest, EnqueueResponse, ErrorResponse, JobStatusView};
pub use task::{
    Task, TaskAssignmentRequest, TaskAssignmentResponse, TaskCompleteRequest,
    TaskCompleteResponse, TaskOutcome, TaskProgressRequest,
};
pub use worker::{
    WorkerHeartbeatRequest, WorkerHeartbeatResponse, WorkerId, WorkerRegisterRequest,
    WorkerRegisterResponse, WorkerStats,
};

/// Nombre de la única computación que expone la API web.
pub const BACKGROUND_TASK: &str = "background_task";
