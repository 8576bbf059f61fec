use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobRecord, JobState};
use crate::results::JobValue;

/// Alta de un job en el broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub task: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub id: JobId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Lo que ve el cliente de la API al consultar un job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: JobId,
    pub state: JobState,
    pub value: Option<JobValue>,
    pub worker_available: bool,
    /// Siempre texto, sea cual sea la forma del diagnóstico
    pub info: String,
}

impl JobStatusView {
    /// Arma la vista a partir de lo que tenga el backend. Un job que no
    /// existe (o cuyo resultado ya expiró) se reporta como PENDING.
    pub fn assemble(id: JobId, record: Option<&JobRecord>, worker_available: bool) -> Self {
        let Some(record) = record else {
            return Self {
                id,
                state: JobState::Pending,
                value: None,
                worker_available,
                info: String::new(),
            };
        };

        let value = match record.state {
            JobState::Succeeded => record.result.clone(),
            _ => None,
        };

        let info = match &record.state {
            JobState::Pending => String::new(),
            JobState::Succeeded => value.as_ref().map(|v| v.to_string()).unwrap_or_default(),
            JobState::Failed => record
                .error
                .clone()
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| "job failed without a diagnostic".to_string()),
            JobState::Running | JobState::Progress(_) => record
                .meta
                .as_ref()
                .and_then(|m| serde_json::to_string(m).ok())
                .unwrap_or_default(),
        };

        Self {
            id,
            state: record.state.clone(),
            value,
            worker_available,
            info,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::step_meta;
    use serde_json::json;

    fn record(state: JobState) -> JobRecord {
        let mut r = JobRecord::pending("job-1".into(), "background_task", json!({"a": 1, "b": 2}));
        r.state = state;
        r
    }

    #[test]
    fn unknown_job_reads_as_pending() {
        let view = JobStatusView::assemble("nope".into(), None, true);
        assert_eq!(view.state, JobState::Pending);
        assert_eq!(view.value, None);
        assert_eq!(view.info, "");
        assert!(view.worker_available);
    }

    #[test]
    fn success_exposes_value_and_text_info() {
        let mut r = record(JobState::Succeeded);
        r.result = Some(JobValue::from(3_i64));
        let view = JobStatusView::assemble(r.id.clone(), Some(&r), false);
        assert_eq!(view.value, Some(JobValue::from(3_i64)));
        assert_eq!(view.info, "3");

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["value"], json!(3));
        assert_eq!(json["state"], json!("SUCCEEDED"));
    }

    #[test]
    fn failure_never_exposes_a_value() {
        let mut r = record(JobState::Failed);
        r.result = Some(JobValue::from(99_i64));
        r.error = Some("ValueError: test".into());
        let view = JobStatusView::assemble(r.id.clone(), Some(&r), true);
        assert_eq!(view.value, None);
        assert_eq!(view.info, "ValueError: test");
    }

    #[test]
    fn failure_without_error_text_still_has_info() {
        let r = record(JobState::Failed);
        let view = JobStatusView::assemble(r.id.clone(), Some(&r), true);
        assert!(!view.info.is_empty());
    }

    #[test]
    fn progress_meta_is_rendered_as_json_text() {
        let mut r = record(JobState::progress("PROGRESS"));
        r.meta = Some(step_meta(1, 10));
        let view = JobStatusView::assemble(r.id.clone(), Some(&r), true);
        assert_eq!(view.value, None);
        assert_eq!(view.info, r#"{"current":1,"total":10}"#);
    }
}
