use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::{ErrorResponse, JobState};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("worker desconocido o muerto: {0}")]
    UnknownWorker(String),

    #[error("job desconocido: {0}")]
    UnknownJob(String),

    #[error("el job {0} no está en vuelo")]
    NotInFlight(String),

    #[error("el job {job_id} no pertenece al worker {worker_id}")]
    NotOwner { job_id: String, worker_id: String },

    #[error("{0} no es un estado de progreso válido")]
    InvalidProgressState(JobState),

    #[error("transición inválida {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },
}

impl BrokerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BrokerError::UnknownWorker(_) | BrokerError::UnknownJob(_) => StatusCode::NOT_FOUND,
            BrokerError::NotInFlight(_)
            | BrokerError::NotOwner { .. }
            | BrokerError::InvalidTransition { .. } => StatusCode::CONFLICT,
            BrokerError::InvalidProgressState(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}
