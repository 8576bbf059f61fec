use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::ErrorResponse;
use thiserror::Error;
use tracing::warn;

/// Mensaje fijo que ve el cliente cuando la cola no acepta trabajo.
pub const BROKER_UNAVAILABLE_MESSAGE: &str = "Celery is not available";

/// Mensaje cuando no se puede leer el estado de un job.
pub const RESULT_BACKEND_UNAVAILABLE_MESSAGE: &str = "Result backend is not available";

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("broker no disponible: {0}")]
    BrokerUnavailable(String),

    #[error("backend de resultados no disponible: {0}")]
    ResultBackendUnavailable(String),

    #[error("respuesta inesperada del broker: {0}")]
    Protocol(String),
}

impl QueueError {
    /// Un broker caído durante una lectura de estado es el backend de
    /// resultados el que falta.
    pub fn on_status_read(self) -> Self {
        match self {
            QueueError::BrokerUnavailable(detail) => QueueError::ResultBackendUnavailable(detail),
            other => other,
        }
    }
}

impl From<reqwest::Error> for QueueError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            QueueError::Protocol(e.to_string())
        } else {
            QueueError::BrokerUnavailable(e.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    InvalidBody(#[from] JsonRejection),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Queue(QueueError::BrokerUnavailable(detail)) => {
                warn!("cola de tareas no disponible: {}", detail);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    BROKER_UNAVAILABLE_MESSAGE.to_string(),
                )
            }
            ApiError::Queue(QueueError::ResultBackendUnavailable(detail)) => {
                warn!("backend de resultados no disponible: {}", detail);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    RESULT_BACKEND_UNAVAILABLE_MESSAGE.to_string(),
                )
            }
            ApiError::Queue(QueueError::Protocol(detail)) => {
                warn!("{}", detail);
                (StatusCode::BAD_GATEWAY, detail)
            }
            ApiError::InvalidBody(rejection) => (rejection.status(), rejection.body_text()),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}
