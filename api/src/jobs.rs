//! Alta y consulta de jobs contra la cola de tareas.

use common::{JobId, JobStatusView, BACKGROUND_TASK};
use tracing::{debug, info, warn};

use crate::error::QueueError;
use crate::queue::TaskQueue;

/// Encola `background_task` con los argumentos tal cual llegaron. Devuelve el
/// id enseguida, haya o no workers conectados. Dos llamadas = dos jobs.
pub async fn submit(queue: &dyn TaskQueue, args: serde_json::Value) -> Result<JobId, QueueError> {
    let job_id = queue.enqueue(BACKGROUND_TASK, args).await?;
    info!("job {} enviado a la cola", job_id);
    Ok(job_id)
}

/// ¿Hay algún worker conectado ahora mismo? Cualquier error cuenta como "no".
pub async fn is_worker_awake(queue: &dyn TaskQueue) -> bool {
    match queue.worker_stats().await {
        Ok(stats) => !stats.is_empty(),
        Err(e) => {
            warn!("no se pudo consultar el plano de control: {}", e);
            false
        }
    }
}

/// Lee el estado del job. Nunca falla por culpa del job: un job que explotó
/// se reporta como FAILED con el diagnóstico en `info`.
pub async fn get_status(queue: &dyn TaskQueue, job_id: &str) -> Result<JobStatusView, QueueError> {
    let (record, worker_available) = tokio::join!(queue.job(job_id), is_worker_awake(queue));
    let record = record.map_err(QueueError::on_status_read)?;

    if record.is_none() {
        debug!("job {} desconocido o expirado, se reporta PENDING", job_id);
    }

    Ok(JobStatusView::assemble(
        job_id.to_string(),
        record.as_ref(),
        worker_available,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::fake::FakeQueue;
    use common::{step_meta, JobState, JobValue};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn submit_twice_gives_two_jobs() {
        let queue = FakeQueue::default();
        let a = submit(&queue, json!({"a": 1, "b": 2})).await.unwrap();
        let b = submit(&queue, json!({"a": 1, "b": 2})).await.unwrap();
        assert!(!a.is_empty());
        assert_ne!(a, b);
        assert_eq!(queue.job_count(), 2);
    }

    #[tokio::test]
    async fn submit_without_workers_still_returns_an_id() {
        let queue = FakeQueue::default();
        let id = submit(&queue, json!({})).await.unwrap();
        let status = get_status(&queue, &id).await.unwrap();
        assert_eq!(status.state, JobState::Pending);
        assert_eq!(status.value, None);
        assert!(!status.worker_available);
    }

    #[tokio::test]
    async fn broker_down_means_no_job() {
        let queue = FakeQueue::default();
        queue.set_broker_up(false);
        let err = submit(&queue, json!({})).await.unwrap_err();
        assert!(matches!(err, QueueError::BrokerUnavailable(_)));
        assert_eq!(queue.job_count(), 0);
    }

    #[tokio::test]
    async fn unreachable_backend_is_not_reported_as_pending() {
        let queue = FakeQueue::default();
        let id = submit(&queue, json!({})).await.unwrap();
        queue.set_broker_up(false);
        let err = get_status(&queue, &id).await.unwrap_err();
        assert!(matches!(err, QueueError::ResultBackendUnavailable(_)));
    }

    #[tokio::test]
    async fn worker_check_is_best_effort() {
        let queue = FakeQueue::default();
        queue.connect_worker("node-a");
        let id = submit(&queue, json!({})).await.unwrap();
        queue.succeed(&id, JobValue::from(3_i64));

        queue.control_plane_up.store(false, Ordering::SeqCst);
        let status = get_status(&queue, &id).await.unwrap();
        assert!(!status.worker_available);
        assert_eq!(status.state, JobState::Succeeded);
        assert_eq!(status.value, Some(JobValue::from(3_i64)));
    }

    #[tokio::test]
    async fn worker_availability_follows_connections() {
        let queue = FakeQueue::default();
        let id = submit(&queue, json!({})).await.unwrap();
        assert!(!get_status(&queue, &id).await.unwrap().worker_available);

        queue.connect_worker("node-a");
        assert!(get_status(&queue, &id).await.unwrap().worker_available);

        queue.disconnect_workers();
        assert!(!get_status(&queue, &id).await.unwrap().worker_available);
    }

    #[tokio::test]
    async fn progress_is_visible_while_running() {
        let queue = FakeQueue::default();
        let id = submit(&queue, json!({})).await.unwrap();
        queue.progress(&id, "PROGRESS", step_meta(2, 10));

        let status = get_status(&queue, &id).await.unwrap();
        assert_eq!(status.state, JobState::progress("PROGRESS"));
        assert_eq!(status.value, None);
        assert_eq!(status.info, r#"{"current":2,"total":10}"#);
    }

    #[tokio::test]
    async fn failure_is_data_not_an_error() {
        let queue = FakeQueue::default();
        let id = submit(&queue, json!({})).await.unwrap();
        queue.fail(&id, "ValueError: test");

        let status = get_status(&queue, &id).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.value, None);
        assert_eq!(status.info, "ValueError: test");
    }

    #[tokio::test]
    async fn terminal_reads_are_stable() {
        let queue = FakeQueue::default();
        let id = submit(&queue, json!({"a": 1, "b": 2})).await.unwrap();
        queue.succeed(&id, JobValue::from(3_i64));

        let first = get_status(&queue, &id).await.unwrap();
        for _ in 0..3 {
            let again = get_status(&queue, &id).await.unwrap();
            assert_eq!(again.state, first.state);
            assert_eq!(again.value, first.value);
        }
    }
}
