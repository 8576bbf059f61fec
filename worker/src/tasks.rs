use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use common::{step_meta, JobState, JobValue, ProgressMeta, Task, TaskOutcome, BACKGROUND_TASK};
use serde::Deserialize;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::config::ExecutionSettings;

/// Adónde publica un job su progreso mientras corre.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn update_state(&self, state: JobState, meta: ProgressMeta) -> Result<()>;
}

const DEFAULT_STEPS: u64 = 2;

fn default_steps() -> u64 {
    DEFAULT_STEPS
}

#[derive(Debug, Deserialize)]
struct BackgroundArgs {
    a: i64,
    b: i64,
    #[serde(default = "default_steps")]
    steps: u64,
}

/// Computación de ejemplo: publica `PROGRESS {current, total}` en cada paso
/// y devuelve `a + b`.
pub async fn background_task(
    args: &serde_json::Value,
    progress: &dyn ProgressSink,
    step_delay: Duration,
) -> Result<JobValue> {
    let args: BackgroundArgs = serde_json::from_value(args.clone())
        .context("argumentos inválidos para background_task")?;

    let total = args.steps;
    for current in 1..=total {
        // el progreso es sólo informativo: si no llega, el job sigue
        if let Err(e) = progress
            .update_state(JobState::progress("PROGRESS"), step_meta(current, total))
            .await
        {
            warn!("no se pudo publicar progreso {}/{}: {:#}", current, total, e);
        }
        sleep(step_delay).await;
    }

    let sum = args
        .a
        .checked_add(args.b)
        .ok_or_else(|| anyhow!("overflow sumando {} + {}", args.a, args.b))?;
    Ok(JobValue::from(sum))
}

/// Despacha por nombre a la computación registrada.
pub async fn run_task(
    task: &Task,
    progress: &dyn ProgressSink,
    settings: &ExecutionSettings,
) -> Result<JobValue> {
    match task.name.as_str() {
        BACKGROUND_TASK => background_task(&task.args, progress, settings.step_delay).await,
        other => bail!("tarea no registrada: {other}"),
    }
}

/// Corre el job con el límite de tiempo configurado. Todo error termina en
/// `Failure` con su texto; nunca se devuelve un éxito vacío.
pub async fn execute(
    task: &Task,
    progress: &dyn ProgressSink,
    settings: &ExecutionSettings,
) -> TaskOutcome {
    let limit = settings.time_limit();
    match timeout(limit, run_task(task, progress, settings)).await {
        Ok(Ok(value)) => {
            info!("job {} terminó: {}", task.job_id, value);
            TaskOutcome::Success { value }
        }
        Ok(Err(e)) => {
            warn!("job {} falló: {:#}", task.job_id, e);
            TaskOutcome::Failure {
                error: format!("{e:#}"),
            }
        }
        Err(_) => {
            warn!("job {} superó el límite de {:?}", task.job_id, limit);
            TaskOutcome::Failure {
                error: format!(
                    "TimeLimitExceeded: job exceeded execution_time_limit_seconds={}",
                    settings.execution_time_limit_seconds
                ),
            }
        }
    }
}
