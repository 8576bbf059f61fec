use anyhow::Result;
use common::{TaskOutcome, WorkerId};
use std::{sync::Arc, time::Duration};
use sysinfo::{CpuExt, System, SystemExt};
use tokio::sync::{RwLock, Semaphore};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::broker::{broker_forgot_us, rejection_status, BrokerClient, JobProgress};
use crate::config::WorkerConfig;
use crate::tasks;

const REGISTER_RETRY: Duration = Duration::from_secs(2);
const COMPLETE_RETRY_INITIAL: Duration = Duration::from_millis(500);
const COMPLETE_RETRY_MAX: Duration = Duration::from_secs(30);

/// Identidad del worker frente al broker. Si el broker la olvida (se reinició
/// o lo dio por muerto hace rato) el worker se registra de nuevo.
pub struct Session {
    broker: BrokerClient,
    hostname: String,
    max_concurrency: u32,
    worker_id: RwLock<WorkerId>,
}

impl Session {
    pub async fn register(broker: BrokerClient, hostname: String, max_concurrency: u32) -> Self {
        let worker_id = register_until_ok(&broker, &hostname, max_concurrency).await;
        Self {
            broker,
            hostname,
            max_concurrency,
            worker_id: RwLock::new(worker_id),
        }
    }

    pub async fn worker_id(&self) -> WorkerId {
        self.worker_id.read().await.clone()
    }

    /// Se registra de nuevo sólo si `stale` sigue siendo el id vigente: el
    /// heartbeat y el loop de jobs pueden notar el 404 a la vez.
    pub async fn reregister(&self, stale: &str) -> WorkerId {
        let mut current = self.worker_id.write().await;
        if *current == stale {
            warn!("el broker no reconoce al worker {}, registrando de nuevo", stale);
            *current = register_until_ok(&self.broker, &self.hostname, self.max_concurrency).await;
            info!("worker {} re-registrado como {}", stale, *current);
        }
        current.clone()
    }
}

/// Loop principal del worker.
/// - Se registra en el broker (reintenta hasta que el broker responda).
/// - Hace heartbeats periódicos con CPU/MEM.
/// - Pide jobs mientras tenga "slots" libres.
/// - Ejecuta cada job en paralelo (hasta max_concurrency).
pub async fn run(config: WorkerConfig) -> Result<()> {
    let broker = BrokerClient::new(config.broker_url.clone());

    let hostname = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let session = Arc::new(Session::register(broker.clone(), hostname, config.max_concurrency).await);
    info!(
        "worker {} registrado con concurrency={} contra {}",
        session.worker_id().await,
        config.max_concurrency,
        broker.base_url()
    );

    tokio::spawn(heartbeat_loop(session.clone(), config.heartbeat_interval));

    let sem = Arc::new(Semaphore::new(config.max_concurrency as usize));

    loop {
        // --------- Control de concurrencia local ---------
        let permit = match sem.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return Ok(()), // semáforo cerrado
        };

        let worker_id = session.worker_id().await;
        let task = match broker.next_task(&worker_id).await {
            Ok(task) => task,
            Err(e) if broker_forgot_us(&e) => {
                drop(permit);
                session.reregister(&worker_id).await;
                continue;
            }
            Err(e) => {
                warn!("no se pudo pedir job al broker: {:#}", e);
                drop(permit);
                sleep(config.poll_interval).await;
                continue;
            }
        };

        let Some(task) = task else {
            // No hay job: devolvemos el permiso y dormimos
            drop(permit);
            sleep(config.poll_interval).await;
            continue;
        };

        info!("tengo job {} (task={})", task.job_id, task.name);

        let broker_cloned = broker.clone();
        let settings = config.execution.clone();

        tokio::spawn(async move {
            // el job se reporta con el id con el que se asignó
            let progress = JobProgress {
                broker: broker_cloned.clone(),
                worker_id: worker_id.clone(),
                job_id: task.job_id.clone(),
            };

            let outcome = tasks::execute(&task, &progress, &settings).await;
            report_outcome(
                &broker_cloned,
                &worker_id,
                &task.job_id,
                outcome,
                COMPLETE_RETRY_INITIAL,
            )
            .await;

            // Liberar el "slot" de concurrencia al terminar
            drop(permit);
        });
    }
}

/// Reporta el resultado hasta que el broker lo acepte, con backoff
/// exponencial. Un 4xx quiere decir que el job ya no es nuestro (se dio por
/// perdido o el broker se reinició) y no se insiste. Devuelve si fue aceptado.
pub async fn report_outcome(
    broker: &BrokerClient,
    worker_id: &str,
    job_id: &str,
    outcome: TaskOutcome,
    first_backoff: Duration,
) -> bool {
    let mut backoff = first_backoff;
    loop {
        match broker.complete(worker_id, job_id, outcome.clone()).await {
            Ok(()) => return true,
            Err(e) if rejection_status(&e).is_some_and(|s| s.is_client_error()) => {
                warn!("el broker rechazó el fin del job {}: {:#}", job_id, e);
                return false;
            }
            Err(e) => {
                warn!(
                    "no se pudo reportar el fin del job {} ({:#}), reintentando en {:?}",
                    job_id, e, backoff
                );
                sleep(backoff).await;
                backoff = (backoff * 2).min(COMPLETE_RETRY_MAX);
            }
        }
    }
}

async fn register_until_ok(broker: &BrokerClient, hostname: &str, max_concurrency: u32) -> WorkerId {
    loop {
        match broker.register(hostname.to_string(), max_concurrency).await {
            Ok(id) => return id,
            Err(e) => {
                warn!(
                    "no se pudo registrar en {} ({:#}), reintentando en {:?}",
                    broker.base_url(),
                    e,
                    REGISTER_RETRY
                );
                sleep(REGISTER_RETRY).await;
            }
        }
    }
}

async fn send_heartbeat(session: &Session, cpu_percent: f32, mem_bytes: u64) {
    let worker_id = session.worker_id().await;
    match session.broker.heartbeat(&worker_id, cpu_percent, mem_bytes).await {
        Ok(()) => {}
        Err(e) if broker_forgot_us(&e) => {
            session.reregister(&worker_id).await;
        }
        Err(e) => warn!("heartbeat de {} falló: {:#}", worker_id, e),
    }
}

async fn heartbeat_loop(session: Arc<Session>, every: Duration) {
    // System para leer CPU y memoria
    let mut sys = System::new_all();
    let mut ticker = tokio::time::interval(every);

    loop {
        ticker.tick().await;
        sys.refresh_cpu();
        sys.refresh_memory();

        let cpu_percent = sys.global_cpu_info().cpu_usage();
        let mem_bytes = sys.used_memory();

        send_heartbeat(&session, cpu_percent, mem_bytes).await;
    }
}
