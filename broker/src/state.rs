// broker/src/state.rs

use chrono::{DateTime, Utc};
use common::{
    new_job_id, JobId, JobRecord, JobState, Task, TaskCompleteRequest, TaskOutcome,
    TaskProgressRequest, WorkerId, WorkerStats,
};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime},
};
use tracing::{info, warn};

use crate::error::BrokerError;

/// Un mutex envenenado no invalida el estado: seguimos usándolo.
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct AppState {
    // backend de resultados: todos los jobs conocidos
    pub jobs: Arc<Mutex<HashMap<JobId, JobRecord>>>,
    // jobs pendientes de asignar, en orden de llegada
    pub pending: Arc<Mutex<VecDeque<JobId>>>,
    // jobs ya asignados pero no terminados
    pub in_flight: Arc<Mutex<HashMap<JobId, InFlight>>>,
    pub workers: Arc<Mutex<HashMap<WorkerId, WorkerMeta>>>,
}

#[derive(Debug, Clone)]
pub struct WorkerMeta {
    pub hostname: String,
    pub last_heartbeat: SystemTime,
    pub dead: bool,
    pub max_concurrency: u32,

    // Métricas
    pub jobs_started: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,

    pub last_cpu_percent: Option<f32>,
    pub last_mem_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct InFlight {
    pub worker_id: WorkerId,
    pub started_at: SystemTime,
}

/// Resultado de una pasada del monitor.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub dead_workers: Vec<WorkerId>,
    pub lost_jobs: Vec<JobId>,
    pub expired_jobs: Vec<JobId>,
    pub pruned_workers: Vec<WorkerId>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /* ---------------- jobs ---------------- */

    pub fn enqueue(&self, task: &str, args: serde_json::Value) -> JobId {
        let job_id = new_job_id();
        {
            let mut jobs = lock(&self.jobs);
            jobs.insert(job_id.clone(), JobRecord::pending(job_id.clone(), task, args));
        }
        lock(&self.pending).push_back(job_id.clone());
        info!("job {} encolado (task={})", job_id, task);
        job_id
    }

    pub fn job(&self, job_id: &str) -> Option<JobRecord> {
        lock(&self.jobs).get(job_id).cloned()
    }

    /* ---------------- workers ---------------- */

    pub fn register_worker(&self, hostname: String, max_concurrency: u32) -> WorkerId {
        let worker_id = uuid::Uuid::new_v4().to_string();
        lock(&self.workers).insert(
            worker_id.clone(),
            WorkerMeta {
                hostname,
                last_heartbeat: SystemTime::now(),
                dead: false,
                max_concurrency: max_concurrency.max(1),
                jobs_started: 0,
                jobs_succeeded: 0,
                jobs_failed: 0,
                last_cpu_percent: None,
                last_mem_bytes: None,
            },
        );
        info!(
            "worker registrado: {} (max_concurrency={})",
            worker_id, max_concurrency
        );
        worker_id
    }

    pub fn heartbeat(
        &self,
        worker_id: &str,
        cpu_percent: f32,
        mem_bytes: u64,
    ) -> Result<(), BrokerError> {
        let mut workers = lock(&self.workers);
        let meta = workers
            .get_mut(worker_id)
            .ok_or_else(|| BrokerError::UnknownWorker(worker_id.to_string()))?;

        if meta.dead {
            info!("worker {} volvió a dar señales de vida", worker_id);
            meta.dead = false;
        }
        meta.last_heartbeat = SystemTime::now();
        meta.last_cpu_percent = Some(cpu_percent);
        meta.last_mem_bytes = Some(mem_bytes);
        Ok(())
    }

    /// Estadísticas de los workers vivos (los muertos no cuentan).
    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        let now = SystemTime::now();

        let mut active_by_worker: HashMap<WorkerId, u32> = HashMap::new();
        for inf in lock(&self.in_flight).values() {
            *active_by_worker.entry(inf.worker_id.clone()).or_insert(0) += 1;
        }

        let workers = lock(&self.workers);
        let mut out: Vec<WorkerStats> = workers
            .iter()
            .filter(|(_, meta)| !meta.dead)
            .map(|(wid, meta)| WorkerStats {
                worker_id: wid.clone(),
                hostname: meta.hostname.clone(),
                max_concurrency: meta.max_concurrency,
                last_heartbeat_secs_ago: now
                    .duration_since(meta.last_heartbeat)
                    .unwrap_or_default()
                    .as_secs(),
                active_jobs: active_by_worker.get(wid).copied().unwrap_or(0),
                jobs_started: meta.jobs_started,
                jobs_succeeded: meta.jobs_succeeded,
                jobs_failed: meta.jobs_failed,
                last_cpu_percent: meta.last_cpu_percent,
                last_mem_bytes: meta.last_mem_bytes,
            })
            .collect();
        out.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        out
    }

    /* ---------------- ciclo de vida de un job ---------------- */

    /// Entrega el siguiente job pendiente si el worker tiene capacidad libre.
    pub fn assign_next(&self, worker_id: &str) -> Result<Option<Task>, BrokerError> {
        let max_for_worker = {
            let workers = lock(&self.workers);
            match workers.get(worker_id) {
                Some(meta) if !meta.dead => meta.max_concurrency,
                _ => return Err(BrokerError::UnknownWorker(worker_id.to_string())),
            }
        };

        let active_for_worker = lock(&self.in_flight)
            .values()
            .filter(|entry| entry.worker_id == worker_id)
            .count() as u32;

        if active_for_worker >= max_for_worker {
            info!(
                "worker {} pidió job pero ya tiene {}/{} en vuelo",
                worker_id, active_for_worker, max_for_worker
            );
            return Ok(None);
        }

        loop {
            let Some(job_id) = lock(&self.pending).pop_front() else {
                return Ok(None);
            };

            let task = {
                let mut jobs = lock(&self.jobs);
                let Some(job) = jobs.get_mut(&job_id) else {
                    // expiró mientras esperaba; seguimos con el siguiente
                    continue;
                };
                if job.state != JobState::Pending {
                    continue;
                }
                job.state = JobState::Running;
                job.worker_id = Some(worker_id.to_string());
                job.started_at = Some(Utc::now());
                Task {
                    job_id: job.id.clone(),
                    name: job.task.clone(),
                    args: job.args.clone(),
                }
            };

            lock(&self.in_flight).insert(
                job_id.clone(),
                InFlight {
                    worker_id: worker_id.to_string(),
                    started_at: SystemTime::now(),
                },
            );

            if let Some(meta) = lock(&self.workers).get_mut(worker_id) {
                meta.jobs_started += 1;
            }

            info!(
                "asignando job {} (task={}) al worker {} ({}/{} en vuelo -> +1)",
                job_id, task.name, worker_id, active_for_worker, max_for_worker
            );
            return Ok(Some(task));
        }
    }

    fn check_owner(&self, job_id: &str, worker_id: &str) -> Result<(), BrokerError> {
        let in_flight = lock(&self.in_flight);
        match in_flight.get(job_id) {
            Some(inf) if inf.worker_id == worker_id => Ok(()),
            Some(_) => Err(BrokerError::NotOwner {
                job_id: job_id.to_string(),
                worker_id: worker_id.to_string(),
            }),
            None => Err(BrokerError::NotInFlight(job_id.to_string())),
        }
    }

    pub fn record_progress(&self, req: TaskProgressRequest) -> Result<(), BrokerError> {
        if req.state.is_terminal() || req.state == JobState::Pending {
            return Err(BrokerError::InvalidProgressState(req.state));
        }
        self.check_owner(&req.job_id, &req.worker_id)?;

        let mut jobs = lock(&self.jobs);
        let job = jobs
            .get_mut(&req.job_id)
            .ok_or_else(|| BrokerError::UnknownJob(req.job_id.clone()))?;

        if !job.state.can_transition_to(&req.state) {
            return Err(BrokerError::InvalidTransition {
                from: job.state.clone(),
                to: req.state,
            });
        }

        job.state = req.state;
        if req.meta.is_some() {
            job.meta = req.meta;
        }
        Ok(())
    }

    pub fn complete(&self, req: TaskCompleteRequest) -> Result<(), BrokerError> {
        // sacar la entrada es lo que da derecho a escribir el resultado:
        // de dos completes (o complete + sweep) sólo uno la encuentra
        let inflight = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(&req.job_id) {
                Some(inf) if inf.worker_id == req.worker_id => {}
                Some(_) => {
                    return Err(BrokerError::NotOwner {
                        job_id: req.job_id.clone(),
                        worker_id: req.worker_id.clone(),
                    })
                }
                None => return Err(BrokerError::NotInFlight(req.job_id.clone())),
            }
            in_flight.remove(&req.job_id)
        };

        let succeeded = matches!(req.outcome, TaskOutcome::Success { .. });
        {
            let mut jobs = lock(&self.jobs);
            let job = jobs
                .get_mut(&req.job_id)
                .ok_or_else(|| BrokerError::UnknownJob(req.job_id.clone()))?;

            let target = if succeeded {
                JobState::Succeeded
            } else {
                JobState::Failed
            };
            if job.state.is_terminal() {
                return Err(BrokerError::InvalidTransition {
                    from: job.state.clone(),
                    to: target,
                });
            }

            match req.outcome {
                TaskOutcome::Success { value } => {
                    job.result = Some(value);
                }
                TaskOutcome::Failure { error } => {
                    warn!("job {} falló: {}", job.id, error);
                    job.error = Some(error);
                }
            }
            job.state = target;
            job.finished_at = Some(Utc::now());
        }

        let duration_ms = inflight
            .and_then(|i| i.started_at.elapsed().ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        if let Some(meta) = lock(&self.workers).get_mut(&req.worker_id) {
            if succeeded {
                meta.jobs_succeeded += 1;
            } else {
                meta.jobs_failed += 1;
            }
        }

        info!(
            "job {} terminado por worker {} (ok={}, {} ms)",
            req.job_id, req.worker_id, succeeded, duration_ms
        );
        Ok(())
    }

    /* ---------------- mantenimiento ---------------- */

    /// Una pasada de chequeo:
    /// 1. marca workers muertos (sin heartbeat hace más de `heartbeat_timeout`)
    /// 2. pasa a FAILED los jobs que tenían en vuelo
    /// 3. olvida workers muertos hace más de `result_expires`
    /// 4. borra resultados terminales más viejos que `result_expires`
    pub fn sweep(
        &self,
        now: SystemTime,
        heartbeat_timeout: Duration,
        result_expires: Duration,
    ) -> SweepReport {
        let mut report = SweepReport::default();

        {
            let mut workers = lock(&self.workers);
            for (worker_id, meta) in workers.iter_mut() {
                if meta.dead {
                    continue;
                }
                // last_heartbeat en el futuro cuenta como vivo
                if let Ok(elapsed) = now.duration_since(meta.last_heartbeat) {
                    if elapsed > heartbeat_timeout {
                        meta.dead = true;
                        warn!(
                            "marcando worker {} como DEAD (sin heartbeat hace {:?})",
                            worker_id, elapsed
                        );
                        report.dead_workers.push(worker_id.clone());
                    }
                }
            }
        }

        if !report.dead_workers.is_empty() {
            let mut lost: Vec<(JobId, WorkerId)> = Vec::new();
            lock(&self.in_flight).retain(|job_id, inflight| {
                if report.dead_workers.contains(&inflight.worker_id) {
                    lost.push((job_id.clone(), inflight.worker_id.clone()));
                    false
                } else {
                    true
                }
            });

            let mut jobs = lock(&self.jobs);
            for (job_id, worker_id) in lost {
                if let Some(job) = jobs.get_mut(&job_id) {
                    if job.state.is_terminal() {
                        continue;
                    }
                    warn!("job {} perdido junto con el worker {}", job_id, worker_id);
                    job.state = JobState::Failed;
                    job.error = Some(format!(
                        "WorkerLost: worker {worker_id} stopped sending heartbeats"
                    ));
                    job.finished_at = Some(DateTime::<Utc>::from(now));
                    report.lost_jobs.push(job_id);
                }
            }
        }

        // workers muertos hace más que la retención de resultados se olvidan;
        // si vuelven, su heartbeat recibe 404 y se registran de nuevo
        lock(&self.workers).retain(|worker_id, meta| {
            let forgotten = meta.dead
                && now
                    .duration_since(meta.last_heartbeat)
                    .map(|age| age > heartbeat_timeout + result_expires)
                    .unwrap_or(false);
            if forgotten {
                report.pruned_workers.push(worker_id.clone());
            }
            !forgotten
        });
        if !report.pruned_workers.is_empty() {
            info!("{} workers muertos olvidados", report.pruned_workers.len());
        }

        lock(&self.jobs).retain(|job_id, job| {
            let expired = job.state.is_terminal()
                && job
                    .finished_at
                    .and_then(|t| now.duration_since(SystemTime::from(t)).ok())
                    .map(|age| age > result_expires)
                    .unwrap_or(false);
            if expired {
                report.expired_jobs.push(job_id.clone());
            }
            !expired
        });
        if !report.expired_jobs.is_empty() {
            info!("{} resultados expirados", report.expired_jobs.len());
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{step_meta, JobValue};
    use serde_json::json;

    fn progress(worker_id: &str, job_id: &str, state: JobState) -> TaskProgressRequest {
        TaskProgressRequest {
            worker_id: worker_id.into(),
            job_id: job_id.into(),
            state,
            meta: Some(step_meta(1, 10)),
        }
    }

    fn complete(worker_id: &str, job_id: &str, outcome: TaskOutcome) -> TaskCompleteRequest {
        TaskCompleteRequest {
            worker_id: worker_id.into(),
            job_id: job_id.into(),
            outcome,
        }
    }

    #[test]
    fn enqueue_creates_distinct_pending_jobs() {
        let state = AppState::new();
        let a = state.enqueue("background_task", json!({"a": 1, "b": 2}));
        let b = state.enqueue("background_task", json!({"a": 1, "b": 2}));
        assert_ne!(a, b);
        assert_eq!(state.job(&a).unwrap().state, JobState::Pending);
        assert_eq!(lock(&state.pending).len(), 2);
    }

    #[test]
    fn assignment_respects_fifo_and_concurrency() {
        let state = AppState::new();
        let w = state.register_worker("host".into(), 1);
        let first = state.enqueue("background_task", json!({}));
        let second = state.enqueue("background_task", json!({}));

        let task = state.assign_next(&w).unwrap().unwrap();
        assert_eq!(task.job_id, first);
        assert_eq!(state.job(&first).unwrap().state, JobState::Running);

        // sin slots libres
        assert!(state.assign_next(&w).unwrap().is_none());
        assert_eq!(state.job(&second).unwrap().state, JobState::Pending);
    }

    #[test]
    fn unknown_worker_cannot_take_jobs() {
        let state = AppState::new();
        state.enqueue("background_task", json!({}));
        assert!(matches!(
            state.assign_next("ghost"),
            Err(BrokerError::UnknownWorker(_))
        ));
    }

    #[test]
    fn full_lifecycle_to_success() {
        let state = AppState::new();
        let w = state.register_worker("host".into(), 2);
        let id = state.enqueue("background_task", json!({"a": 1, "b": 2}));
        state.assign_next(&w).unwrap();

        state
            .record_progress(progress(&w, &id, JobState::progress("PROGRESS")))
            .unwrap();
        let job = state.job(&id).unwrap();
        assert_eq!(job.state, JobState::progress("PROGRESS"));
        assert_eq!(job.meta, Some(step_meta(1, 10)));

        state
            .complete(complete(&w, &id, TaskOutcome::Success { value: JobValue::from(3_i64) }))
            .unwrap();
        let job = state.job(&id).unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.result, Some(JobValue::from(3_i64)));
        assert!(job.finished_at.is_some());
        assert!(lock(&state.in_flight).is_empty());

        let stats = state.worker_stats();
        assert_eq!(stats[0].jobs_succeeded, 1);
        assert_eq!(stats[0].active_jobs, 0);
    }

    #[test]
    fn terminal_jobs_reject_further_updates() {
        let state = AppState::new();
        let w = state.register_worker("host".into(), 1);
        let id = state.enqueue("background_task", json!({}));
        state.assign_next(&w).unwrap();
        state
            .complete(complete(&w, &id, TaskOutcome::Failure { error: "boom".into() }))
            .unwrap();

        assert!(state
            .record_progress(progress(&w, &id, JobState::Running))
            .is_err());
        assert!(state
            .complete(complete(&w, &id, TaskOutcome::Success { value: JobValue::from(1_i64) }))
            .is_err());

        let job = state.job(&id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert_eq!(job.result, None);
    }

    #[test]
    fn progress_cannot_claim_terminal_or_pending() {
        let state = AppState::new();
        let w = state.register_worker("host".into(), 1);
        let id = state.enqueue("background_task", json!({}));
        state.assign_next(&w).unwrap();

        for bad in [JobState::Succeeded, JobState::Failed, JobState::Pending] {
            assert!(matches!(
                state.record_progress(progress(&w, &id, bad)),
                Err(BrokerError::InvalidProgressState(_))
            ));
        }
        assert_eq!(state.job(&id).unwrap().state, JobState::Running);
    }

    #[test]
    fn only_the_owner_reports_on_a_job() {
        let state = AppState::new();
        let owner = state.register_worker("a".into(), 1);
        let other = state.register_worker("b".into(), 1);
        let id = state.enqueue("background_task", json!({}));
        state.assign_next(&owner).unwrap();

        assert!(matches!(
            state.complete(complete(&other, &id, TaskOutcome::Success { value: JobValue::from(1_i64) })),
            Err(BrokerError::NotOwner { .. })
        ));
        assert_eq!(state.job(&id).unwrap().state, JobState::Running);
    }

    #[test]
    fn sweep_fails_jobs_of_dead_workers() {
        let state = AppState::new();
        let w = state.register_worker("host".into(), 1);
        let id = state.enqueue("background_task", json!({}));
        state.assign_next(&w).unwrap();

        let later = SystemTime::now() + Duration::from_secs(60);
        let report = state.sweep(later, Duration::from_secs(20), Duration::from_secs(86_400));

        assert_eq!(report.dead_workers, vec![w.clone()]);
        assert_eq!(report.lost_jobs, vec![id.clone()]);
        let job = state.job(&id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.error.unwrap().starts_with("WorkerLost"));
        assert!(state.worker_stats().is_empty());

        // el heartbeat lo revive
        state.heartbeat(&w, 1.0, 1024).unwrap();
        assert_eq!(state.worker_stats().len(), 1);
    }

    #[test]
    fn sweep_expires_old_terminal_results_only() {
        let state = AppState::new();
        let w = state.register_worker("host".into(), 2);
        let done = state.enqueue("background_task", json!({}));
        let waiting = state.enqueue("background_task", json!({}));
        state.assign_next(&w).unwrap();
        state
            .complete(complete(&w, &done, TaskOutcome::Success { value: JobValue::from(3_i64) }))
            .unwrap();
        state.heartbeat(&w, 0.0, 0).unwrap();

        let report = state.sweep(
            SystemTime::now() + Duration::from_secs(10),
            Duration::from_secs(3_600),
            Duration::from_secs(5),
        );
        assert_eq!(report.expired_jobs, vec![done.clone()]);
        assert!(state.job(&done).is_none());
        assert!(state.job(&waiting).is_some());
    }

    #[test]
    fn concurrent_completions_write_only_once() {
        use std::sync::Barrier;
        use std::thread;

        for _ in 0..500 {
            let state = AppState::new();
            let w = state.register_worker("host".into(), 1);
            let id = state.enqueue("background_task", json!({}));
            state.assign_next(&w).unwrap();

            let barrier = Arc::new(Barrier::new(2));
            let outcomes = [
                TaskOutcome::Success { value: JobValue::from(3_i64) },
                TaskOutcome::Failure { error: "boom".into() },
            ];
            let handles: Vec<_> = outcomes
                .into_iter()
                .map(|outcome| {
                    let state = state.clone();
                    let barrier = barrier.clone();
                    let req = complete(&w, &id, outcome);
                    thread::spawn(move || {
                        barrier.wait();
                        state.complete(req).is_ok()
                    })
                })
                .collect();
            let accepted = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count();

            assert_eq!(accepted, 1);
            let job = state.job(&id).unwrap();
            assert!(job.result.is_none() || job.error.is_none());
            match job.state {
                JobState::Succeeded => assert_eq!(job.result, Some(JobValue::from(3_i64))),
                JobState::Failed => assert_eq!(job.error.as_deref(), Some("boom")),
                other => panic!("estado inesperado {other}"),
            }
        }
    }

    #[test]
    fn completion_after_worker_lost_keeps_the_failure() {
        let state = AppState::new();
        let w = state.register_worker("host".into(), 1);
        let id = state.enqueue("background_task", json!({}));
        state.assign_next(&w).unwrap();

        let later = SystemTime::now() + Duration::from_secs(60);
        state.sweep(later, Duration::from_secs(20), Duration::from_secs(86_400));

        assert!(matches!(
            state.complete(complete(&w, &id, TaskOutcome::Success { value: JobValue::from(3_i64) })),
            Err(BrokerError::NotInFlight(_))
        ));
        let job = state.job(&id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.error.unwrap().starts_with("WorkerLost"));
        assert_eq!(job.result, None);
    }

    #[test]
    fn completion_never_overwrites_a_terminal_job() {
        let state = AppState::new();
        let w = state.register_worker("host".into(), 1);
        let id = state.enqueue("background_task", json!({}));
        state.assign_next(&w).unwrap();
        {
            let mut jobs = lock(&state.jobs);
            let job = jobs.get_mut(&id).unwrap();
            job.state = JobState::Failed;
            job.error = Some("WorkerLost: test".into());
        }

        assert!(matches!(
            state.complete(complete(&w, &id, TaskOutcome::Success { value: JobValue::from(3_i64) })),
            Err(BrokerError::InvalidTransition { .. })
        ));
        let job = state.job(&id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.result, None);
    }

    #[test]
    fn sweep_forgets_workers_dead_for_too_long() {
        let state = AppState::new();
        let gone = state.register_worker("viejo".into(), 1);
        let alive = state.register_worker("nuevo".into(), 1);

        let now = SystemTime::now();
        lock(&state.workers).get_mut(&gone).unwrap().last_heartbeat =
            now - Duration::from_secs(120);

        // muerto pero todavía dentro de la retención
        let report = state.sweep(now, Duration::from_secs(20), Duration::from_secs(300));
        assert_eq!(report.dead_workers, vec![gone.clone()]);
        assert!(report.pruned_workers.is_empty());
        assert!(lock(&state.workers).contains_key(&gone));

        let report = state.sweep(
            now + Duration::from_secs(250),
            Duration::from_secs(20),
            Duration::from_secs(300),
        );
        assert!(report.pruned_workers.contains(&gone));
        assert!(!lock(&state.workers).contains_key(&gone));
        assert!(matches!(
            state.heartbeat(&gone, 0.0, 0),
            Err(BrokerError::UnknownWorker(_))
        ));
        // `alive` también murió en esa pasada, pero recién
        assert!(lock(&state.workers).contains_key(&alive));
    }
}
