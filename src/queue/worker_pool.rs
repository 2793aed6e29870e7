//! Worker Pool (spec §4.4, component C4).
//!
//! Bounded-concurrency FIFO-within-priority execution, modeled on the
//! daemon's `JobQueue` in `api/jobs.rs` (`submit_job`/`process_next_job`,
//! `JobQueueConfig.max_concurrent_jobs`) and `queue/processor.rs`'s
//! content-hash dedup on enqueue, generalized to the spec's priority
//! ordering and exponential-backoff retry policy.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tracing::{error, info, warn};

use crate::config::Priority;
use crate::events::{Event, EventBus, Topic};
use crate::queue::job::{JobKind, JobProgress, JobState, ScanJob};

/// Runs one job to completion. Implemented by the Scan Orchestrator (C12);
/// kept as a trait here so the pool has no compile-time dependency on it.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &ScanJob, cancel: watch::Receiver<bool>) -> Result<serde_json::Value, String>;
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub max_concurrent_scans: usize,
    pub scan_timeout: Duration,
    pub retry_delay_ms: u64,
    pub history_dir: PathBuf,
}

struct QueuedJob {
    priority_rank: u8,
    seq: std::cmp::Reverse<u64>,
    id: String,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority_rank == other.priority_rank && self.seq == other.seq
    }
}
impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    /// Highest priority rank first; within a priority class, the
    /// earliest-enqueued (smallest `seq`) job first — spec §4.4 "FIFO
    /// within priority class".
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority_rank
            .cmp(&other.priority_rank)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

struct PoolState {
    queue: BinaryHeap<QueuedJob>,
    jobs: HashMap<String, ScanJob>,
    priorities: HashMap<String, Priority>,
    cancels: HashMap<String, watch::Sender<bool>>,
}

/// Bounded-concurrency job runner (spec §4.4).
pub struct WorkerPool {
    config: WorkerPoolConfig,
    events: EventBus,
    executor: Arc<dyn JobExecutor>,
    state: Arc<Mutex<PoolState>>,
    semaphore: Arc<Semaphore>,
    seq: AtomicU64,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, events: EventBus, executor: Arc<dyn JobExecutor>) -> Arc<Self> {
        let max = config.max_concurrent_scans.max(1);
        Arc::new(Self {
            config,
            events,
            executor,
            state: Arc::new(Mutex::new(PoolState {
                queue: BinaryHeap::new(),
                jobs: HashMap::new(),
                priorities: HashMap::new(),
                cancels: HashMap::new(),
            })),
            semaphore: Arc::new(Semaphore::new(max)),
            seq: AtomicU64::new(0),
        })
    }

    /// Enqueue a job. Idempotent on `(kind, target)`: if a job for this
    /// target is already queued or running, its existing id is returned
    /// rather than creating a duplicate (spec §4.4 "Queue operations are
    /// idempotent on job id").
    pub async fn enqueue(&self, kind: JobKind, target: &str, priority: Priority, max_attempts: u32) -> String {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.jobs.values().find(|j| {
            j.target == target && j.kind == kind && matches!(j.state, JobState::Queued | JobState::Running)
        }) {
            return existing.id.clone();
        }

        let now = chrono::Utc::now();
        let id = ScanJob::next_id(target, now);
        let job = ScanJob::new(id.clone(), kind, target, max_attempts);
        state.jobs.insert(id.clone(), job);
        state.priorities.insert(id.clone(), priority);
        self.push(&mut state, &id, priority);
        drop(state);

        self.events
            .publish(
                Event::new(Topic::JobCreated, json!({ "target": target, "kind": kind }))
                    .with_job_id(&id),
            )
            .await;
        id
    }

    fn push(&self, state: &mut PoolState, id: &str, priority: Priority) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        state.queue.push(QueuedJob {
            priority_rank: priority.rank(),
            seq: std::cmp::Reverse(seq),
            id: id.to_string(),
        });
    }

    /// Request cancellation. Queued-but-not-started jobs are canceled
    /// immediately; running jobs receive a cooperative stop signal that the
    /// executor is responsible for observing (spec §4.4).
    pub async fn cancel(&self, id: &str) {
        let mut state = self.state.lock().await;
        if let Some(sender) = state.cancels.get(id) {
            let _ = sender.send(true);
        }
        if let Some(job) = state.jobs.get_mut(id) {
            if job.state == JobState::Queued {
                job.mark_canceled(chrono::Utc::now());
            }
        }
    }

    pub async fn job(&self, id: &str) -> Option<ScanJob> {
        self.state.lock().await.jobs.get(id).cloned()
    }

    async fn pop_next(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        while let Some(queued) = state.queue.pop() {
            match state.jobs.get(&queued.id).map(|j| j.state) {
                Some(JobState::Queued) => return Some(queued.id),
                _ => continue,
            }
        }
        None
    }

    /// Drive the pool until `shutdown` signals `true`. Each acquired permit
    /// runs exactly one job to completion (including retries, which
    /// re-enter the queue rather than holding the permit across backoff).
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                permit = self.semaphore.clone().acquire_owned() => {
                    let permit = permit.expect("semaphore never closed");
                    match self.pop_next().await {
                        Some(id) => {
                            let this = self.clone();
                            tokio::spawn(async move {
                                this.run_job(id).await;
                                drop(permit);
                            });
                        }
                        None => {
                            drop(permit);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    }
                }
            }
        }
    }

    async fn run_job(self: &Arc<Self>, id: String) {
        let now = chrono::Utc::now();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let job_snapshot = {
            let mut state = self.state.lock().await;
            state.cancels.insert(id.clone(), cancel_tx);
            let job = match state.jobs.get_mut(&id) {
                Some(j) => j,
                None => return,
            };
            if job.state == JobState::Canceled {
                state.cancels.remove(&id);
                return;
            }
            job.mark_started(now);
            job.progress = Some(JobProgress::new("starting", 0, "job started"));
            job.clone()
        };

        self.events
            .publish(Event::new(Topic::JobStarted, json!({ "target": job_snapshot.target })).with_job_id(&id))
            .await;

        let outcome = tokio::time::timeout(
            self.config.scan_timeout,
            self.executor.execute(&job_snapshot, cancel_rx),
        )
        .await;

        self.state.lock().await.cancels.remove(&id);

        match outcome {
            Ok(Ok(result)) => self.finish_completed(&id, result).await,
            Ok(Err(message)) => self.finish_failed(&id, message).await,
            Err(_) => self.finish_failed(&id, format!("job {id} timed out after {:?}", self.config.scan_timeout)).await,
        }
    }

    async fn finish_completed(&self, id: &str, result: serde_json::Value) {
        let now = chrono::Utc::now();
        let job = {
            let mut state = self.state.lock().await;
            let job = match state.jobs.get_mut(id) {
                Some(j) => j,
                None => return,
            };
            job.mark_completed(now);
            job.clone()
        };

        self.write_history("completed", &job, Some(&result)).await;
        self.events
            .publish(Event::new(Topic::JobCompleted, result).with_job_id(id))
            .await;
    }

    async fn finish_failed(&self, id: &str, message: String) {
        let now = chrono::Utc::now();
        let (job, should_retry) = {
            let mut state = self.state.lock().await;
            let job = match state.jobs.get_mut(id) {
                Some(j) => j,
                None => return,
            };
            job.mark_failed(now, message.clone());
            let should_retry = job.can_retry();
            (job.clone(), should_retry)
        };

        if should_retry {
            let delay = job.backoff(self.config.retry_delay_ms);
            warn!(job_id = %id, delay_ms = delay.as_millis(), "job failed, scheduling retry");
            self.events
                .publish(
                    Event::new(Topic::JobRetrying, json!({ "error": message, "delay_ms": delay.as_millis() }))
                        .with_job_id(id),
                )
                .await;

            let this_state = self.state.clone();
            let this_events = self.events.clone();
            let id = id.to_string();
            let next_seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let mut state = this_state.lock().await;
                let priority_rank = state.priorities.get(&id).copied().unwrap_or(Priority::Medium).rank();
                if let Some(job) = state.jobs.get_mut(&id) {
                    if job.state != JobState::Canceled {
                        job.requeue();
                        state.queue.push(QueuedJob {
                            priority_rank,
                            seq: std::cmp::Reverse(next_seq),
                            id: id.clone(),
                        });
                    }
                }
                drop(state);
                this_events
                    .publish(Event::new(Topic::JobCreated, json!({ "retry": true })).with_job_id(&id))
                    .await;
            });
        } else {
            error!(job_id = %id, error = %message, "job exhausted retries");
            self.write_history("failed", &job, None).await;
            self.events
                .publish(Event::new(Topic::JobFailed, json!({ "error": message })).with_job_id(id))
                .await;
        }
    }

    /// One JSON document per terminal job (spec §4.4, §6 "Job history
    /// files").
    async fn write_history(&self, bucket: &str, job: &ScanJob, result: Option<&serde_json::Value>) {
        let dir = self.config.history_dir.join(bucket);
        let job = job.clone();
        let result = result.cloned();
        let record = json!({ "job": job, "result": result });
        let path = dir.join(format!("{}.json", job.id));

        let write = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&dir)?;
            std::fs::write(&path, serde_json::to_vec_pretty(&record).expect("job history always serializes"))
        })
        .await;

        if let Err(e) = write {
            error!(error = %e, "job history write task panicked");
        } else if let Ok(Err(e)) = write {
            error!(error = %e, "failed to write job history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysSucceeds;

    #[async_trait]
    impl JobExecutor for AlwaysSucceeds {
        async fn execute(&self, job: &ScanJob, _cancel: watch::Receiver<bool>) -> Result<serde_json::Value, String> {
            Ok(json!({ "target": job.target }))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl JobExecutor for AlwaysFails {
        async fn execute(&self, _job: &ScanJob, _cancel: watch::Receiver<bool>) -> Result<serde_json::Value, String> {
            Err("boom".to_string())
        }
    }

    fn config(dir: &tempfile::TempDir) -> WorkerPoolConfig {
        WorkerPoolConfig {
            max_concurrent_scans: 2,
            scan_timeout: Duration::from_secs(5),
            retry_delay_ms: 10,
            history_dir: dir.path().to_path_buf(),
        }
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_on_target() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = WorkerPool::new(config(&dir), EventBus::new(), Arc::new(AlwaysSucceeds));
        let id1 = pool.enqueue(JobKind::Intra, "svc-a", Priority::High, 3).await;
        let id2 = pool.enqueue(JobKind::Intra, "svc-a", Priority::High, 3).await;
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn successful_job_completes_and_writes_history() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = WorkerPool::new(config(&dir), EventBus::new(), Arc::new(AlwaysSucceeds));
        let id = pool.enqueue(JobKind::Intra, "svc-a", Priority::High, 3).await;

        let (_tx, rx) = watch::channel(false);
        let pool_run = pool.clone();
        let handle = tokio::spawn(async move { pool_run.run(rx).await });

        for _ in 0..50 {
            if let Some(job) = pool.job(&id).await {
                if job.state == JobState::Completed {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let job = pool.job(&id).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert!(dir.path().join("completed").join(format!("{id}.json")).exists());

        handle.abort();
    }

    #[tokio::test]
    async fn failing_job_retries_then_exhausts() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = WorkerPool::new(config(&dir), EventBus::new(), Arc::new(AlwaysFails));
        let id = pool.enqueue(JobKind::Intra, "svc-a", Priority::High, 2).await;

        let (_tx, rx) = watch::channel(false);
        let pool_run = pool.clone();
        let handle = tokio::spawn(async move { pool_run.run(rx).await });

        for _ in 0..100 {
            if let Some(job) = pool.job(&id).await {
                if job.state == JobState::Failed {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let job = pool.job(&id).await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 2);
        assert!(dir.path().join("failed").join(format!("{id}.json")).exists());

        handle.abort();
    }
}
