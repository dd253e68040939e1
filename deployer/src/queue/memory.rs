//! In-process queue on tokio.
//!
//! Jobs are ordered by priority (lower first, unset counts as 0) and then by
//! enqueue order. A fixed number of workers pull jobs; a failed attempt marked
//! retryable goes to `delayed` until its backoff elapses. At most one
//! non-terminal job exists per deployment, which keeps two workers from ever
//! holding the same deployment.

use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::queue::retry::RetryPolicy;
use crate::queue::{
    DeployJob, JobContext, JobFailure, JobHandle, JobHandler, JobInfo, JobOptions, JobQueue,
    JobState, QueueError, QueueStats,
};

#[derive(Debug, Clone)]
pub struct MemoryQueueOptions {
    /// Number of jobs processed at the same time
    pub concurrency: usize,

    /// Upper bound on how long an idle worker sleeps between checks
    pub idle_poll_interval: Duration,
}

impl Default for MemoryQueueOptions {
    fn default() -> Self {
        Self {
            concurrency: 2,
            idle_poll_interval: Duration::from_secs(1),
        }
    }
}

struct Entry {
    info: JobInfo,
    seq: u64,
    ready_at: Option<Instant>,
    finished: Option<Instant>,
}

/// (priority, seq, job id)
type WaitKey = (i64, u64, String);

#[derive(Default)]
struct State {
    jobs: HashMap<String, Entry>,
    waiting: BTreeSet<WaitKey>,
    /// deployment id -> non-terminal job id
    live: HashMap<String, String>,
    next_seq: u64,
    paused: bool,
    closed: bool,
}

impl State {
    fn wait_key(entry: &Entry) -> WaitKey {
        (
            entry.info.options.priority.unwrap_or(0) as i64,
            entry.seq,
            entry.info.id.clone(),
        )
    }

    /// Move delayed jobs whose backoff elapsed back to waiting
    fn promote_delayed(&mut self, now: Instant) {
        let due: Vec<WaitKey> = self
            .jobs
            .values()
            .filter(|e| e.info.state == JobState::Delayed)
            .filter(|e| e.ready_at.map(|t| t <= now).unwrap_or(true))
            .map(State::wait_key)
            .collect();

        for key in due {
            if let Some(entry) = self.jobs.get_mut(&key.2) {
                entry.info.state = JobState::Waiting;
                entry.ready_at = None;
            }
            self.waiting.insert(key);
        }
    }

    fn next_delayed_at(&self) -> Option<Instant> {
        self.jobs
            .values()
            .filter(|e| e.info.state == JobState::Delayed)
            .filter_map(|e| e.ready_at)
            .min()
    }

    /// Claim the next waiting job
    fn take_next(&mut self) -> Option<(DeployJob, JobContext)> {
        if self.paused || self.closed {
            return None;
        }
        let key = self.waiting.pop_first()?;
        let entry = self.jobs.get_mut(&key.2)?;
        entry.info.state = JobState::Active;
        entry.info.attempts_made += 1;
        entry.info.processed_at = Some(Utc::now());

        Some((
            entry.info.data.clone(),
            JobContext {
                job_id: entry.info.id.clone(),
                attempt: entry.info.attempts_made,
                options: entry.info.options,
            },
        ))
    }

    fn finish(&mut self, job_id: &str, outcome: Result<(), JobFailure>) {
        let Some(entry) = self.jobs.get_mut(job_id) else {
            return;
        };

        match outcome {
            Ok(()) => {
                entry.info.state = JobState::Completed;
                entry.info.failed_reason = None;
            }
            Err(failure) => {
                entry.info.failed_reason = Some(failure.message.clone());
                let attempts = entry.info.options.attempts.max(1);
                if failure.retryable && entry.info.attempts_made < attempts {
                    let policy = RetryPolicy::from(&entry.info.options);
                    let delay = policy.delay_before(entry.info.attempts_made + 1);
                    entry.info.state = JobState::Delayed;
                    entry.ready_at = Some(Instant::now() + delay);
                    warn!(
                        job_id,
                        attempt = entry.info.attempts_made,
                        "Job attempt failed, retrying in {:?}: {}",
                        delay,
                        failure.message
                    );
                    return;
                }
                entry.info.state = JobState::Failed;
                error!(
                    job_id,
                    attempts = entry.info.attempts_made,
                    "Job failed: {}",
                    failure.message
                );
            }
        }

        entry.info.finished_at = Some(Utc::now());
        entry.finished = Some(Instant::now());
        let deployment_id = entry.info.data.deployment_id.clone();
        if self.live.get(&deployment_id).map(String::as_str) == Some(job_id) {
            self.live.remove(&deployment_id);
        }
    }
}

struct Shared {
    state: Mutex<State>,
    wakeup: Notify,
    options: MemoryQueueOptions,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// `JobQueue` backed by process memory
pub struct MemoryQueue {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl MemoryQueue {
    pub fn new(options: MemoryQueueOptions) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                wakeup: Notify::new(),
                options,
            }),
            shutdown_tx,
            workers: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Stop accepting jobs and wait for workers to finish their current attempt
    pub async fn shutdown(&self) {
        self.shared.lock().closed = true;
        let _ = self.shutdown_tx.send(true);
        self.shared.wakeup.notify_waiters();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Queue worker ended abnormally: {}", e);
            }
        }
        info!("Queue workers stopped");
    }

    fn closed_error(&self, operation: &str, target: &str) -> QueueError {
        warn!(operation, target_id = target, "Queue is closed");
        QueueError::Closed
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(MemoryQueueOptions::default())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: DeployJob, options: JobOptions) -> Result<JobHandle, QueueError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(self.closed_error("enqueue", &job.deployment_id));
        }

        if let Some(existing) = state.live.get(&job.deployment_id) {
            debug!(
                deployment_id = %job.deployment_id,
                job_id = %existing,
                "Deployment already has a pending job"
            );
            return Ok(JobHandle {
                id: existing.clone(),
            });
        }

        let id = crate::utils::generate_uuid();
        let seq = state.next_seq;
        state.next_seq += 1;

        let entry = Entry {
            info: JobInfo {
                id: id.clone(),
                data: job.clone(),
                options,
                state: JobState::Waiting,
                attempts_made: 0,
                failed_reason: None,
                created_at: Utc::now(),
                processed_at: None,
                finished_at: None,
            },
            seq,
            ready_at: None,
            finished: None,
        };
        state.waiting.insert(State::wait_key(&entry));
        state.jobs.insert(id.clone(), entry);
        state.live.insert(job.deployment_id.clone(), id.clone());
        drop(state);

        debug!(job_id = %id, deployment_id = %job.deployment_id, "Job enqueued");
        self.shared.wakeup.notify_one();
        Ok(JobHandle { id })
    }

    async fn process(&self, handler: Arc<dyn JobHandler>) -> Result<(), QueueError> {
        if self.shared.lock().closed {
            return Err(self.closed_error("process", "-"));
        }

        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return Err(QueueError::AlreadyProcessing);
        }

        let concurrency = self.shared.options.concurrency.max(1);
        for worker_id in 0..concurrency {
            let shared = self.shared.clone();
            let handler = handler.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            workers.push(tokio::spawn(async move {
                run_worker(worker_id, shared, handler, shutdown_rx).await;
            }));
        }
        info!("Started {} queue workers", concurrency);
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let state = self.shared.lock();
        let mut stats = QueueStats::default();
        for entry in state.jobs.values() {
            match entry.info.state {
                JobState::Waiting => stats.waiting += 1,
                JobState::Active => stats.active += 1,
                JobState::Delayed => stats.delayed += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn list_jobs(
        &self,
        states: &[JobState],
        offset: usize,
        limit: usize,
    ) -> Result<Vec<JobInfo>, QueueError> {
        let state = self.shared.lock();
        let mut entries: Vec<&Entry> = state
            .jobs
            .values()
            .filter(|e| states.is_empty() || states.contains(&e.info.state))
            .collect();
        entries.sort_by_key(|e| e.seq);
        Ok(entries
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|e| e.info.clone())
            .collect())
    }

    async fn get_job(&self, id: &str) -> Result<Option<JobInfo>, QueueError> {
        Ok(self.shared.lock().jobs.get(id).map(|e| e.info.clone()))
    }

    async fn pause(&self) -> Result<(), QueueError> {
        self.shared.lock().paused = true;
        info!("Queue paused");
        Ok(())
    }

    async fn resume(&self) -> Result<(), QueueError> {
        self.shared.lock().paused = false;
        self.shared.wakeup.notify_waiters();
        info!("Queue resumed");
        Ok(())
    }

    async fn is_paused(&self) -> Result<bool, QueueError> {
        Ok(self.shared.lock().paused)
    }

    async fn clean(&self, older_than: Duration, state: JobState) -> Result<usize, QueueError> {
        if !state.is_terminal() {
            warn!(operation = "clean", state = %state, "Refusing to clean non-terminal jobs");
            return Err(QueueError::InvalidArgument(format!(
                "cannot clean {} jobs",
                state
            )));
        }

        let now = Instant::now();
        let mut guard = self.shared.lock();
        let before = guard.jobs.len();
        guard.jobs.retain(|_, e| {
            let expired = e.info.state == state
                && e.finished
                    .map(|t| now.saturating_duration_since(t) >= older_than)
                    .unwrap_or(false);
            !expired
        });
        let removed = before - guard.jobs.len();
        drop(guard);

        if removed > 0 {
            debug!("Cleaned {} {} jobs", removed, state);
        }
        Ok(removed)
    }
}

async fn run_worker(
    worker_id: usize,
    shared: Arc<Shared>,
    handler: Arc<dyn JobHandler>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!("Queue worker {} starting", worker_id);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let (claimed, next_delayed) = {
            let mut state = shared.lock();
            state.promote_delayed(Instant::now());
            (state.take_next(), state.next_delayed_at())
        };

        let Some((job, ctx)) = claimed else {
            let mut wake_at = Instant::now() + shared.options.idle_poll_interval;
            if let Some(at) = next_delayed {
                wake_at = wake_at.min(at);
            }
            tokio::select! {
                _ = shared.wakeup.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            continue;
        };

        debug!(
            worker_id,
            job_id = %ctx.job_id,
            deployment_id = %job.deployment_id,
            attempt = ctx.attempt,
            "Processing job"
        );

        let outcome = AssertUnwindSafe(handler.handle(&job, &ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(JobFailure::retryable("job handler panicked")));

        shared.lock().finish(&ctx.job_id, outcome);
        // Another worker may be waiting on a delayed job that is due now
        shared.wakeup.notify_one();
    }

    debug!("Queue worker {} stopped", worker_id);
}
