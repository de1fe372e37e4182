//! Strict-priority execution queue with bounded concurrency and retries.
//!
//! Three FIFO tiers (HIGH, NORMAL, LOW) feed a scheduler task that drains
//! whichever tier has the highest-priority head while the running set is
//! below `max_concurrency`. HIGH always wins; lower tiers can starve under
//! sustained high-priority load, a documented tradeoff of strict priority.
//!
//! Queue state lives behind a `std::sync::Mutex` that is never held across
//! an await point. The scheduler wakes on a [`Notify`] signal from enqueue
//! and job completion, plus a periodic tick as a safety net against dropped
//! wake-ups. A failed execution consults the run's retry budget: granted
//! retries go to the *front* of their own tier so they restart before fresh
//! same-priority work; exhausted runs fail permanently and reject their
//! completion ticket with the final attempt's error.

use crate::model::TestResult;
use crate::result::{MirarError, MirarResult};
use crate::run::{Priority, RetryOutcome, TestRun};
use crate::store::RunStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

/// Safety-net tick that re-drains the queue even if a wake-up was dropped
const SCHEDULER_TICK_MS: u64 = 500;

// ============================================================================
// Executor Seam
// ============================================================================

/// Executes a single started run, producing its result payload.
///
/// Injected into the queue so the scheduling machinery stays independent of
/// capture and diffing.
#[async_trait]
pub trait RunExecutor: Send + Sync {
    /// Run the test described by `run` and return its result.
    async fn execute(&self, run: &TestRun) -> MirarResult<TestResult>;
}

// ============================================================================
// Wire Types & Tickets
// ============================================================================

/// Queued job counts per priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedCounts {
    /// Jobs waiting in the HIGH tier
    #[serde(rename = "HIGH")]
    pub high: usize,
    /// Jobs waiting in the NORMAL tier
    #[serde(rename = "NORMAL")]
    pub normal: usize,
    /// Jobs waiting in the LOW tier
    #[serde(rename = "LOW")]
    pub low: usize,
}

/// Point-in-time queue snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Waiting jobs per tier
    pub queued: QueuedCounts,
    /// Jobs currently executing
    pub running: usize,
    /// Concurrency cap
    pub max_concurrency: usize,
}

/// Resolves when an enqueued run completes or permanently fails.
///
/// Dropping the ticket is fine; callers that poll the run store instead of
/// waiting simply discard it.
#[derive(Debug)]
pub struct CompletionTicket {
    rx: oneshot::Receiver<MirarResult<TestRun>>,
}

impl CompletionTicket {
    /// Wait for the run to finish.
    ///
    /// # Errors
    ///
    /// Returns the final attempt's error when retries are exhausted, or a
    /// task error if the queue shut down before resolving the run.
    pub async fn wait(self) -> MirarResult<TestRun> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(MirarError::Task {
                message: "Run abandoned before completion".to_string(),
            }),
        }
    }
}

/// Receipt returned by [`ExecutionQueue::enqueue`].
#[derive(Debug)]
pub struct Enqueued {
    /// Id of the queued run
    pub run_id: String,
    /// 1-based position in strict-priority service order at enqueue time
    pub queue_position: usize,
    /// Resolves with the finished run
    pub ticket: CompletionTicket,
}

// ============================================================================
// Queue Internals
// ============================================================================

struct QueuedJob {
    run: TestRun,
    done_tx: oneshot::Sender<MirarResult<TestRun>>,
}

#[derive(Default)]
struct QueueState {
    high: VecDeque<QueuedJob>,
    normal: VecDeque<QueuedJob>,
    low: VecDeque<QueuedJob>,
    running: HashSet<String>,
}

impl QueueState {
    fn pop_next(&mut self) -> Option<QueuedJob> {
        if let Some(job) = self.high.pop_front() {
            return Some(job);
        }
        if let Some(job) = self.normal.pop_front() {
            return Some(job);
        }
        self.low.pop_front()
    }

    fn push_back(&mut self, job: QueuedJob) {
        match job.run.priority {
            Priority::High => self.high.push_back(job),
            Priority::Normal => self.normal.push_back(job),
            Priority::Low => self.low.push_back(job),
        }
    }

    fn push_front(&mut self, job: QueuedJob) {
        match job.run.priority {
            Priority::High => self.high.push_front(job),
            Priority::Normal => self.normal.push_front(job),
            Priority::Low => self.low.push_front(job),
        }
    }
}

fn lock_state(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Execution Queue
// ============================================================================

/// Accepts runs, schedules them by priority under a concurrency cap, and
/// applies the retry policy on failure.
pub struct ExecutionQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    max_concurrency: usize,
    scheduler: tokio::task::JoinHandle<()>,
}

impl ExecutionQueue {
    /// Create a queue and spawn its scheduler task.
    ///
    /// `max_concurrency` is clamped to at least 1.
    #[must_use]
    pub fn new(
        executor: Arc<dyn RunExecutor>,
        runs: Arc<dyn RunStore>,
        max_concurrency: usize,
    ) -> Self {
        let max_concurrency = max_concurrency.max(1);
        let state = Arc::new(Mutex::new(QueueState::default()));
        let notify = Arc::new(Notify::new());

        let scheduler = Scheduler {
            state: Arc::clone(&state),
            notify: Arc::clone(&notify),
            executor,
            runs,
            max_concurrency,
        };
        let handle = tokio::spawn(scheduler.run());

        Self {
            state,
            notify,
            max_concurrency,
            scheduler: handle,
        }
    }

    /// Queue a run for execution. Non-blocking.
    ///
    /// The returned position counts the queued jobs that will be served at
    /// or before this one under strict priority, including itself.
    pub fn enqueue(&self, run: TestRun) -> Enqueued {
        let (done_tx, done_rx) = oneshot::channel();
        let run_id = run.id.clone();
        let priority = run.priority;

        let queue_position = {
            let mut state = lock_state(&self.state);
            state.push_back(QueuedJob { run, done_tx });
            match priority {
                Priority::High => state.high.len(),
                Priority::Normal => state.high.len() + state.normal.len(),
                Priority::Low => state.high.len() + state.normal.len() + state.low.len(),
            }
        };
        self.notify.notify_one();

        debug!("Enqueued run {} at position {}", run_id, queue_position);
        Enqueued {
            run_id,
            queue_position,
            ticket: CompletionTicket { rx: done_rx },
        }
    }

    /// Snapshot the queue counters.
    #[must_use]
    pub fn status(&self) -> QueueStatus {
        let state = lock_state(&self.state);
        QueueStatus {
            queued: QueuedCounts {
                high: state.high.len(),
                normal: state.normal.len(),
                low: state.low.len(),
            },
            running: state.running.len(),
            max_concurrency: self.max_concurrency,
        }
    }
}

impl Drop for ExecutionQueue {
    fn drop(&mut self) {
        self.scheduler.abort();
    }
}

impl std::fmt::Debug for ExecutionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("ExecutionQueue")
            .field("queued", &status.queued)
            .field("running", &status.running)
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Clone)]
struct Scheduler {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    executor: Arc<dyn RunExecutor>,
    runs: Arc<dyn RunStore>,
    max_concurrency: usize,
}

impl Scheduler {
    async fn run(self) {
        let mut ticker = tokio::time::interval(Duration::from_millis(SCHEDULER_TICK_MS));
        loop {
            // Wake on enqueue/completion, or on the periodic safety tick
            tokio::select! {
                () = self.notify.notified() => {},
                _ = ticker.tick() => {},
            }
            self.drain();
        }
    }

    /// Start queued jobs until the running set hits the cap or the queues
    /// are empty. Never holds the state lock across an await.
    fn drain(&self) {
        loop {
            let job = {
                let mut state = lock_state(&self.state);
                if state.running.len() >= self.max_concurrency {
                    None
                } else {
                    let job = state.pop_next();
                    if let Some(ref job) = job {
                        state.running.insert(job.run.id.clone());
                    }
                    job
                }
            };

            match job {
                Some(job) => {
                    let scheduler = self.clone();
                    tokio::spawn(async move {
                        scheduler.execute_job(job).await;
                    });
                }
                None => break,
            }
        }
    }

    async fn execute_job(&self, job: QueuedJob) {
        let run_id = job.run.id.clone();
        if let Err(e) = self.process(job).await {
            warn!("Run {} bookkeeping failed: {}", run_id, e);
        }

        let mut state = lock_state(&self.state);
        state.running.remove(&run_id);
        drop(state);
        self.notify.notify_one();
    }

    async fn process(&self, job: QueuedJob) -> MirarResult<()> {
        let QueuedJob { run, done_tx } = job;

        let started = match run.start() {
            Ok(started) => started,
            Err(e) => {
                let _ = done_tx.send(Err(e));
                return Ok(());
            }
        };
        self.runs.save(started.clone()).await?;
        debug!(
            "Run {} started (attempt {} of {})",
            started.id,
            started.retry_count + 1,
            started.max_retries + 1
        );

        match self.executor.execute(&started).await {
            Ok(result) => {
                let completed = started.complete(result)?;
                self.runs.save(completed.clone()).await?;
                let _ = done_tx.send(Ok(completed));
            }
            Err(e) => {
                let message = e.to_string();
                let mut attempt = started;
                attempt.error = Some(message.clone());

                match attempt.retry() {
                    RetryOutcome::Granted(requeued) => {
                        warn!(
                            "Run {} failed, retrying ({} of {} retries): {}",
                            requeued.id, requeued.retry_count, requeued.max_retries, message
                        );
                        self.runs.save(requeued.clone()).await?;

                        let mut state = lock_state(&self.state);
                        state.push_front(QueuedJob {
                            run: requeued,
                            done_tx,
                        });
                    }
                    RetryOutcome::Exhausted(exhausted) => {
                        warn!(
                            "Run {} failed permanently after {} attempts: {}",
                            exhausted.id,
                            exhausted.retry_count + 1,
                            message
                        );
                        let failed = exhausted.fail(message)?;
                        self.runs.save(failed).await?;
                        let _ = done_tx.send(Err(e));
                    }
                }
            }
        }
        Ok(())
    }
}
