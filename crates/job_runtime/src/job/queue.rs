//! Coalesced Job Queue
//!
//! A FIFO of jobs drained one at a time by a polling loop. Submitting an id
//! that is already waiting in the queue is a no-op, which keeps bursts of
//! identical triggers from piling up behind a slow job.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::{JobResult, JobRuntimeError, SharedJob};

// ─────────────────────────────────────────────────────────────────────────────
// Queue Config
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for a coalesced job queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Pause between loop iterations, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Log submissions that were coalesced away
    #[serde(default = "default_log_coalesced")]
    pub log_coalesced: bool,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_log_coalesced() -> bool {
    true
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            log_coalesced: default_log_coalesced(),
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Coalesced Job Queue
// ─────────────────────────────────────────────────────────────────────────────

struct QueuedJob {
    id: String,
    job: SharedJob,
}

/// Single-consumer job serialiser
///
/// At most one job executes at a time, so jobs holding non-reentrant
/// resources (such as an I-Am subscription) can be reused safely.
pub struct CoalescedJobQueue {
    queue: Mutex<VecDeque<QueuedJob>>,
    config: QueueConfig,
    started: AtomicBool,
    stop_requested: AtomicBool,
}

impl Default for CoalescedJobQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl CoalescedJobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            config,
            started: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn new_shared(config: QueueConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    /// Queue a job. Returns `false` if a job with the same id is already waiting.
    pub fn add_job(&self, id: impl Into<String>, job: SharedJob) -> bool {
        let id = id.into();
        let mut queue = self.queue.lock();
        if queue.iter().any(|queued| queued.id == id) {
            if self.config.log_coalesced {
                tracing::info!(job_id = %id, "Coalesced job");
            }
            return false;
        }
        tracing::debug!(job_id = %id, queued = queue.len() + 1, "Job queued");
        queue.push_back(QueuedJob { id, job });
        true
    }

    /// Whether a job with this id is waiting
    pub fn contains(&self, id: &str) -> bool {
        self.queue.lock().iter().any(|queued| queued.id == id)
    }

    /// Number of waiting jobs
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.stop_requested.load(Ordering::SeqCst)
    }

    /// Run the polling loop until `stop` is called
    pub async fn run(&self) -> JobResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(JobRuntimeError::QueueRunning);
        }
        tracing::debug!(poll_interval_ms = self.config.poll_interval_ms, "Job queue started");

        let interval = self.config.poll_interval();
        while !self.stop_requested.load(Ordering::SeqCst) {
            let next = self.queue.lock().pop_front();
            if let Some(QueuedJob { id, job }) = next {
                tracing::debug!(job_id = %id, "Executing queued job");
                let mut job = job.lock().await;
                job.execute().await;
            }
            tokio::time::sleep(interval).await;
        }

        tracing::debug!("Job queue stopped");
        Ok(())
    }

    /// Run the polling loop on a tokio task
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<JobResult<()>> {
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.run().await })
    }

    /// End the loop after its current iteration; a running job is not interrupted
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
