//! Job Lifecycle Management
//!
//! Jobs are one-shot workflows that may be executed many times. Each
//! execution reports through a narrow event channel: progress, output and
//! error records.
//!
//! # Lifecycle
//!
//! Jobs have the following lifecycle hooks:
//! - `on_start`: Acquire resources (e.g. an inbound notification subscription)
//! - `execute`: Run the workflow once; always completes and always reports
//!   progress 100 exactly once
//! - `on_stop`: Release whatever `on_start` acquired

mod event;
mod queue;

pub use event::*;
pub use queue::*;

use std::sync::Arc;

use async_trait::async_trait;

// ─────────────────────────────────────────────────────────────────────────────
// Job Runtime Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur while managing a job's lifecycle
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobRuntimeError {
    #[error("Job already started: {0}")]
    AlreadyStarted(String),

    #[error("Job not started: {0}")]
    NotStarted(String),

    #[error("Queue already running")]
    QueueRunning,
}

/// Result type for job lifecycle operations
pub type JobResult<T> = Result<T, JobRuntimeError>;

// ─────────────────────────────────────────────────────────────────────────────
// Job Trait
// ─────────────────────────────────────────────────────────────────────────────

/// The core Job trait with lifecycle hooks
///
/// Every hook is required. A job that has nothing to acquire still states
/// so explicitly by returning `Ok(())` from `on_start` and `on_stop`.
#[async_trait]
pub trait Job: Send + 'static {
    /// Job name, used as the `source` of every error record it emits
    fn name(&self) -> &str;

    /// Called once before the first execution
    async fn on_start(&mut self) -> JobResult<()>;

    /// Run the workflow once
    ///
    /// Never fails: problems are reported as `JobError` records on the job's
    /// event channel, and progress always ends at 100.
    async fn execute(&mut self);

    /// Called once after the last execution
    async fn on_stop(&mut self) -> JobResult<()>;
}

/// A job shared between an adapter (which may retune it) and the queue
pub type SharedJob = Arc<tokio::sync::Mutex<dyn Job>>;

/// Wrap a job so it can be submitted to a `CoalescedJobQueue`
pub fn shared<J: Job>(job: J) -> SharedJob {
    Arc::new(tokio::sync::Mutex::new(job))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
