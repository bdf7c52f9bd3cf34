//! Job Runtime - lifecycle, events and scheduling for orchestration jobs
//!
//! This crate contains the protocol-agnostic pieces shared by every job:
//! - The `Job` lifecycle trait and the per-run event channel
//! - The bounded-concurrency task runner used for fan-out
//! - The coalesced job queue that serialises job executions

pub mod concurrent;
pub mod job;

pub use concurrent::{RunOptions, RunnerError, Task, TaskOutcome, run_tasks};
pub use job::*;
