//! Job Events
//!
//! Each job run reports through three kinds of event: progress, output and
//! error. Events travel over an unbounded channel so that no record is lost
//! when the consumer is slower than the job.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────────────
// Job Error Record
// ─────────────────────────────────────────────────────────────────────────────

/// A tagged error record emitted by a job run
///
/// This is data, not a Rust error type: a single run may emit many of them
/// and still produce output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    /// Name of the job that emitted the record
    pub source: String,

    /// Short error kind (e.g. "Duplicated device name")
    pub kind: String,

    /// Offending values or nested error descriptions
    pub detail: serde_json::Value,
}

impl JobError {
    /// Create a new error record
    pub fn new(
        source: impl Into<String>,
        kind: impl Into<String>,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            source: source.into(),
            kind: kind.into(),
            detail,
        }
    }

    /// Key in the `[source] kind` form used in human-facing logs
    pub fn key(&self) -> String {
        format!("[{}] {}", self.source, self.kind)
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key(), self.detail)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Job Event
// ─────────────────────────────────────────────────────────────────────────────

/// An event emitted during one job run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum JobEvent {
    /// Progress percentage, 0 to 100
    Progress(u8),

    /// Final or grouped result payload
    Output(serde_json::Value),

    /// Error record
    Error(JobError),
}

/// Collect every event currently buffered in a receiver
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ─────────────────────────────────────────────────────────────────────────────
// Event Sink
// ─────────────────────────────────────────────────────────────────────────────

/// A cloneable handle for emitting output and error events
///
/// Sub-tasks spawned by a job hold clones of the sink; only the owning
/// `JobEmitter` reports progress.
#[derive(Clone)]
pub struct EventSink {
    source: String,
    tx: mpsc::UnboundedSender<JobEvent>,
}

impl EventSink {
    /// Create a sink for an existing channel
    pub fn new(source: impl Into<String>, tx: mpsc::UnboundedSender<JobEvent>) -> Self {
        Self {
            source: source.into(),
            tx,
        }
    }

    /// Create a sink together with its receiving end
    pub fn channel(source: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(source, tx), rx)
    }

    /// Name of the job this sink reports for
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Send an event; a closed channel means nobody is listening any more
    pub fn emit(&self, event: JobEvent) {
        let _ = self.tx.send(event);
    }

    /// Emit an output payload
    pub fn output(&self, data: serde_json::Value) {
        self.emit(JobEvent::Output(data));
    }

    /// Emit an error record sourced from this job
    pub fn error(&self, kind: impl Into<String>, detail: serde_json::Value) {
        let error = JobError::new(self.source.clone(), kind, detail);
        tracing::debug!(job = %self.source, kind = %error.kind, "Job error emitted");
        self.emit(JobEvent::Error(error));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Job Emitter
// ─────────────────────────────────────────────────────────────────────────────

/// Event emitter owned by a job, tracking the progress of the current run
///
/// Progress is kept non-decreasing and capped at 99 until `finish`, which
/// emits 100 exactly once per run.
pub struct JobEmitter {
    sink: EventSink,
    last_progress: Option<u8>,
    finished: bool,
}

impl JobEmitter {
    /// Create an emitter around a sink
    pub fn new(sink: EventSink) -> Self {
        Self {
            sink,
            last_progress: None,
            finished: false,
        }
    }

    /// The sink, for handing clones to sub-tasks
    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    /// Start a new run
    pub fn reset(&mut self) {
        self.last_progress = None;
        self.finished = false;
    }

    /// Report progress; values that would go backwards are dropped
    pub fn progress(&mut self, progress: u8) {
        if self.finished {
            return;
        }
        let progress = progress.min(99);
        if self.last_progress.is_some_and(|last| progress <= last) {
            return;
        }
        self.last_progress = Some(progress);
        tracing::trace!(job = %self.sink.source, progress, "Job progress");
        self.sink.emit(JobEvent::Progress(progress));
    }

    /// Report the end of the run
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.last_progress = Some(100);
        self.sink.emit(JobEvent::Progress(100));
    }

    /// Whether progress 100 has been reported for this run
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Emit an output payload
    pub fn output(&self, data: serde_json::Value) {
        self.sink.output(data);
    }

    /// Emit an error record
    pub fn error(&self, kind: impl Into<String>, detail: serde_json::Value) {
        self.sink.error(kind, detail);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
