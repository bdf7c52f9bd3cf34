//! BACnet jobs
//!
//! Four workflows built on the `job_runtime` lifecycle:
//! - `DiscoverDeviceJob`: Who-Is broadcast, I-Am collection, name resolution
//! - `DiscoverPointJob`: object-list enumeration into point records
//! - `ReadPointJob`: present-value reads formatted through facets
//! - `WritePointJob`: validated, prioritised writes

mod discover_device;
mod discover_point;
mod read_point;
mod validate;
mod write_point;

pub use discover_device::*;
pub use discover_point::*;
pub use read_point::*;
pub use write_point::*;

use std::fmt;

use async_trait::async_trait;
use job_runtime::{Job, JobResult};
use serde::Serialize;

// ─────────────────────────────────────────────────────────────────────────────
// Error Kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Broad class of a job error record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Wrong top-level type for an input
    InputShape,
    /// Field-level validation failures
    SchemaValidation,
    /// Duplicate device names or point ids
    Duplicate,
    /// Point referencing an unknown device
    OrphanPoint,
    /// Unknown write target or unwritable priority
    WriteConfig,
    /// A protocol request failed
    Transport,
    /// Unexpected failure inside the job
    Internal,
}

/// Every kind of error record the BACnet jobs emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobErrorKind {
    Generic,
    InvalidDataType,
    SchemaValidation,
    DeviceSchemaValidation,
    PointSchemaValidation,
    WritePointSchemaValidation,
    IgnoreDuplicatedDeviceName,
    DuplicatedDeviceName,
    DuplicatedPointId,
    PointNotAttached,
    ReadingDeviceName,
    ReadingPoints,
    ReadingPoint,
    StateTextWarning,
    WritePointNotFound,
    WritePointInvalidPriority,
    WritingPoint,
}

impl JobErrorKind {
    pub fn message(self) -> &'static str {
        match self {
            Self::Generic => "An error occurred, please contact support",
            Self::InvalidDataType => "Invalid data type",
            Self::SchemaValidation => "Schema validation error",
            Self::DeviceSchemaValidation => "Schema validation error (devices)",
            Self::PointSchemaValidation => "Schema validation error (points)",
            Self::WritePointSchemaValidation => "Schema validation error (write points)",
            Self::IgnoreDuplicatedDeviceName => "Ignore duplicated device name",
            Self::DuplicatedDeviceName => "Duplicated device name",
            Self::DuplicatedPointId => "Duplicated point id",
            Self::PointNotAttached => "Point is not attached to any devices",
            Self::ReadingDeviceName => "Error reading device name",
            Self::ReadingPoints => "Error reading points",
            Self::ReadingPoint => "Error reading point",
            Self::StateTextWarning => "Warning: Failed to read STATE_TEXT properties",
            Self::WritePointNotFound => "Write point not found in points config",
            Self::WritePointInvalidPriority => "Write point invalid priority",
            Self::WritingPoint => "Error writing point",
        }
    }

    pub fn category(self) -> ErrorCategory {
        match self {
            Self::Generic => ErrorCategory::Internal,
            Self::InvalidDataType => ErrorCategory::InputShape,
            Self::SchemaValidation
            | Self::DeviceSchemaValidation
            | Self::PointSchemaValidation
            | Self::WritePointSchemaValidation => ErrorCategory::SchemaValidation,
            Self::IgnoreDuplicatedDeviceName
            | Self::DuplicatedDeviceName
            | Self::DuplicatedPointId => ErrorCategory::Duplicate,
            Self::PointNotAttached => ErrorCategory::OrphanPoint,
            Self::WritePointNotFound | Self::WritePointInvalidPriority => ErrorCategory::WriteConfig,
            Self::ReadingDeviceName
            | Self::ReadingPoints
            | Self::ReadingPoint
            | Self::StateTextWarning
            | Self::WritingPoint => ErrorCategory::Transport,
        }
    }

    /// Look a kind up by its message, as carried in a `JobError` record
    pub fn from_message(message: &str) -> Option<Self> {
        ALL_KINDS.iter().copied().find(|kind| kind.message() == message)
    }
}

const ALL_KINDS: [JobErrorKind; 17] = [
    JobErrorKind::Generic,
    JobErrorKind::InvalidDataType,
    JobErrorKind::SchemaValidation,
    JobErrorKind::DeviceSchemaValidation,
    JobErrorKind::PointSchemaValidation,
    JobErrorKind::WritePointSchemaValidation,
    JobErrorKind::IgnoreDuplicatedDeviceName,
    JobErrorKind::DuplicatedDeviceName,
    JobErrorKind::DuplicatedPointId,
    JobErrorKind::PointNotAttached,
    JobErrorKind::ReadingDeviceName,
    JobErrorKind::ReadingPoints,
    JobErrorKind::ReadingPoint,
    JobErrorKind::StateTextWarning,
    JobErrorKind::WritePointNotFound,
    JobErrorKind::WritePointInvalidPriority,
    JobErrorKind::WritingPoint,
];

impl fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl From<JobErrorKind> for String {
    fn from(kind: JobErrorKind) -> Self {
        kind.message().to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Job Variants
// ─────────────────────────────────────────────────────────────────────────────

/// Any of the BACnet jobs
pub enum BacnetJob {
    DiscoverDevice(DiscoverDeviceJob),
    DiscoverPoint(DiscoverPointJob),
    ReadPoint(ReadPointJob),
    WritePoint(WritePointJob),
}

impl BacnetJob {
    fn inner(&self) -> &dyn Job {
        match self {
            Self::DiscoverDevice(job) => job,
            Self::DiscoverPoint(job) => job,
            Self::ReadPoint(job) => job,
            Self::WritePoint(job) => job,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Job {
        match self {
            Self::DiscoverDevice(job) => job,
            Self::DiscoverPoint(job) => job,
            Self::ReadPoint(job) => job,
            Self::WritePoint(job) => job,
        }
    }
}

#[async_trait]
impl Job for BacnetJob {
    fn name(&self) -> &str {
        self.inner().name()
    }

    async fn on_start(&mut self) -> JobResult<()> {
        self.inner_mut().on_start().await
    }

    async fn execute(&mut self) {
        self.inner_mut().execute().await
    }

    async fn on_stop(&mut self) -> JobResult<()> {
        self.inner_mut().on_stop().await
    }
}

impl From<DiscoverDeviceJob> for BacnetJob {
    fn from(job: DiscoverDeviceJob) -> Self {
        Self::DiscoverDevice(job)
    }
}

impl From<DiscoverPointJob> for BacnetJob {
    fn from(job: DiscoverPointJob) -> Self {
        Self::DiscoverPoint(job)
    }
}

impl From<ReadPointJob> for BacnetJob {
    fn from(job: ReadPointJob) -> Self {
        Self::ReadPoint(job)
    }
}

impl From<WritePointJob> for BacnetJob {
    fn from(job: WritePointJob) -> Self {
        Self::WritePoint(job)
    }
}

/// Progress for `done` of `total` units of fan-out work, spread over 10..95
pub(crate) fn fan_out_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 95;
    }
    (85.0 / total as f64 * done as f64 + 10.0).round().min(95.0) as u8
}

#[cfg(test)]
pub(crate) mod test_support {
    use job_runtime::{JobError, JobEvent};

    use super::JobErrorKind;

    pub fn errors(events: &[JobEvent]) -> Vec<&JobError> {
        events
            .iter()
            .filter_map(|e| match e {
                JobEvent::Error(error) => Some(error),
                _ => None,
            })
            .collect()
    }

    pub fn outputs(events: &[JobEvent]) -> Vec<&serde_json::Value> {
        events
            .iter()
            .filter_map(|e| match e {
                JobEvent::Output(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn progress(events: &[JobEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                JobEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    pub fn has_kind(events: &[JobEvent], kind: JobErrorKind) -> bool {
        errors(events).iter().any(|e| e.kind == kind.message())
    }

    /// Every run ends at 100 exactly once, with non-decreasing progress
    pub fn assert_finished_once(events: &[JobEvent]) {
        let progress = progress(events);
        assert_eq!(progress.iter().filter(|p| **p == 100).count(), 1);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&100));
    }
}
