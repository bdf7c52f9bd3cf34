//! bacjobs - BACnet integration jobs
//!
//! This crate provides the job layer between a building-automation backend
//! and a BACnet/IP network:
//! - Device discovery via Who-Is / I-Am with name resolution
//! - Point discovery from device object lists
//! - Batched present-value reads with adaptive fallback
//! - Validated, prioritised point writes
//!
//! Jobs run on the `job_runtime` lifecycle and report through its event
//! stream. The network is reached through the `BacnetClient` trait; a
//! simulated network backs the CLI and the tests.

// BACnet client contract and simulated network
pub mod bacnet;

// Layered configuration
pub mod config;

// Smart read / smart write
pub mod engine;

// Display formatting
pub mod facets;
pub mod units;

// Workflows
pub mod job;

// Input records and their validation
pub mod samples;
pub mod schema;
pub mod types;

pub use config::{BacjobsConfig, ConfigError};
pub use job::{
    BacnetJob, DiscoverDeviceJob, DiscoverPointJob, ErrorCategory, JobErrorKind, ReadPointJob,
    WritePointJob,
};
pub use types::{Device, DiscoverMode, PointDescriptor};
