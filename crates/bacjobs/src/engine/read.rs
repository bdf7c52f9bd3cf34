//! Smart Read
//!
//! Reads many properties from one device as cheaply as the device allows.
//! ReadPropertyMultiple is tried first with batches sized from the device's
//! maximum message size; a failing batch is halved until a single request
//! still fails, at which point the next (smaller) candidate size takes over
//! from where the last successful batch ended. Whatever is left is read one
//! property at a time through the bounded task runner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use job_runtime::{RunOptions, RunnerError, Task, run_tasks};
use serde::{Deserialize, Serialize};

use crate::bacnet::{
    AddressSpec, BacnetClient, ClientError, ObjectId, ObjectReadResult, PropertyRef,
    PropertyResult, PropertyValue, ProtocolError, ReadOptions, ReadRequest, ReadValue, property_id,
};
use crate::types::Device;

/// Batch size used when the device's maximum message size is unknown
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Estimated encoded bytes per requested property, optimistic then conservative
const BYTES_PER_PROPERTY: [u32; 2] = [17, 30];

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Read strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadMethod {
    /// ReadProperty only
    SingleOnly,
    /// One conservative batch size, then single reads
    #[default]
    MultiFallback,
    /// Optimistic and conservative batch sizes, then single reads that
    /// tolerate individual failures
    MultiFallbackTwoTier,
}

impl ReadMethod {
    /// Whether single-read failures past the retry budget abort the read
    fn enforces_retry_budget(self) -> bool {
        !matches!(self, Self::MultiFallbackTwoTier)
    }
}

/// Tuning for one smart read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmartReadOptions {
    pub method: ReadMethod,
    /// Concurrency of the single-read fallback
    pub max_concurrent_single_reads: usize,
    /// Single-read failures tolerated before giving up
    pub single_read_retry_budget: usize,
}

impl Default for SmartReadOptions {
    fn default() -> Self {
        Self {
            method: ReadMethod::default(),
            max_concurrent_single_reads: 5,
            single_read_retry_budget: 5,
        }
    }
}

/// Why a smart read produced no result
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReadError {
    #[error("Single read retry budget exhausted after {failures} failures")]
    RetryBudgetExhausted { failures: usize },

    #[error("Object list read failed: {0}")]
    ObjectList(ClientError),

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Batching
// ─────────────────────────────────────────────────────────────────────────────

/// Candidate batch sizes, largest first, for a device and method
pub fn candidate_batch_sizes(max_message_size: Option<u32>, method: ReadMethod) -> Vec<usize> {
    let Some(max) = max_message_size else {
        return vec![DEFAULT_BATCH_SIZE];
    };
    let mut sizes: Vec<usize> = BYTES_PER_PROPERTY
        .iter()
        .map(|bytes| ((max / bytes) as usize).max(1))
        .collect();
    if method == ReadMethod::MultiFallback {
        sizes.drain(..sizes.len() - 1);
    }
    sizes.dedup();
    sizes
}

/// End index of a batch starting at `start`: whole requests are added while
/// the property count stays within `batch_size`, but at least one is taken.
fn pack(requests: &[ReadRequest], start: usize, batch_size: usize) -> usize {
    let mut end = start;
    let mut count = 0;
    while end < requests.len() {
        let len = requests[end].properties.len();
        if end > start && count + len > batch_size {
            break;
        }
        count += len;
        end += 1;
    }
    end
}

// ─────────────────────────────────────────────────────────────────────────────
// Smart Read
// ─────────────────────────────────────────────────────────────────────────────

/// Read `requests` from `device`, one result row per object in first-seen order
pub async fn smart_read(
    client: &dyn BacnetClient,
    device: &Device,
    requests: &[ReadRequest],
    options: SmartReadOptions,
) -> Result<Vec<ObjectReadResult>, ReadError> {
    let address = device.address_spec();
    let mut rows = Vec::new();
    let mut resolved = 0;

    if options.method != ReadMethod::SingleOnly {
        for batch_size in candidate_batch_sizes(device.max_message_size, options.method) {
            let mut current = batch_size;
            while resolved < requests.len() {
                let end = pack(requests, resolved, current);
                match client
                    .read_property_multiple(&address, &requests[resolved..end], device.max_message_size)
                    .await
                {
                    Ok(batch) => {
                        rows.extend(batch);
                        resolved = end;
                    }
                    Err(error) if current > 1 => {
                        current /= 2;
                        tracing::debug!(device = %device.name, %error, batch_size = current, "Halving read batch");
                    }
                    Err(error) => {
                        tracing::debug!(device = %device.name, %error, batch_size, "Abandoning batch size");
                        break;
                    }
                }
            }
            if resolved == requests.len() {
                break;
            }
        }
    }

    if resolved < requests.len() {
        let remaining = &requests[resolved..];
        tracing::debug!(
            device = %device.name,
            remaining = remaining.len(),
            "Falling back to single reads"
        );
        rows.extend(single_read(client, device, &address, remaining, options).await?);
    }

    Ok(normalize(rows))
}

async fn single_read(
    client: &dyn BacnetClient,
    device: &Device,
    address: &AddressSpec,
    requests: &[ReadRequest],
    options: SmartReadOptions,
) -> Result<Vec<ObjectReadResult>, ReadError> {
    let failures = AtomicUsize::new(0);
    let exhausted = AtomicBool::new(false);
    let budget = options.single_read_retry_budget.max(1);
    let enforce = options.method.enforces_retry_budget();

    // Ids are positional: two requests may name the same object and property
    let mut tasks = Vec::new();
    for (request_index, request) in requests.iter().enumerate() {
        for (property_index, property) in request.properties.iter().enumerate() {
            let object = request.object;
            let property = *property;
            let (failures, exhausted) = (&failures, &exhausted);
            tasks.push(Task::new(format!("{request_index}-{property_index}"), async move {
                if exhausted.load(Ordering::SeqCst) {
                    return Err(ClientError::Abort("retry budget exhausted".to_string()));
                }
                let read_options = ReadOptions {
                    max_message_size: device.max_message_size,
                    array_index: property.index,
                };
                match client.read_property(address, object, property.id, read_options).await {
                    Ok(result) => Ok((object, fill_missing(property, result))),
                    Err(error) => {
                        // Reads still in flight once the budget is spent are not counted
                        let counted = failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                            (!enforce || n < budget).then_some(n + 1)
                        });
                        if enforce && counted.is_ok_and(|previous| previous + 1 >= budget) {
                            exhausted.store(true, Ordering::SeqCst);
                        }
                        Err(error)
                    }
                }
            }));
        }
    }

    let outcomes = run_tasks(
        tasks,
        RunOptions::new(options.max_concurrent_single_reads),
        |_| {},
    )
    .await?;

    if exhausted.load(Ordering::SeqCst) {
        return Err(ReadError::RetryBudgetExhausted {
            failures: failures.load(Ordering::SeqCst),
        });
    }

    let mut rows = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok((object, result)) => {
                let mut row = ObjectReadResult::new(object);
                row.values.push(result);
                rows.push(row);
            }
            Err(error) => {
                tracing::debug!(device = %device.name, read = %outcome.id, %error, "Single read failed");
            }
        }
    }
    Ok(rows)
}

/// Absent values read as an unknown-object error
fn fill_missing(property: PropertyRef, result: PropertyResult) -> PropertyResult {
    match &result.value {
        ReadValue::Values(values) if values.is_empty() => {
            PropertyResult::new(property, ReadValue::Error(ProtocolError::unknown_object()))
        }
        _ => PropertyResult {
            property_id: property.id,
            array_index: property.index,
            value: result.value,
        },
    }
}

/// Merge rows for the same object, keeping first-seen order
fn normalize(rows: Vec<ObjectReadResult>) -> Vec<ObjectReadResult> {
    let mut merged: Vec<ObjectReadResult> = Vec::new();
    let mut index: HashMap<ObjectId, usize> = HashMap::new();
    for row in rows {
        match index.get(&row.object) {
            Some(&i) => merged[i].values.extend(row.values),
            None => {
                index.insert(row.object, merged.len());
                merged.push(row);
            }
        }
    }
    merged
}

// ─────────────────────────────────────────────────────────────────────────────
// Object List
// ─────────────────────────────────────────────────────────────────────────────

/// Read a device's object list
///
/// The whole list is requested with ReadPropertyMultiple first. Devices that
/// cannot return it in one message are walked element by element from index
/// 1 until an element comes back invalid.
pub async fn read_object_list(
    client: &dyn BacnetClient,
    device: &Device,
) -> Result<Vec<PropertyValue>, ReadError> {
    let address = device.address_spec();
    let request = [ReadRequest::new(device.object(), [property_id::OBJECT_LIST])];

    match client
        .read_property_multiple(&address, &request, device.max_message_size)
        .await
    {
        Ok(rows) => {
            let list = rows
                .iter()
                .filter_map(|row| row.property(property_id::OBJECT_LIST))
                .flat_map(|value| value.values().iter().cloned())
                .collect::<Vec<_>>();
            if !list.is_empty() {
                return Ok(list);
            }
        }
        Err(error) => {
            tracing::debug!(device = %device.name, %error, "Object list multi read failed, walking by index");
        }
    }

    let mut list = Vec::new();
    for index in 1u32.. {
        let options = ReadOptions {
            max_message_size: device.max_message_size,
            array_index: Some(index),
        };
        let result = client
            .read_property(&address, device.object(), property_id::OBJECT_LIST, options)
            .await;
        match result {
            Ok(result) => match result.value.first() {
                Some(value) if !value.is_null() => list.push(value.clone()),
                _ => break,
            },
            Err(error) if index == 1 => return Err(ReadError::ObjectList(error)),
            Err(_) => break,
        }
    }
    Ok(list)
}
