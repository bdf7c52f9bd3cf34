//! Input validation shared by the jobs
//!
//! Each check emits its own error record and returns `None` (or `false`)
//! when the run must stop.

use std::collections::HashSet;

use job_runtime::JobEmitter;
use serde_json::{Value, json};

use super::JobErrorKind;
use crate::samples;
use crate::schema::{validate_device, validate_point};
use crate::types::{Device, PointDescriptor};

/// The input as a list, or one `InvalidDataType` error
pub(crate) fn require_list<'a>(
    emitter: &JobEmitter,
    field: &str,
    value: &'a Value,
    example: Value,
) -> Option<&'a [Value]> {
    match value.as_array() {
        Some(list) => Some(list),
        None => {
            emitter.error(
                JobErrorKind::InvalidDataType,
                json!({ field: value, "expected": "array", "example": example }),
            );
            None
        }
    }
}

/// Devices that validate, skipping and reporting the rest
pub(crate) fn lenient_devices(emitter: &JobEmitter, records: &[Value]) -> Vec<Device> {
    let mut names = HashSet::new();
    let mut devices = Vec::new();

    for record in records {
        match validate_device(record) {
            Ok(device) if names.contains(&device.name) => {
                emitter.error(JobErrorKind::IgnoreDuplicatedDeviceName, record.clone());
            }
            Ok(device) => {
                names.insert(device.name.clone());
                devices.push(device);
            }
            Err(err) => emitter.error(JobErrorKind::SchemaValidation, err.detail("device", record)),
        }
    }
    devices
}

/// Every device must validate and names must be unique
pub(crate) fn strict_devices(emitter: &JobEmitter, records: &[Value]) -> Option<Vec<Device>> {
    let mut failures = Vec::new();
    let mut devices = Vec::new();
    for record in records {
        match validate_device(record) {
            Ok(device) => devices.push(device),
            Err(err) => failures.push(err.detail("device", record)),
        }
    }
    if !failures.is_empty() {
        emitter.error(JobErrorKind::DeviceSchemaValidation, Value::Array(failures));
        return None;
    }

    let duplicates = duplicates(devices.iter().map(|d| d.name.clone()));
    if !duplicates.is_empty() {
        emitter.error(JobErrorKind::DuplicatedDeviceName, json!(duplicates));
        return None;
    }
    Some(devices)
}

/// Every point must validate and `deviceName.pointName` ids must be unique
pub(crate) fn strict_points(emitter: &JobEmitter, records: &[Value]) -> Option<Vec<PointDescriptor>> {
    let mut failures = Vec::new();
    let mut points = Vec::new();
    for record in records {
        match validate_point(record) {
            Ok(point) => points.push(point),
            Err(err) => failures.push(err.detail("point", record)),
        }
    }
    if !failures.is_empty() {
        emitter.error(JobErrorKind::PointSchemaValidation, Value::Array(failures));
        return None;
    }

    let duplicates = duplicates(points.iter().map(PointDescriptor::id));
    if !duplicates.is_empty() {
        emitter.error(JobErrorKind::DuplicatedPointId, json!(duplicates));
        return None;
    }
    Some(points)
}

/// Every point must name a device in the set
pub(crate) fn points_attached(emitter: &JobEmitter, devices: &[Device], points: &[PointDescriptor]) -> bool {
    let names: HashSet<&str> = devices.iter().map(|d| d.name.as_str()).collect();
    let orphans: Vec<String> = points
        .iter()
        .filter(|p| !names.contains(p.device_name.as_str()))
        .map(PointDescriptor::id)
        .collect();
    if orphans.is_empty() {
        return true;
    }
    emitter.error(JobErrorKind::PointNotAttached, json!(orphans));
    false
}

/// The checks shared by the read and write jobs, in order: input shapes,
/// device records, point records, attachment
pub(crate) fn devices_and_points(
    emitter: &JobEmitter,
    devices: &Value,
    points: &Value,
) -> Option<(Vec<Device>, Vec<PointDescriptor>)> {
    let device_records = require_list(emitter, "devices", devices, samples::sample_devices())?;
    let point_records = require_list(emitter, "points", points, samples::sample_points())?;
    let devices = strict_devices(emitter, device_records)?;
    let points = strict_points(emitter, point_records)?;
    points_attached(emitter, &devices, &points).then_some((devices, points))
}

/// Values seen more than once, each reported once in first-repeat order
fn duplicates(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut duplicates = Vec::new();
    for value in values {
        if !seen.insert(value.clone()) && reported.insert(value.clone()) {
            duplicates.push(value);
        }
    }
    duplicates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::test_support::errors;
    use job_runtime::{EventSink, drain_events};

    fn device(name: &str) -> Value {
        json!({ "deviceName": name, "deviceId": 1, "address": "10.0.0.1", "vendorId": 1 })
    }

    fn point(device: &str, name: &str) -> Value {
        json!({
            "deviceName": device, "pointName": name, "objectType": 0,
            "objectInstance": 1, "propertyId": 85, "valueType": 4
        })
    }

    #[test]
    fn test_duplicates_reported_once() {
        let names = ["A", "B", "A", "A", "B"].map(String::from);
        assert_eq!(duplicates(names.into_iter()), vec!["A", "B"]);
    }

    #[test]
    fn test_strict_checks_emit_one_error() {
        let (sink, mut rx) = EventSink::channel("read point");
        let emitter = JobEmitter::new(sink);

        let result = devices_and_points(&emitter, &json!([device("A"), device("A")]), &json!([]));
        assert!(result.is_none());
        let events = drain_events(&mut rx);
        assert_eq!(errors(&events).len(), 1);
        assert_eq!(errors(&events)[0].kind, "Duplicated device name");
        assert_eq!(errors(&events)[0].detail, json!(["A"]));

        let result = devices_and_points(&emitter, &json!([device("A")]), &json!([point("B", "x")]));
        assert!(result.is_none());
        let events = drain_events(&mut rx);
        assert_eq!(errors(&events)[0].kind, "Point is not attached to any devices");
        assert_eq!(errors(&events)[0].detail, json!(["B.x"]));
    }

    #[test]
    fn test_lenient_devices_skip_bad_records() {
        let (sink, mut rx) = EventSink::channel("discover point");
        let emitter = JobEmitter::new(sink);

        let devices = lenient_devices(&emitter, &[device("A"), json!({ "deviceName": "B" }), device("A")]);
        assert_eq!(devices.len(), 1);

        let events = drain_events(&mut rx);
        let kinds: Vec<&str> = errors(&events).iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Schema validation error", "Ignore duplicated device name"]);
    }
}
