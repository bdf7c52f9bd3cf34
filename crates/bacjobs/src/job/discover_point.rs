//! Point Discovery
//!
//! For each device: read the object list, keep the object types worth
//! turning into points, read their base properties with the smart read
//! engine, then read multi-state state texts on a separate single-read pass.
//! Points are exported in groups of devices as they complete.

use std::sync::Arc;

use async_trait::async_trait;
use job_runtime::{EventSink, Job, JobEmitter, JobResult, RunOptions, Task, run_tasks};
use serde_json::{Value, json};

use super::validate::{lenient_devices, require_list};
use super::{JobErrorKind, fan_out_progress};
use crate::bacnet::{
    BacnetClient, ObjectId, ObjectReadResult, PropertyValue, ReadRequest, ReadValue, object_type,
    property_id,
};
use crate::config::{BacjobsConfig, DiscoverPointConfig};
use crate::engine::{ReadError, ReadMethod, SmartReadOptions, read_object_list, smart_read};
use crate::facets::{DEFAULT_PRECISION, Facets, round_to};
use crate::samples;
use crate::schema::{validate_object_entry, validate_point};
use crate::types::{Device, DiscoverMode};
use crate::units::unit_symbol;

pub const DISCOVER_POINT_JOB: &str = "discover point";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverPointState {
    Idle,
    ValidatingInput,
    PerDeviceEnumeration,
    Exporting,
    Done,
}

pub struct DiscoverPointJob {
    client: Arc<dyn BacnetClient>,
    emitter: JobEmitter,
    devices: Value,
    config: DiscoverPointConfig,
    state: DiscoverPointState,
}

impl DiscoverPointJob {
    pub fn new(
        client: Arc<dyn BacnetClient>,
        sink: EventSink,
        devices: Value,
        config: DiscoverPointConfig,
    ) -> Self {
        Self {
            client,
            emitter: JobEmitter::new(sink),
            devices,
            config,
            state: DiscoverPointState::Idle,
        }
    }

    pub fn from_config(
        client: Arc<dyn BacnetClient>,
        sink: EventSink,
        devices: Value,
        config: &BacjobsConfig,
    ) -> Self {
        Self::new(client, sink, devices, config.discover_point.clone())
    }

    /// Replace the device set for the next run
    pub fn set_devices(&mut self, devices: Value) {
        self.devices = devices;
    }

    pub fn set_mode(&mut self, mode: DiscoverMode) {
        self.config.mode = mode;
    }

    pub fn state(&self) -> DiscoverPointState {
        self.state
    }

    fn set_state(&mut self, state: DiscoverPointState) {
        tracing::debug!(job = DISCOVER_POINT_JOB, from = ?self.state, to = ?state, "State transition");
        self.state = state;
    }

    async fn run(&mut self) {
        self.set_state(DiscoverPointState::ValidatingInput);
        let Some(records) = require_list(&self.emitter, "devices", &self.devices, samples::sample_devices()) else {
            return;
        };
        let devices = lenient_devices(&self.emitter, records);
        self.emitter.progress(10);

        self.set_state(DiscoverPointState::PerDeviceEnumeration);
        let total = devices.len();
        let group_size = self.config.group_export_device_count.max(1);
        let tasks: Vec<Task<'static, Vec<Value>, ReadError>> = devices
            .into_iter()
            .map(|device| {
                let client = Arc::clone(&self.client);
                let config = self.config.clone();
                let sink = self.emitter.sink().clone();
                Task::new(device.name.clone(), async move {
                    discover_device_points(client, device, config, sink).await
                })
            })
            .collect();

        let emitter = &mut self.emitter;
        let mut pending = Vec::new();
        let mut completed = 0;
        let mut exported = 0;
        let result = run_tasks(
            tasks,
            RunOptions::new(self.config.max_concurrent_device_read),
            |outcome| {
                completed += 1;
                emitter.progress(fan_out_progress(completed, total));
                match &outcome.result {
                    Ok(points) => pending.extend(points.iter().cloned()),
                    Err(error) => emitter.error(
                        JobErrorKind::ReadingPoints,
                        json!({ "device": outcome.id, "error": error.to_string() }),
                    ),
                }
                if completed % group_size == 0 {
                    exported += export(emitter, std::mem::take(&mut pending));
                }
            },
        )
        .await;

        if let Err(error) = result {
            self.emitter
                .error(JobErrorKind::Generic, json!({ "error": error.to_string() }));
        }

        self.set_state(DiscoverPointState::Exporting);
        if !pending.is_empty() {
            exported += export(&self.emitter, pending);
        }
        tracing::info!(job = DISCOVER_POINT_JOB, devices = total, points = exported, "Point discovery complete");
    }
}

/// Validate and emit a group of point records, returning how many were emitted
fn export(emitter: &JobEmitter, records: Vec<Value>) -> usize {
    let mut points = Vec::with_capacity(records.len());
    for record in records {
        match validate_point(&record) {
            Ok(point) => points.push(point),
            Err(err) => emitter.error(JobErrorKind::SchemaValidation, err.detail("point", &record)),
        }
    }
    if !points.is_empty() {
        emitter.output(json!(points));
    }
    points.len()
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-device Enumeration
// ─────────────────────────────────────────────────────────────────────────────

async fn discover_device_points(
    client: Arc<dyn BacnetClient>,
    device: Device,
    config: DiscoverPointConfig,
    sink: EventSink,
) -> Result<Vec<Value>, ReadError> {
    let entries = read_object_list(client.as_ref(), &device).await?;

    let mut objects = Vec::with_capacity(entries.len());
    for entry in &entries {
        match validate_object_entry(entry) {
            Ok(object) => objects.push(object),
            Err(err) => sink.error(
                JobErrorKind::SchemaValidation,
                json!({ "device": device.name, "entry": entry, "error": err.to_string() }),
            ),
        }
    }
    if config.mode == DiscoverMode::Basic {
        objects.retain(|o| object_type::is_supported(o.object_type));
    }
    tracing::debug!(device = %device.name, objects = objects.len(), "Reading object properties");

    let requests: Vec<ReadRequest> = objects
        .iter()
        .map(|object| ReadRequest::new(*object, base_properties(object.object_type)))
        .collect();
    let rows = smart_read(client.as_ref(), &device, &requests, config.read_options()).await?;
    let mut points: Vec<DiscoveredPoint> = rows.iter().map(DiscoveredPoint::from_row).collect();

    let state_requests: Vec<ReadRequest> = objects
        .iter()
        .filter(|o| object_type::is_multi_state(o.object_type))
        .map(|object| ReadRequest::new(*object, [property_id::STATE_TEXT]))
        .collect();
    if !state_requests.is_empty() {
        let options = SmartReadOptions {
            method: ReadMethod::SingleOnly,
            max_concurrent_single_reads: 1,
            single_read_retry_budget: config.single_read_retry_budget,
        };
        match smart_read(client.as_ref(), &device, &state_requests, options).await {
            Ok(rows) => merge_state_texts(&mut points, &rows),
            Err(error) => sink.error(
                JobErrorKind::StateTextWarning,
                json!({ "device": device.name, "error": error.to_string() }),
            ),
        }
    }

    Ok(points.iter().map(|p| p.to_record(&device.name)).collect())
}

fn base_properties(object_type: u32) -> Vec<u32> {
    let mut properties = vec![property_id::PRESENT_VALUE, property_id::OBJECT_NAME];
    if object_type::is_analog(object_type) {
        properties.push(property_id::UNITS);
    } else if object_type::is_binary(object_type) {
        properties.extend([property_id::INACTIVE_TEXT, property_id::ACTIVE_TEXT]);
    }
    properties
}

fn merge_state_texts(points: &mut [DiscoveredPoint], rows: &[ObjectReadResult]) {
    for row in rows {
        let Some(ReadValue::Values(values)) = row.property(property_id::STATE_TEXT) else {
            continue;
        };
        let states: Vec<&str> = values.iter().filter_map(PropertyValue::as_str).collect();
        if states.is_empty() {
            continue;
        }
        if let Some(point) = points.iter_mut().find(|p| p.object == row.object) {
            point.facets.range = Some(
                states
                    .iter()
                    .enumerate()
                    .map(|(i, label)| (i as i64 + 1, label.to_string()))
                    .collect(),
            );
        }
    }
}

/// An object's properties, on the way to becoming a point record
struct DiscoveredPoint {
    object: ObjectId,
    name: Option<String>,
    present_value: Option<PropertyValue>,
    facets: Facets,
}

impl DiscoveredPoint {
    fn from_row(row: &ObjectReadResult) -> Self {
        let text = |property| {
            row.property(property)
                .and_then(ReadValue::first)
                .and_then(PropertyValue::as_str)
                .map(str::to_string)
        };

        let mut facets = Facets::default();
        let kind = row.object.object_type;
        if object_type::is_analog(kind) {
            facets.unit = row
                .property(property_id::UNITS)
                .and_then(ReadValue::first)
                .and_then(PropertyValue::as_f64)
                .and_then(|code| unit_symbol(code as u32))
                .map(str::to_string);
            facets.precision = Some(DEFAULT_PRECISION);
        } else if object_type::is_binary(kind) {
            facets.false_text = Some(text(property_id::INACTIVE_TEXT).unwrap_or_else(|| "false".to_string()));
            facets.true_text = Some(text(property_id::ACTIVE_TEXT).unwrap_or_else(|| "true".to_string()));
        }

        Self {
            object: row.object,
            name: text(property_id::OBJECT_NAME),
            present_value: row
                .property(property_id::PRESENT_VALUE)
                .and_then(ReadValue::first)
                .cloned(),
            facets,
        }
    }

    /// Point record; a missing present value leaves `propertyId` and
    /// `valueType` null so the record fails validation
    fn to_record(&self, device_name: &str) -> Value {
        let name = self.name.clone().unwrap_or_else(|| {
            format!("UnknownObjectName:[{}:{}]", self.object.object_type, self.object.instance)
        });
        let precision = self.facets.precision.unwrap_or(DEFAULT_PRECISION);
        let (property, value_type, value) = match &self.present_value {
            Some(pv @ (PropertyValue::Real(_) | PropertyValue::Double(_))) => (
                json!(property_id::PRESENT_VALUE),
                json!(pv.tag()),
                json!(pv.as_f64().map(|v| round_to(v, precision))),
            ),
            Some(pv) => (json!(property_id::PRESENT_VALUE), json!(pv.tag()), pv.to_json()),
            None => (Value::Null, Value::Null, Value::Null),
        };

        json!({
            "deviceName": device_name,
            "pointName": name,
            "objectType": self.object.object_type,
            "objectInstance": self.object.instance,
            "propertyId": property,
            "valueType": value_type,
            "value": value,
            "facets": self.facets.to_string(),
            "priority": 0,
        })
    }
}

#[async_trait]
impl Job for DiscoverPointJob {
    fn name(&self) -> &str {
        DISCOVER_POINT_JOB
    }

    async fn on_start(&mut self) -> JobResult<()> {
        Ok(())
    }

    async fn execute(&mut self) {
        self.emitter.reset();
        self.emitter.progress(0);
        self.run().await;
        self.emitter.finish();
        self.set_state(DiscoverPointState::Done);
    }

    async fn on_stop(&mut self) -> JobResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bacnet::sim::{SimBehaviour, SimDevice, SimObject, SimulatedNetwork, demo_site};
    use crate::job::test_support::{assert_finished_once, errors, has_kind, outputs};
    use job_runtime::{JobEvent, drain_events};

    fn device_record(name: &str, id: u32, address: &str) -> Value {
        json!({
            "deviceName": name, "deviceId": id, "address": address,
            "maxMessageSize": 1476, "vendorId": 36
        })
    }

    async fn discover(
        network: SimulatedNetwork,
        devices: Value,
        config: DiscoverPointConfig,
    ) -> Vec<JobEvent> {
        let (sink, mut rx) = EventSink::channel(DISCOVER_POINT_JOB);
        let mut job = DiscoverPointJob::new(Arc::new(network), sink, devices, config);
        job.on_start().await.unwrap();
        job.execute().await;
        job.on_stop().await.unwrap();
        assert_eq!(job.state(), DiscoverPointState::Done);
        drain_events(&mut rx)
    }

    fn all_points(events: &[JobEvent]) -> Vec<Value> {
        outputs(events)
            .into_iter()
            .flat_map(|group| group.as_array().cloned().unwrap_or_default())
            .collect()
    }

    fn by_name<'a>(points: &'a [Value], name: &str) -> &'a Value {
        points.iter().find(|p| p["pointName"] == name).unwrap()
    }

    #[tokio::test]
    async fn test_basic_discovery_end_to_end() {
        let events = discover(
            SimulatedNetwork::new(demo_site()),
            json!([device_record("BMS", 1, "192.168.1.100")]),
            DiscoverPointConfig::default(),
        )
        .await;

        assert_finished_once(&events);
        assert!(errors(&events).is_empty());

        let points = all_points(&events);
        assert_eq!(points.len(), 6);

        let zone = by_name(&points, "VAV_1_ZoneTemp");
        assert_eq!(zone["facets"], "unit:°C;precision:1");
        assert_eq!(zone["value"], 21.5);
        assert_eq!(zone["valueType"], 4);
        assert_eq!(zone["propertyId"], 85);
        assert_eq!(zone["priority"], 0);

        let status = by_name(&points, "AHU_1_Status");
        assert_eq!(status["facets"], "falseText:Stopped;trueText:Running");

        let mode = by_name(&points, "AHU_1_Mode");
        assert_eq!(mode["facets"], "range:{1:Off;2:Auto;3:On}");
        assert_eq!(mode["value"], 2);
    }

    #[tokio::test]
    async fn test_object_list_walk_and_single_reads() {
        let behaviour = SimBehaviour::default().with_rejected_multiple();
        let events = discover(
            SimulatedNetwork::with_behaviour(demo_site(), behaviour),
            json!([device_record("BMS", 1, "192.168.1.100")]),
            DiscoverPointConfig::default(),
        )
        .await;

        assert_eq!(all_points(&events).len(), 6);
    }

    #[tokio::test]
    async fn test_full_mode_includes_every_object() {
        let site = vec![
            SimDevice::new(1, "BMS", "192.168.1.100")
                .with_object(SimObject::analog(object_type::ANALOG_INPUT, 1, "OAT", 12.0, 62))
                .with_object(
                    SimObject::new(ObjectId::new(23, 1), "Meter")
                        .with_property(property_id::PRESENT_VALUE, vec![PropertyValue::Unsigned(42)]),
                ),
        ];
        let config = DiscoverPointConfig {
            mode: DiscoverMode::Full,
            ..Default::default()
        };
        let events = discover(SimulatedNetwork::new(site), json!([device_record("BMS", 1, "192.168.1.100")]), config).await;

        let points = all_points(&events);
        assert_eq!(points.len(), 2);
        assert_eq!(by_name(&points, "Meter")["valueType"], 2);
        // The device object has no present value and fails point validation
        assert!(has_kind(&events, JobErrorKind::SchemaValidation));
    }

    #[tokio::test]
    async fn test_unnamed_object_gets_placeholder_name() {
        let site = vec![SimDevice::new(1, "BMS", "192.168.1.100").with_object(SimObject {
            id: ObjectId::new(object_type::ANALOG_VALUE, 7),
            properties: [(property_id::PRESENT_VALUE, vec![PropertyValue::Real(1.0)])].into(),
        })];
        let events = discover(SimulatedNetwork::new(site), json!([device_record("BMS", 1, "192.168.1.100")]), DiscoverPointConfig::default()).await;

        let points = all_points(&events);
        assert_eq!(points[0]["pointName"], "UnknownObjectName:[2:7]");
        assert_eq!(points[0]["facets"], "precision:1");
    }

    #[tokio::test]
    async fn test_state_text_failure_is_a_warning() {
        let behaviour = SimBehaviour::default().with_failing_read(
            1,
            ObjectId::new(object_type::MULTI_STATE_VALUE, 1),
            property_id::STATE_TEXT,
        );
        let config = DiscoverPointConfig {
            single_read_retry_budget: 1,
            ..Default::default()
        };
        let events = discover(
            SimulatedNetwork::with_behaviour(demo_site(), behaviour),
            json!([device_record("BMS", 1, "192.168.1.100")]),
            config,
        )
        .await;

        assert!(has_kind(&events, JobErrorKind::StateTextWarning));
        let points = all_points(&events);
        assert_eq!(points.len(), 6);
        assert_eq!(by_name(&points, "AHU_1_Mode")["facets"], "");
    }

    #[tokio::test]
    async fn test_groups_and_device_failures() {
        let site = vec![
            SimDevice::new(1, "A", "10.0.0.1").with_object(SimObject::analog(0, 1, "a", 1.0, 62)),
            SimDevice::new(2, "B", "10.0.0.2").with_object(SimObject::analog(0, 1, "b", 1.0, 62)),
            SimDevice::new(3, "C", "10.0.0.3").with_object(SimObject::analog(0, 1, "c", 1.0, 62)),
        ];
        let devices = json!([
            device_record("A", 1, "10.0.0.1"),
            device_record("B", 2, "10.0.0.2"),
            device_record("C", 3, "10.0.0.3"),
            device_record("Ghost", 9, "10.0.0.9"),
            device_record("A", 1, "10.0.0.1"),
        ]);
        let config = DiscoverPointConfig {
            group_export_device_count: 2,
            max_concurrent_device_read: 1,
            ..Default::default()
        };
        let events = discover(SimulatedNetwork::new(site), devices, config).await;

        assert_finished_once(&events);
        assert!(has_kind(&events, JobErrorKind::IgnoreDuplicatedDeviceName));
        assert!(has_kind(&events, JobErrorKind::ReadingPoints));
        assert_eq!(outputs(&events).len(), 2);
        assert_eq!(all_points(&events).len(), 3);
    }

    #[tokio::test]
    async fn test_non_list_devices() {
        let events = discover(SimulatedNetwork::new(demo_site()), json!({ "deviceName": "BMS" }), DiscoverPointConfig::default()).await;

        assert_finished_once(&events);
        let errors = errors(&events);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, "Invalid data type");
        assert_eq!(errors[0].detail["example"], samples::sample_devices());
        assert!(outputs(&events).is_empty());
    }
}
