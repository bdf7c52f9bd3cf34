//! Point Reading
//!
//! Reads every configured point grouped by device and reports each one as
//! a raw value plus a facet-formatted display string. A point whose value
//! could not be read is still reported, as `0` with an error marker.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use job_runtime::{EventSink, Job, JobEmitter, JobResult, RunOptions, Task, run_tasks};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::validate::devices_and_points;
use super::{JobErrorKind, fan_out_progress};
use crate::bacnet::{BacnetClient, ObjectId, ObjectReadResult, PropertyValue, ReadRequest, ReadValue};
use crate::config::{BacjobsConfig, ReadPointConfig};
use crate::engine::{ReadError, smart_read};
use crate::facets::{Facets, RawValue};
use crate::types::PointDescriptor;

pub const READ_POINT_JOB: &str = "read point";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPointState {
    Idle,
    Validating,
    Reading,
    Formatting,
    Done,
}

/// One point in the read output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointReading {
    pub value: RawValue,
    pub fvalue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl PointReading {
    /// Format a raw value through a point's facets
    pub fn new(raw: Option<RawValue>, facets: &Facets) -> Self {
        let (raw, err) = match raw {
            Some(raw) => (raw, None),
            None => (RawValue::Number(0.0), Some(JobErrorKind::ReadingPoint.to_string())),
        };
        Self {
            fvalue: facets.format(&raw),
            value: facets.normalize(&raw),
            err,
        }
    }
}

/// Display-ready reading of a protocol value; NULL counts as no value
fn raw_value(value: &PropertyValue) -> Option<RawValue> {
    match value {
        PropertyValue::Null => None,
        PropertyValue::Boolean(b) => Some(RawValue::Number(if *b { 1.0 } else { 0.0 })),
        PropertyValue::CharacterString(s) => Some(RawValue::Text(s.clone())),
        PropertyValue::ObjectIdentifier(id) => Some(RawValue::Text(id.to_string())),
        other => other.as_f64().map(RawValue::Number),
    }
}

type ReadingKey = (String, ObjectId, u32);

pub struct ReadPointJob {
    client: Arc<dyn BacnetClient>,
    emitter: JobEmitter,
    devices: Value,
    points: Value,
    config: ReadPointConfig,
    state: ReadPointState,
}

impl ReadPointJob {
    pub fn new(
        client: Arc<dyn BacnetClient>,
        sink: EventSink,
        devices: Value,
        points: Value,
        config: ReadPointConfig,
    ) -> Self {
        Self {
            client,
            emitter: JobEmitter::new(sink),
            devices,
            points,
            config,
            state: ReadPointState::Idle,
        }
    }

    pub fn from_config(
        client: Arc<dyn BacnetClient>,
        sink: EventSink,
        devices: Value,
        points: Value,
        config: &BacjobsConfig,
    ) -> Self {
        Self::new(client, sink, devices, points, config.read_point.clone())
    }

    /// Replace the device and point sets for the next run
    pub fn set_inputs(&mut self, devices: Value, points: Value) {
        self.devices = devices;
        self.points = points;
    }

    pub fn state(&self) -> ReadPointState {
        self.state
    }

    fn set_state(&mut self, state: ReadPointState) {
        tracing::debug!(job = READ_POINT_JOB, from = ?self.state, to = ?state, "State transition");
        self.state = state;
    }

    async fn run(&mut self) {
        self.set_state(ReadPointState::Validating);
        let Some((devices, points)) = devices_and_points(&self.emitter, &self.devices, &self.points) else {
            return;
        };
        self.emitter.progress(10);

        self.set_state(ReadPointState::Reading);
        let options = self.config.read_options();
        let tasks: Vec<Task<'static, Vec<ObjectReadResult>, ReadError>> = devices
            .into_iter()
            .filter_map(|device| {
                let requests: Vec<ReadRequest> = points
                    .iter()
                    .filter(|p| p.device_name == device.name)
                    .map(|p| ReadRequest::new(p.object(), [p.property_id]))
                    .collect();
                if requests.is_empty() {
                    return None;
                }
                let client = Arc::clone(&self.client);
                Some(Task::new(device.name.clone(), async move {
                    smart_read(client.as_ref(), &device, &requests, options).await
                }))
            })
            .collect();

        let total = tasks.len();
        let emitter = &mut self.emitter;
        let mut values: HashMap<ReadingKey, ReadValue> = HashMap::new();
        let mut completed = 0;
        let result = run_tasks(
            tasks,
            RunOptions::new(self.config.max_concurrent_device_read),
            |outcome| {
                completed += 1;
                emitter.progress(fan_out_progress(completed, total));
                match &outcome.result {
                    Ok(rows) => {
                        for row in rows {
                            for property in &row.values {
                                if property.value.is_error() {
                                    tracing::debug!(
                                        job = READ_POINT_JOB,
                                        device = %outcome.id,
                                        object = %row.object,
                                        property = property.property_id,
                                        "Property read returned an error"
                                    );
                                }
                                let key = (outcome.id.clone(), row.object, property.property_id);
                                values.insert(key, property.value.clone());
                            }
                        }
                    }
                    Err(error) => {
                        tracing::warn!(job = READ_POINT_JOB, device = %outcome.id, %error, "Device read failed");
                    }
                }
            },
        )
        .await;
        if let Err(error) = result {
            self.emitter
                .error(JobErrorKind::Generic, json!({ "error": error.to_string() }));
            return;
        }

        self.set_state(ReadPointState::Formatting);
        let readings = format_readings(&points, &values);
        let failed = readings.values().filter(|r| r.err.is_some()).count();
        tracing::info!(job = READ_POINT_JOB, points = readings.len(), failed, "Point read complete");
        self.emitter.output(json!(readings));
    }
}

fn format_readings(
    points: &[PointDescriptor],
    values: &HashMap<ReadingKey, ReadValue>,
) -> BTreeMap<String, PointReading> {
    points
        .iter()
        .map(|point| {
            let key = (point.device_name.clone(), point.object(), point.property_id);
            let raw = values
                .get(&key)
                .and_then(ReadValue::first)
                .and_then(raw_value);
            (point.id(), PointReading::new(raw, &Facets::parse(&point.facets)))
        })
        .collect()
}

#[async_trait]
impl Job for ReadPointJob {
    fn name(&self) -> &str {
        READ_POINT_JOB
    }

    async fn on_start(&mut self) -> JobResult<()> {
        Ok(())
    }

    async fn execute(&mut self) {
        self.emitter.reset();
        self.emitter.progress(0);
        self.run().await;
        self.emitter.finish();
        self.set_state(ReadPointState::Done);
    }

    async fn on_stop(&mut self) -> JobResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bacnet::sim::{SimBehaviour, SimulatedNetwork, demo_site};
    use crate::bacnet::{object_type, property_id};
    use crate::engine::ReadMethod;
    use crate::job::test_support::{assert_finished_once, errors, outputs};
    use crate::samples;
    use job_runtime::{JobEvent, drain_events};

    fn bms() -> Value {
        json!({
            "deviceName": "BMS", "deviceId": 1, "address": "192.168.1.100",
            "maxMessageSize": 1476, "vendorId": 36
        })
    }

    fn point(name: &str, object_type: u32, instance: u32, value_type: u8, facets: &str) -> Value {
        json!({
            "deviceName": "BMS", "pointName": name, "objectType": object_type,
            "objectInstance": instance, "propertyId": 85, "valueType": value_type,
            "facets": facets
        })
    }

    fn site_points() -> Value {
        json!([
            point("VAV_1_ZoneTemp", object_type::ANALOG_VALUE, 96, 4, "unit:°C;precision:1"),
            point("AHU_1_Status", object_type::BINARY_INPUT, 1, 9, "falseText:Stopped;trueText:Running"),
            point("AHU_1_Mode", object_type::MULTI_STATE_VALUE, 1, 2, "range:{1:Off;2:Auto;3:On}"),
            point("Missing", object_type::ANALOG_INPUT, 42, 4, "unit:°C"),
        ])
    }

    async fn read(network: SimulatedNetwork, devices: Value, points: Value) -> Vec<JobEvent> {
        read_with(network, devices, points, ReadPointConfig::default()).await
    }

    async fn read_with(network: SimulatedNetwork, devices: Value, points: Value, config: ReadPointConfig) -> Vec<JobEvent> {
        let (sink, mut rx) = EventSink::channel(READ_POINT_JOB);
        let mut job = ReadPointJob::new(Arc::new(network), sink, devices, points, config);
        job.on_start().await.unwrap();
        job.execute().await;
        job.on_stop().await.unwrap();
        drain_events(&mut rx)
    }

    fn readings(events: &[JobEvent]) -> BTreeMap<String, PointReading> {
        serde_json::from_value(outputs(events)[0].clone()).unwrap()
    }

    #[tokio::test]
    async fn test_reads_and_formats_points() {
        let events = read(SimulatedNetwork::new(demo_site()), json!([bms()]), site_points()).await;
        assert_finished_once(&events);
        assert!(errors(&events).is_empty());

        let readings = readings(&events);
        let zone = &readings["BMS.VAV_1_ZoneTemp"];
        assert_eq!(zone.value, RawValue::Number(21.5));
        assert_eq!(zone.fvalue, "21.5 °C");
        assert_eq!(zone.err, None);

        assert_eq!(readings["BMS.AHU_1_Status"].fvalue, "Running");
        assert_eq!(readings["BMS.AHU_1_Status"].value, RawValue::Number(1.0));
        assert_eq!(readings["BMS.AHU_1_Mode"].fvalue, "Auto");

        let missing = &readings["BMS.Missing"];
        assert_eq!(missing.value, RawValue::Number(0.0));
        assert_eq!(missing.fvalue, "0 °C");
        assert_eq!(missing.err.as_deref(), Some("Error reading point"));
    }

    #[tokio::test]
    async fn test_single_read_fallback_marks_failed_points() {
        let behaviour = SimBehaviour::default()
            .with_rejected_multiple()
            .with_failing_read(1, ObjectId::new(object_type::BINARY_INPUT, 1), property_id::PRESENT_VALUE);
        let events = read(SimulatedNetwork::with_behaviour(demo_site(), behaviour), json!([bms()]), site_points()).await;

        let readings = readings(&events);
        assert_eq!(readings.len(), 4);
        assert_eq!(readings["BMS.VAV_1_ZoneTemp"].fvalue, "21.5 °C");
        assert_eq!(readings["BMS.AHU_1_Status"].err.as_deref(), Some("Error reading point"));
        assert_eq!(readings["BMS.AHU_1_Status"].fvalue, "Stopped");
    }

    #[tokio::test]
    async fn test_aliased_points_read_one_at_a_time() {
        let points = json!([
            point("ZoneTemp", object_type::ANALOG_VALUE, 96, 4, "unit:°C;precision:1"),
            point("ZoneTempAlias", object_type::ANALOG_VALUE, 96, 4, "unit:°C;precision:1"),
            point("OAT", object_type::ANALOG_INPUT, 1, 4, "unit:°C;precision:1"),
        ]);
        let config = ReadPointConfig {
            read_method: ReadMethod::SingleOnly,
            ..ReadPointConfig::default()
        };
        let network = SimulatedNetwork::new(demo_site());
        let events = read_with(network, json!([bms()]), points.clone(), config).await;

        assert_finished_once(&events);
        let single = readings(&events);
        assert_eq!(single.len(), 3);
        assert!(single.values().all(|r| r.err.is_none()));
        assert_eq!(single["BMS.ZoneTemp"].fvalue, "21.5 °C");
        assert_eq!(single["BMS.ZoneTempAlias"].fvalue, "21.5 °C");
        assert_eq!(single["BMS.OAT"].fvalue, "12.3 °C");

        let batched = readings(&read(SimulatedNetwork::new(demo_site()), json!([bms()]), points).await);
        assert_eq!(single, batched);
    }

    #[tokio::test]
    async fn test_empty_value_marks_point() {
        let behaviour = SimBehaviour::default().with_empty_read(
            1,
            ObjectId::new(object_type::ANALOG_VALUE, 96),
            property_id::PRESENT_VALUE,
        );
        let config = ReadPointConfig {
            read_method: ReadMethod::SingleOnly,
            ..ReadPointConfig::default()
        };
        let network = SimulatedNetwork::with_behaviour(demo_site(), behaviour);
        let events = read_with(network, json!([bms()]), site_points(), config).await;

        let readings = readings(&events);
        let zone = &readings["BMS.VAV_1_ZoneTemp"];
        assert_eq!(zone.err.as_deref(), Some("Error reading point"));
        assert_eq!(zone.value, RawValue::Number(0.0));
        assert_eq!(readings["BMS.AHU_1_Status"].err, None);
    }

    #[tokio::test]
    async fn test_unreachable_device_marks_every_point() {
        let devices = json!([{
            "deviceName": "BMS", "deviceId": 1, "address": "10.9.9.9", "vendorId": 36
        }]);
        let events = read(SimulatedNetwork::new(demo_site()), devices, site_points()).await;

        assert_finished_once(&events);
        let readings = readings(&events);
        assert!(readings.values().all(|r| r.err.is_some()));
    }

    #[tokio::test]
    async fn test_non_list_inputs() {
        let events = read(SimulatedNetwork::new(demo_site()), json!("BMS"), site_points()).await;
        assert_finished_once(&events);
        let errs = errors(&events);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].kind, "Invalid data type");
        assert_eq!(errs[0].detail["devices"], "BMS");
        assert!(outputs(&events).is_empty());

        let events = read(SimulatedNetwork::new(demo_site()), json!([bms()]), json!(null)).await;
        let errs = errors(&events);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].detail["example"], samples::sample_points());
    }

    #[tokio::test]
    async fn test_duplicate_device_names_abort() {
        let network = SimulatedNetwork::new(demo_site());
        let events = read(network, json!([bms(), bms()]), site_points()).await;

        assert_finished_once(&events);
        let errors = errors(&events);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, "Duplicated device name");
        assert!(outputs(&events).is_empty());
    }

    #[tokio::test]
    async fn test_validation_happens_before_network_activity() {
        let network = Arc::new(SimulatedNetwork::new(demo_site()));
        let (sink, mut rx) = EventSink::channel(READ_POINT_JOB);
        let points = json!([point("A", 0, 1, 4, ""), point("A", 0, 2, 4, "")]);
        let mut job = ReadPointJob::new(network.clone(), sink, json!([bms()]), points, ReadPointConfig::default());

        job.execute().await;

        let events = drain_events(&mut rx);
        assert_eq!(errors(&events)[0].kind, "Duplicated point id");
        assert_eq!(network.stats().read_property_multiple + network.stats().read_property, 0);
        assert_eq!(job.state(), ReadPointState::Done);
    }
}
