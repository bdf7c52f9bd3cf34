//! Point Writing
//!
//! Validates a `deviceName.pointName -> value` map against the configured
//! points, then writes each value at its point's priority, device by device.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use job_runtime::{EventSink, Job, JobEmitter, JobResult, RunOptions, RunnerError, Task, run_tasks};
use serde_json::{Value, json};

use super::validate::{points_attached, require_list, strict_devices, strict_points};
use super::{JobErrorKind, fan_out_progress};
use crate::bacnet::BacnetClient;
use crate::config::{BacjobsConfig, WritePointConfig};
use crate::engine::{WriteRequest, smart_write};
use crate::samples;
use crate::schema::{MAX_PRIORITY, validate_write_values};
use crate::types::{Device, PointDescriptor};

pub const WRITE_POINT_JOB: &str = "write point";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePointState {
    Idle,
    Validating,
    Writing,
    Done,
}

pub struct WritePointJob {
    client: Arc<dyn BacnetClient>,
    emitter: JobEmitter,
    devices: Value,
    points: Value,
    write_values: Value,
    config: WritePointConfig,
    state: WritePointState,
}

impl WritePointJob {
    pub fn new(
        client: Arc<dyn BacnetClient>,
        sink: EventSink,
        devices: Value,
        points: Value,
        write_values: Value,
        config: WritePointConfig,
    ) -> Self {
        Self {
            client,
            emitter: JobEmitter::new(sink),
            devices,
            points,
            write_values,
            config,
            state: WritePointState::Idle,
        }
    }

    pub fn from_config(
        client: Arc<dyn BacnetClient>,
        sink: EventSink,
        devices: Value,
        points: Value,
        write_values: Value,
        config: &BacjobsConfig,
    ) -> Self {
        Self::new(client, sink, devices, points, write_values, config.write_point.clone())
    }

    /// Replace the values to write on the next run
    pub fn set_write_values(&mut self, write_values: Value) {
        self.write_values = write_values;
    }

    pub fn state(&self) -> WritePointState {
        self.state
    }

    fn set_state(&mut self, state: WritePointState) {
        tracing::debug!(job = WRITE_POINT_JOB, from = ?self.state, to = ?state, "State transition");
        self.state = state;
    }

    /// Devices paired with the writes addressed to them, or `None` after
    /// emitting the one error that stops the run
    fn validate(&self) -> Option<Vec<(Device, Vec<WriteRequest>)>> {
        let emitter = &self.emitter;
        let device_records = require_list(emitter, "devices", &self.devices, samples::sample_devices())?;
        let point_records = require_list(emitter, "points", &self.points, samples::sample_points())?;

        let non_empty_map = self.write_values.as_object().is_some_and(|map| !map.is_empty());
        if !non_empty_map {
            emitter.error(
                JobErrorKind::InvalidDataType,
                json!({
                    "writePoints": self.write_values,
                    "expected": "object",
                    "example": samples::sample_write_points(),
                }),
            );
            return None;
        }

        let devices = strict_devices(emitter, device_records)?;
        let points = strict_points(emitter, point_records)?;
        if !points_attached(emitter, &devices, &points) {
            return None;
        }

        let values = match validate_write_values(&self.write_values) {
            Ok(values) => values,
            Err(err) => {
                emitter.error(
                    JobErrorKind::WritePointSchemaValidation,
                    err.detail("writePoints", &self.write_values),
                );
                return None;
            }
        };

        let requests = resolve_writes(emitter, &points, values)?;
        Some(
            devices
                .into_iter()
                .map(|device| {
                    let writes = requests
                        .iter()
                        .filter(|(device_name, _)| *device_name == device.name)
                        .map(|(_, request)| request.clone())
                        .collect();
                    (device, writes)
                })
                .collect(),
        )
    }

    async fn run(&mut self) {
        self.set_state(WritePointState::Validating);
        let Some(plan) = self.validate() else {
            return;
        };
        self.emitter.progress(10);

        self.set_state(WritePointState::Writing);
        let per_point = self.config.max_concurrent_point_write;
        let tasks: Vec<Task<'static, (Vec<String>, Vec<String>), RunnerError>> = plan
            .into_iter()
            .filter(|(_, writes)| !writes.is_empty())
            .map(|(device, writes)| {
                let client = Arc::clone(&self.client);
                let sink = self.emitter.sink().clone();
                Task::new(device.name.clone(), async move {
                    let outcomes = smart_write(client.as_ref(), &device, &writes, per_point, |outcome| {
                        if let Err(error) = &outcome.result {
                            sink.error(
                                JobErrorKind::WritingPoint,
                                json!({ "id": outcome.id, "error": error.to_string() }),
                            );
                        }
                    })
                    .await?;
                    let (ok, failed): (Vec<_>, Vec<_>) = outcomes.into_iter().partition(|o| o.is_ok());
                    Ok((
                        ok.into_iter().map(|o| o.id).collect(),
                        failed.into_iter().map(|o| o.id).collect(),
                    ))
                })
            })
            .collect();

        let total = tasks.len();
        let emitter = &mut self.emitter;
        let mut written = Vec::new();
        let mut failed = Vec::new();
        let mut completed = 0;
        let result = run_tasks(
            tasks,
            RunOptions::new(self.config.max_concurrent_device_write),
            |outcome| {
                completed += 1;
                emitter.progress(fan_out_progress(completed, total));
                match &outcome.result {
                    Ok((ok, bad)) => {
                        written.extend(ok.iter().cloned());
                        failed.extend(bad.iter().cloned());
                    }
                    Err(error) => emitter.error(
                        JobErrorKind::Generic,
                        json!({ "device": outcome.id, "error": error.to_string() }),
                    ),
                }
            },
        )
        .await;
        if let Err(error) = result {
            self.emitter
                .error(JobErrorKind::Generic, json!({ "error": error.to_string() }));
            return;
        }

        tracing::info!(job = WRITE_POINT_JOB, written = written.len(), failed = failed.len(), "Point write complete");
        self.emitter.output(json!({ "written": written, "failed": failed }));
    }
}

/// Match write keys to configured points. Unknown keys are reported first,
/// then points that are not writable.
fn resolve_writes(
    emitter: &JobEmitter,
    points: &[PointDescriptor],
    values: BTreeMap<String, Value>,
) -> Option<Vec<(String, WriteRequest)>> {
    let by_id: HashMap<String, &PointDescriptor> = points.iter().map(|p| (p.id(), p)).collect();

    let missing: Vec<&String> = values.keys().filter(|id| !by_id.contains_key(*id)).collect();
    if !missing.is_empty() {
        emitter.error(JobErrorKind::WritePointNotFound, json!(missing));
        return None;
    }

    let unwritable: Vec<&String> = values
        .keys()
        .filter(|id| {
            by_id
                .get(*id)
                .is_some_and(|p| p.priority < 1 || u64::from(p.priority) > MAX_PRIORITY)
        })
        .collect();
    if !unwritable.is_empty() {
        emitter.error(JobErrorKind::WritePointInvalidPriority, json!(unwritable));
        return None;
    }

    let mut requests = Vec::with_capacity(values.len());
    for (id, value) in values {
        let Some(point) = by_id.get(&id) else {
            continue;
        };
        requests.push((
            point.device_name.clone(),
            WriteRequest {
                id,
                object: point.object(),
                property_id: point.property_id,
                value_type: point.value_type,
                value,
                priority: point.priority,
            },
        ));
    }
    Some(requests)
}

#[async_trait]
impl Job for WritePointJob {
    fn name(&self) -> &str {
        WRITE_POINT_JOB
    }

    async fn on_start(&mut self) -> JobResult<()> {
        Ok(())
    }

    async fn execute(&mut self) {
        self.emitter.reset();
        self.emitter.progress(0);
        self.run().await;
        self.emitter.finish();
        self.set_state(WritePointState::Done);
    }

    async fn on_stop(&mut self) -> JobResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bacnet::sim::{SimBehaviour, SimulatedNetwork, demo_site};
    use crate::bacnet::{ObjectId, PropertyValue, object_type, property_id};
    use crate::job::test_support::{assert_finished_once, errors, has_kind, outputs};
    use job_runtime::{JobEvent, drain_events};

    fn bms() -> Value {
        json!({
            "deviceName": "BMS", "deviceId": 1, "address": "192.168.1.100",
            "maxMessageSize": 1476, "vendorId": 36
        })
    }

    fn points() -> Value {
        json!([
            {
                "deviceName": "BMS", "pointName": "VAV_1_Damper", "objectType": 1,
                "objectInstance": 3, "propertyId": 85, "valueType": 4, "priority": 8
            },
            {
                "deviceName": "BMS", "pointName": "AHU_1_Enable", "objectType": 4,
                "objectInstance": 2, "propertyId": 85, "valueType": 9, "priority": 10
            },
            {
                "deviceName": "BMS", "pointName": "OAT", "objectType": 0,
                "objectInstance": 1, "propertyId": 85, "valueType": 4, "priority": 0
            }
        ])
    }

    async fn write(network: Arc<SimulatedNetwork>, devices: Value, points: Value, values: Value) -> Vec<JobEvent> {
        let (sink, mut rx) = EventSink::channel(WRITE_POINT_JOB);
        let mut job = WritePointJob::new(network, sink, devices, points, values, WritePointConfig::default());
        job.on_start().await.unwrap();
        job.execute().await;
        job.on_stop().await.unwrap();
        drain_events(&mut rx)
    }

    #[tokio::test]
    async fn test_writes_values_at_point_priority() {
        let network = Arc::new(SimulatedNetwork::new(demo_site()));
        let events = write(
            network.clone(),
            json!([bms()]),
            points(),
            json!({ "BMS.VAV_1_Damper": 60, "BMS.AHU_1_Enable": true }),
        )
        .await;

        assert_finished_once(&events);
        assert!(errors(&events).is_empty());
        assert_eq!(
            outputs(&events)[0],
            &json!({ "written": ["BMS.AHU_1_Enable", "BMS.VAV_1_Damper"], "failed": [] })
        );

        let writes = network.writes();
        assert_eq!(writes.len(), 2);
        let enable = writes.iter().find(|w| w.object.object_type == object_type::BINARY_OUTPUT).unwrap();
        assert_eq!(enable.values, vec![PropertyValue::Enumerated(1)]);
        assert_eq!(enable.priority, 10);
        assert_eq!(
            network.property(1, ObjectId::new(object_type::ANALOG_OUTPUT, 3), property_id::PRESENT_VALUE),
            Some(vec![PropertyValue::Real(60.0)])
        );
    }

    #[tokio::test]
    async fn test_priority_zero_is_never_written() {
        let network = Arc::new(SimulatedNetwork::new(demo_site()));
        let events = write(
            network.clone(),
            json!([bms()]),
            points(),
            json!({ "BMS.OAT": 5, "BMS.VAV_1_Damper": 60 }),
        )
        .await;

        assert_finished_once(&events);
        let errors = errors(&events);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, "Write point invalid priority");
        assert_eq!(errors[0].detail, json!(["BMS.OAT"]));
        assert_eq!(network.stats().write_property, 0);
    }

    #[tokio::test]
    async fn test_unknown_write_target() {
        let network = Arc::new(SimulatedNetwork::new(demo_site()));
        let events = write(network.clone(), json!([bms()]), points(), json!({ "BMS.Nope": 1 })).await;

        assert!(has_kind(&events, JobErrorKind::WritePointNotFound));
        assert_eq!(network.stats().write_property, 0);
    }

    #[tokio::test]
    async fn test_write_map_shapes() {
        let network = Arc::new(SimulatedNetwork::new(demo_site()));

        let events = write(network.clone(), json!([bms()]), points(), json!({})).await;
        assert_eq!(errors(&events)[0].kind, "Invalid data type");
        assert_eq!(errors(&events)[0].detail["example"], samples::sample_write_points());

        let events = write(network.clone(), json!([bms()]), points(), json!({ "BMS.VAV_1_Damper": "high" })).await;
        assert_eq!(errors(&events)[0].kind, "Schema validation error (write points)");
        assert_eq!(network.stats().write_property, 0);
    }

    #[tokio::test]
    async fn test_failed_write_does_not_stop_siblings() {
        let behaviour = SimBehaviour::default().with_failing_write(
            1,
            ObjectId::new(object_type::BINARY_OUTPUT, 2),
            property_id::PRESENT_VALUE,
        );
        let network = Arc::new(SimulatedNetwork::with_behaviour(demo_site(), behaviour));
        let events = write(
            network.clone(),
            json!([bms()]),
            points(),
            json!({ "BMS.VAV_1_Damper": 60, "BMS.AHU_1_Enable": false }),
        )
        .await;

        assert_finished_once(&events);
        let errors = errors(&events);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, "Error writing point");
        assert_eq!(errors[0].detail["id"], "BMS.AHU_1_Enable");
        assert_eq!(network.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_non_list_devices_and_duplicates() {
        let network = Arc::new(SimulatedNetwork::new(demo_site()));
        let values = json!({ "BMS.VAV_1_Damper": 60 });

        let events = write(network.clone(), json!(42), points(), values.clone()).await;
        assert_finished_once(&events);
        assert_eq!(errors(&events).len(), 1);
        assert_eq!(errors(&events)[0].kind, "Invalid data type");
        assert!(outputs(&events).is_empty());

        let events = write(network.clone(), json!([bms(), bms()]), points(), values).await;
        assert_eq!(errors(&events).len(), 1);
        assert_eq!(errors(&events)[0].kind, "Duplicated device name");
        assert_eq!(network.stats().write_property, 0);
    }
}
