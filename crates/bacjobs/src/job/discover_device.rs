//! Device Discovery
//!
//! Broadcasts Who-Is, collects I-Am answers for a fixed window, then reads
//! each device's name in paced chunks and emits the validated device list.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use job_runtime::{EventSink, Job, JobEmitter, JobResult, JobRuntimeError};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::JobErrorKind;
use crate::bacnet::{
    AddressSpec, BacnetClient, IAm, ObjectId, ReadOptions, WhoIsRequest, property_id,
};
use crate::config::DiscoverDeviceConfig;
use crate::schema::validate_device;

pub const DISCOVER_DEVICE_JOB: &str = "discover device";

/// Where a discovery run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverDeviceState {
    Idle,
    Broadcasting,
    CollectingResponses,
    ResolvingNames,
    Validating,
    Done,
}

/// I-Am answers collected during one run, first answer per device wins
#[derive(Default)]
struct Responses {
    seen: HashSet<u32>,
    candidates: Vec<IAm>,
}

impl Responses {
    fn record(&mut self, i_am: IAm) {
        if self.seen.insert(i_am.device_id) {
            self.candidates.push(i_am);
        }
    }

    fn clear(&mut self) {
        self.seen.clear();
        self.candidates.clear();
    }
}

pub struct DiscoverDeviceJob {
    client: Arc<dyn BacnetClient>,
    emitter: JobEmitter,
    config: DiscoverDeviceConfig,
    responses: Arc<Mutex<Responses>>,
    listener: Option<JoinHandle<()>>,
    state: DiscoverDeviceState,
}

impl DiscoverDeviceJob {
    pub fn new(client: Arc<dyn BacnetClient>, sink: EventSink, config: DiscoverDeviceConfig) -> Self {
        Self {
            client,
            emitter: JobEmitter::new(sink),
            config,
            responses: Arc::new(Mutex::new(Responses::default())),
            listener: None,
            state: DiscoverDeviceState::Idle,
        }
    }

    pub fn from_config(client: Arc<dyn BacnetClient>, sink: EventSink, config: &crate::config::BacjobsConfig) -> Self {
        Self::new(client, sink, config.discover_device.clone())
    }

    /// Retune the Who-Is target between runs
    pub fn set_range(&mut self, network: Option<u16>, low_limit: Option<u32>, high_limit: Option<u32>) {
        self.config.network = network;
        self.config.low_limit = low_limit;
        self.config.high_limit = high_limit;
    }

    pub fn state(&self) -> DiscoverDeviceState {
        self.state
    }

    fn set_state(&mut self, state: DiscoverDeviceState) {
        tracing::debug!(job = DISCOVER_DEVICE_JOB, from = ?self.state, to = ?state, "State transition");
        self.state = state;
    }

    async fn run(&mut self) {
        self.responses.lock().clear();

        if self.listener.is_none() {
            self.emitter.error(
                JobErrorKind::Generic,
                json!({ "error": JobRuntimeError::NotStarted(DISCOVER_DEVICE_JOB.to_string()).to_string() }),
            );
            return;
        }

        self.set_state(DiscoverDeviceState::Broadcasting);
        let request = WhoIsRequest {
            network: self.config.network,
            low_limit: self.config.low_limit,
            high_limit: self.config.high_limit,
        };
        if let Err(error) = self.client.who_is(request).await {
            self.emitter
                .error(JobErrorKind::Generic, json!({ "error": error.to_string() }));
            return;
        }

        self.set_state(DiscoverDeviceState::CollectingResponses);
        tokio::time::sleep(self.config.who_is_timeout()).await;
        self.emitter.progress(10);

        let candidates = self.responses.lock().candidates.clone();
        tracing::info!(job = DISCOVER_DEVICE_JOB, devices = candidates.len(), "Collected I-Am responses");

        self.set_state(DiscoverDeviceState::ResolvingNames);
        let records = self.resolve_names(&candidates).await;
        self.emitter.progress(90);

        self.set_state(DiscoverDeviceState::Validating);
        let mut devices = Vec::with_capacity(records.len());
        for record in records {
            match validate_device(&record) {
                Ok(device) => devices.push(device),
                Err(err) => self
                    .emitter
                    .error(JobErrorKind::SchemaValidation, err.detail("device", &record)),
            }
        }

        tracing::info!(job = DISCOVER_DEVICE_JOB, devices = devices.len(), "Discovery complete");
        self.emitter.output(json!(devices));
    }

    /// Device records for every candidate, named where the name could be read
    async fn resolve_names(&mut self, candidates: &[IAm]) -> Vec<Value> {
        let chunk_size = self.config.name_read_chunk_size.max(1);
        let total = candidates.len();
        let mut records = Vec::with_capacity(total);

        for (chunk_index, chunk) in candidates.chunks(chunk_size).enumerate() {
            let names = join_all(chunk.iter().map(|i_am| read_device_name(self.client.as_ref(), i_am))).await;

            for (i_am, name) in chunk.iter().zip(names) {
                let name = match name {
                    Ok(name) => name,
                    Err(error) => {
                        self.emitter.error(
                            JobErrorKind::ReadingDeviceName,
                            json!({ "deviceId": i_am.device_id, "error": error }),
                        );
                        None
                    }
                };
                records.push(device_record(i_am, name));
            }

            tokio::time::sleep(self.config.name_read_delay()).await;
            let done = (chunk_index * chunk_size + chunk.len()) as f64;
            let progress = (80.0 / total as f64 * done + 10.0).round().min(90.0);
            self.emitter.progress(progress as u8);
        }

        records
    }
}

async fn read_device_name(client: &dyn BacnetClient, i_am: &IAm) -> Result<Option<String>, String> {
    let address = match (i_am.network, &i_am.link_address) {
        (Some(network), Some(link)) if !link.is_empty() => AddressSpec::Routed {
            address: i_am.address.clone(),
            network,
            link_address: link.clone(),
        },
        _ => AddressSpec::Direct {
            address: i_am.address.clone(),
        },
    };
    let options = ReadOptions {
        max_message_size: i_am.max_message_size,
        array_index: None,
    };
    let result = client
        .read_property(&address, ObjectId::device(i_am.device_id), property_id::OBJECT_NAME, options)
        .await
        .map_err(|e| e.to_string())?;
    Ok(result.value.first().and_then(|v| v.as_str()).map(str::to_string))
}

fn device_record(i_am: &IAm, name: Option<String>) -> Value {
    let mut record = json!({
        "deviceId": i_am.device_id,
        "network": i_am.network,
        "address": i_am.address,
        "linkAddress": i_am.link_address,
        "segmentation": i_am.segmentation,
        "maxMessageSize": i_am.max_message_size,
        "vendorId": i_am.vendor_id,
    });
    if let (Some(name), Some(map)) = (name, record.as_object_mut()) {
        map.insert("deviceName".to_string(), Value::String(name));
    }
    record
}

#[async_trait]
impl Job for DiscoverDeviceJob {
    fn name(&self) -> &str {
        DISCOVER_DEVICE_JOB
    }

    async fn on_start(&mut self) -> JobResult<()> {
        if self.listener.is_some() {
            return Err(JobRuntimeError::AlreadyStarted(DISCOVER_DEVICE_JOB.to_string()));
        }

        let mut rx = self.client.subscribe_i_am();
        let responses = Arc::clone(&self.responses);
        self.listener = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(i_am) => responses.lock().record(i_am),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(job = DISCOVER_DEVICE_JOB, skipped, "I-Am listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
        tracing::debug!(job = DISCOVER_DEVICE_JOB, "I-Am listener started");
        Ok(())
    }

    async fn execute(&mut self) {
        self.emitter.reset();
        self.emitter.progress(0);
        self.run().await;
        self.emitter.finish();
        self.set_state(DiscoverDeviceState::Done);
    }

    async fn on_stop(&mut self) -> JobResult<()> {
        if let Some(listener) = self.listener.take() {
            listener.abort();
            tracing::debug!(job = DISCOVER_DEVICE_JOB, "I-Am listener stopped");
        }
        self.set_state(DiscoverDeviceState::Idle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bacnet::sim::{SimBehaviour, SimDevice, SimulatedNetwork};
    use crate::job::test_support::{assert_finished_once, errors, has_kind, outputs, progress};
    use job_runtime::drain_events;

    fn fast_config() -> DiscoverDeviceConfig {
        DiscoverDeviceConfig {
            who_is_timeout_ms: 20,
            name_read_chunk_size: 2,
            name_read_delay_ms: 1,
            ..Default::default()
        }
    }

    fn site() -> Vec<SimDevice> {
        vec![
            SimDevice::new(1, "BMS", "192.168.1.100"),
            SimDevice::new(2, "AHU", "192.168.1.101").with_max_message_size(Some(480)),
            SimDevice::new(3, "VAV", "192.168.1.1").routed(5, vec![3]),
        ]
    }

    #[tokio::test]
    async fn test_discovers_and_names_devices() {
        let network: Arc<dyn BacnetClient> = Arc::new(SimulatedNetwork::new(site()));
        let (sink, mut rx) = EventSink::channel(DISCOVER_DEVICE_JOB);
        let mut job = DiscoverDeviceJob::new(network, sink, fast_config());

        job.on_start().await.unwrap();
        job.execute().await;
        job.on_stop().await.unwrap();

        let events = drain_events(&mut rx);
        assert_finished_once(&events);
        assert!(errors(&events).is_empty());
        assert!(progress(&events).contains(&10));

        let devices = outputs(&events)[0].as_array().unwrap().clone();
        let names: Vec<&str> = devices.iter().map(|d| d["deviceName"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["BMS", "AHU", "VAV"]);
        assert_eq!(devices[0]["maxMessageSize"], 1476);
        assert_eq!(devices[1]["maxMessageSize"], 480);
        assert_eq!(devices[2]["network"], 5);
        assert_eq!(devices[2]["linkAddress"], json!([3]));
    }

    #[tokio::test]
    async fn test_duplicate_announcements_are_ignored() {
        let network = Arc::new(SimulatedNetwork::new(site()));
        let (sink, mut rx) = EventSink::channel(DISCOVER_DEVICE_JOB);
        let client: Arc<dyn BacnetClient> = network.clone();
        let mut job = DiscoverDeviceJob::new(client, sink, fast_config());
        job.on_start().await.unwrap();

        let rebroadcast = {
            let network = Arc::clone(&network);
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                network.who_is(WhoIsRequest::default()).await.unwrap();
            })
        };
        job.execute().await;
        rebroadcast.await.unwrap();

        let events = drain_events(&mut rx);
        assert_eq!(outputs(&events)[0].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unnamed_device_is_kept() {
        let behaviour = SimBehaviour::default().with_failing_read(2, ObjectId::device(2), property_id::OBJECT_NAME);
        let network: Arc<dyn BacnetClient> = Arc::new(SimulatedNetwork::with_behaviour(site(), behaviour));
        let (sink, mut rx) = EventSink::channel(DISCOVER_DEVICE_JOB);
        let mut job = DiscoverDeviceJob::new(network, sink, fast_config());

        job.on_start().await.unwrap();
        job.execute().await;

        let events = drain_events(&mut rx);
        assert!(has_kind(&events, JobErrorKind::ReadingDeviceName));
        let devices = outputs(&events)[0].as_array().unwrap().clone();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[1]["deviceId"], 2);
        assert_eq!(devices[1]["deviceName"], "");
    }

    #[tokio::test]
    async fn test_range_limits_who_is() {
        let network: Arc<dyn BacnetClient> = Arc::new(SimulatedNetwork::new(site()));
        let (sink, mut rx) = EventSink::channel(DISCOVER_DEVICE_JOB);
        let mut job = DiscoverDeviceJob::new(network, sink, fast_config());
        job.set_range(None, Some(2), Some(3));

        job.on_start().await.unwrap();
        job.execute().await;
        job.execute().await;

        let events = drain_events(&mut rx);
        let runs = outputs(&events);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1].as_array().unwrap().len(), 2);
        assert_eq!(job.state(), DiscoverDeviceState::Done);
    }

    #[tokio::test]
    async fn test_execute_without_start_reports_error() {
        let network: Arc<dyn BacnetClient> = Arc::new(SimulatedNetwork::new(site()));
        let (sink, mut rx) = EventSink::channel(DISCOVER_DEVICE_JOB);
        let mut job = DiscoverDeviceJob::new(network, sink, fast_config());

        job.execute().await;

        let events = drain_events(&mut rx);
        assert_finished_once(&events);
        assert!(has_kind(&events, JobErrorKind::Generic));
        assert!(outputs(&events).is_empty());
    }
}
