//! Simulated BACnet network
//!
//! An in-memory `BacnetClient` holding a set of devices and their objects.
//! Behaviour switches let callers force the failure modes the jobs must
//! survive: devices that reject ReadPropertyMultiple, requests that are too
//! large, properties that time out and writes that are refused.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::client::{AddressSpec, BacnetClient, ClientError, ClientResult, ReadOptions};
use super::types::{
    IAm, ObjectId, ObjectReadResult, PropertyRef, PropertyResult, PropertyValue, ProtocolError,
    ReadRequest, ReadValue, WhoIsRequest, error_class, error_code, object_type, property_id,
};

const I_AM_CHANNEL_CAPACITY: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Devices
// ─────────────────────────────────────────────────────────────────────────────

/// An object and its property values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimObject {
    pub id: ObjectId,
    pub properties: BTreeMap<u32, Vec<PropertyValue>>,
}

impl SimObject {
    pub fn new(id: ObjectId, name: &str) -> Self {
        Self {
            id,
            properties: BTreeMap::new(),
        }
        .with_property(
            property_id::OBJECT_NAME,
            vec![PropertyValue::CharacterString(name.to_string())],
        )
    }

    pub fn with_property(mut self, property_id: u32, values: Vec<PropertyValue>) -> Self {
        self.properties.insert(property_id, values);
        self
    }

    /// Analog object with a REAL present value and engineering units
    pub fn analog(object_type: u32, instance: u32, name: &str, value: f32, units: u32) -> Self {
        Self::new(ObjectId::new(object_type, instance), name)
            .with_property(property_id::PRESENT_VALUE, vec![PropertyValue::Real(value)])
            .with_property(property_id::UNITS, vec![PropertyValue::Enumerated(units)])
    }

    /// Binary object with inactive/active texts
    pub fn binary(
        object_type: u32,
        instance: u32,
        name: &str,
        active: bool,
        inactive_text: &str,
        active_text: &str,
    ) -> Self {
        Self::new(ObjectId::new(object_type, instance), name)
            .with_property(
                property_id::PRESENT_VALUE,
                vec![PropertyValue::Enumerated(u32::from(active))],
            )
            .with_property(
                property_id::INACTIVE_TEXT,
                vec![PropertyValue::CharacterString(inactive_text.to_string())],
            )
            .with_property(
                property_id::ACTIVE_TEXT,
                vec![PropertyValue::CharacterString(active_text.to_string())],
            )
    }

    /// Multi-state object; `states` become the STATE_TEXT array
    pub fn multi_state(object_type: u32, instance: u32, name: &str, state: u32, states: &[&str]) -> Self {
        Self::new(ObjectId::new(object_type, instance), name)
            .with_property(
                property_id::PRESENT_VALUE,
                vec![PropertyValue::Unsigned(u64::from(state))],
            )
            .with_property(
                property_id::STATE_TEXT,
                states
                    .iter()
                    .map(|s| PropertyValue::CharacterString(s.to_string()))
                    .collect(),
            )
    }
}

/// A simulated device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimDevice {
    pub device_id: u32,
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub network: Option<u16>,
    #[serde(default)]
    pub link_address: Option<Vec<u8>>,
    #[serde(default)]
    pub max_message_size: Option<u32>,
    #[serde(default)]
    pub segmentation: Option<u32>,
    #[serde(default)]
    pub vendor_id: u32,
    #[serde(default)]
    pub objects: Vec<SimObject>,
}

impl SimDevice {
    pub fn new(device_id: u32, name: &str, address: &str) -> Self {
        Self {
            device_id,
            name: name.to_string(),
            address: address.to_string(),
            network: None,
            link_address: None,
            max_message_size: Some(1476),
            segmentation: Some(0),
            vendor_id: 36,
            objects: Vec::new(),
        }
    }

    pub fn with_max_message_size(mut self, max_message_size: Option<u32>) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Place the device behind a router
    pub fn routed(mut self, network: u16, link_address: Vec<u8>) -> Self {
        self.network = Some(network);
        self.link_address = Some(link_address);
        self
    }

    pub fn with_object(mut self, object: SimObject) -> Self {
        self.objects.push(object);
        self
    }

    pub fn i_am(&self) -> IAm {
        IAm {
            device_id: self.device_id,
            address: self.address.clone(),
            network: self.network,
            link_address: self.link_address.clone(),
            max_message_size: self.max_message_size,
            segmentation: self.segmentation,
            vendor_id: self.vendor_id,
        }
    }

    fn answers(&self, address: &AddressSpec) -> bool {
        if address.address() != self.address {
            return false;
        }
        match address {
            AddressSpec::Direct { .. } => self.link_address.is_none(),
            AddressSpec::Routed {
                network, link_address, ..
            } => self.network == Some(*network) && self.link_address.as_ref() == Some(link_address),
        }
    }

    /// The device object, including its object list
    fn device_object(&self) -> SimObject {
        let device = ObjectId::device(self.device_id);
        let list = std::iter::once(device)
            .chain(self.objects.iter().map(|o| o.id))
            .map(PropertyValue::ObjectIdentifier)
            .collect();
        SimObject::new(device, &self.name).with_property(property_id::OBJECT_LIST, list)
    }
}

/// A small site: one controller with a handful of typical points
pub fn demo_site() -> Vec<SimDevice> {
    vec![
        SimDevice::new(1, "BMS", "192.168.1.100")
            .with_object(SimObject::analog(object_type::ANALOG_INPUT, 1, "OAT", 12.34, 62))
            .with_object(SimObject::analog(object_type::ANALOG_VALUE, 96, "VAV_1_ZoneTemp", 21.46, 62))
            .with_object(SimObject::analog(object_type::ANALOG_OUTPUT, 3, "VAV_1_Damper", 45.0, 98))
            .with_object(SimObject::binary(object_type::BINARY_INPUT, 1, "AHU_1_Status", true, "Stopped", "Running"))
            .with_object(SimObject::binary(object_type::BINARY_OUTPUT, 2, "AHU_1_Enable", false, "Off", "On"))
            .with_object(SimObject::multi_state(
                object_type::MULTI_STATE_VALUE,
                1,
                "AHU_1_Mode",
                2,
                &["Off", "Auto", "On"],
            )),
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// Behaviour
// ─────────────────────────────────────────────────────────────────────────────

/// A property on a specific device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyAddress {
    pub device_id: u32,
    pub object: ObjectId,
    pub property_id: u32,
}

/// Failure injection and timing for a simulated network
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimBehaviour {
    /// Abort every ReadPropertyMultiple
    pub reject_multiple: bool,
    /// Abort ReadPropertyMultiple asking for more than this many properties
    pub multiple_read_limit: Option<usize>,
    /// Time out any request that touches these properties
    pub failing_reads: HashSet<PropertyAddress>,
    /// Answer ReadProperty on these properties with no value at all
    pub empty_reads: HashSet<PropertyAddress>,
    /// Refuse writes to these properties
    pub failing_writes: HashSet<PropertyAddress>,
    /// Base round-trip time in milliseconds
    pub latency_ms: u64,
    /// Random extra round-trip time, up to this many milliseconds
    pub jitter_ms: u64,
}

impl SimBehaviour {
    pub fn with_rejected_multiple(mut self) -> Self {
        self.reject_multiple = true;
        self
    }

    pub fn with_multiple_read_limit(mut self, limit: usize) -> Self {
        self.multiple_read_limit = Some(limit);
        self
    }

    pub fn with_failing_read(mut self, device_id: u32, object: ObjectId, property_id: u32) -> Self {
        self.failing_reads.insert(PropertyAddress {
            device_id,
            object,
            property_id,
        });
        self
    }

    pub fn with_empty_read(mut self, device_id: u32, object: ObjectId, property_id: u32) -> Self {
        self.empty_reads.insert(PropertyAddress {
            device_id,
            object,
            property_id,
        });
        self
    }

    pub fn with_failing_write(mut self, device_id: u32, object: ObjectId, property_id: u32) -> Self {
        self.failing_writes.insert(PropertyAddress {
            device_id,
            object,
            property_id,
        });
        self
    }

    pub fn with_latency(mut self, latency_ms: u64, jitter_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self.jitter_ms = jitter_ms;
        self
    }
}

/// A network fixture file: devices plus behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimFixture {
    pub devices: Vec<SimDevice>,
    pub behaviour: SimBehaviour,
}

// ─────────────────────────────────────────────────────────────────────────────
// Statistics
// ─────────────────────────────────────────────────────────────────────────────

/// Request counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub who_is: usize,
    pub read_property: usize,
    pub read_property_multiple: usize,
    pub write_property: usize,
    /// Most requests observed in flight at once
    pub peak_in_flight: usize,
}

#[derive(Default)]
struct Counters {
    who_is: AtomicUsize,
    read_property: AtomicUsize,
    read_property_multiple: AtomicUsize,
    write_property: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// A completed WriteProperty
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub device_id: u32,
    pub object: ObjectId,
    pub property_id: u32,
    pub values: Vec<PropertyValue>,
    pub priority: u8,
}

// ─────────────────────────────────────────────────────────────────────────────
// Simulated Network
// ─────────────────────────────────────────────────────────────────────────────

pub struct SimulatedNetwork {
    devices: Vec<SimDevice>,
    objects: HashMap<u32, HashSet<ObjectId>>,
    properties: DashMap<PropertyAddress, Vec<PropertyValue>>,
    behaviour: SimBehaviour,
    i_am_tx: broadcast::Sender<IAm>,
    counters: Counters,
    writes: Mutex<Vec<WriteRecord>>,
}

impl SimulatedNetwork {
    pub fn new(devices: Vec<SimDevice>) -> Self {
        Self::with_behaviour(devices, SimBehaviour::default())
    }

    pub fn with_behaviour(devices: Vec<SimDevice>, behaviour: SimBehaviour) -> Self {
        let properties = DashMap::new();
        let mut objects = HashMap::new();

        for device in &devices {
            let known: &mut HashSet<ObjectId> = objects.entry(device.device_id).or_default();
            for object in std::iter::once(device.device_object()).chain(device.objects.iter().cloned()) {
                known.insert(object.id);
                for (property_id, values) in object.properties {
                    let key = PropertyAddress {
                        device_id: device.device_id,
                        object: object.id,
                        property_id,
                    };
                    properties.insert(key, values);
                }
            }
        }

        let (i_am_tx, _) = broadcast::channel(I_AM_CHANNEL_CAPACITY);
        Self {
            devices,
            objects,
            properties,
            behaviour,
            i_am_tx,
            counters: Counters::default(),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn from_fixture(fixture: SimFixture) -> Self {
        Self::with_behaviour(fixture.devices, fixture.behaviour)
    }

    pub fn stats(&self) -> SimStats {
        SimStats {
            who_is: self.counters.who_is.load(Ordering::SeqCst),
            read_property: self.counters.read_property.load(Ordering::SeqCst),
            read_property_multiple: self.counters.read_property_multiple.load(Ordering::SeqCst),
            write_property: self.counters.write_property.load(Ordering::SeqCst),
            peak_in_flight: self.counters.peak_in_flight.load(Ordering::SeqCst),
        }
    }

    /// Every write accepted so far, in arrival order
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().clone()
    }

    /// Current values of a property
    pub fn property(&self, device_id: u32, object: ObjectId, property_id: u32) -> Option<Vec<PropertyValue>> {
        self.properties
            .get(&PropertyAddress {
                device_id,
                object,
                property_id,
            })
            .map(|entry| entry.value().clone())
    }

    fn resolve(&self, address: &AddressSpec) -> ClientResult<u32> {
        self.devices
            .iter()
            .find(|d| d.answers(address))
            .map(|d| d.device_id)
            .ok_or(ClientError::Timeout)
    }

    async fn round_trip(&self) {
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let jitter = if self.behaviour.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.behaviour.jitter_ms)
        } else {
            0
        };
        let delay = Duration::from_millis(self.behaviour.latency_ms + jitter);
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }

        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn lookup(&self, device_id: u32, object: ObjectId, property: PropertyRef) -> Result<Vec<PropertyValue>, ProtocolError> {
        let known = self
            .objects
            .get(&device_id)
            .is_some_and(|objects| objects.contains(&object));
        if !known {
            return Err(ProtocolError::unknown_object());
        }

        let key = PropertyAddress {
            device_id,
            object,
            property_id: property.id,
        };
        let values = self
            .properties
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(ProtocolError::unknown_property)?;

        match property.index {
            None => Ok(values),
            Some(0) => Ok(vec![PropertyValue::Unsigned(values.len() as u64)]),
            Some(index) => values
                .get(index as usize - 1)
                .cloned()
                .map(|value| vec![value])
                .ok_or_else(ProtocolError::invalid_array_index),
        }
    }

    fn is_failing_read(&self, device_id: u32, object: ObjectId, property_id: u32) -> bool {
        self.behaviour.failing_reads.contains(&PropertyAddress {
            device_id,
            object,
            property_id,
        })
    }
}

#[async_trait]
impl BacnetClient for SimulatedNetwork {
    async fn who_is(&self, request: WhoIsRequest) -> ClientResult<()> {
        self.counters.who_is.fetch_add(1, Ordering::SeqCst);
        for device in &self.devices {
            if request.matches(device.device_id, device.network) {
                let _ = self.i_am_tx.send(device.i_am());
            }
        }
        Ok(())
    }

    fn subscribe_i_am(&self) -> broadcast::Receiver<IAm> {
        self.i_am_tx.subscribe()
    }

    async fn read_property(
        &self,
        address: &AddressSpec,
        object: ObjectId,
        property_id: u32,
        options: ReadOptions,
    ) -> ClientResult<PropertyResult> {
        self.counters.read_property.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await;

        let device_id = self.resolve(address)?;
        if self.is_failing_read(device_id, object, property_id) {
            return Err(ClientError::Timeout);
        }

        let property = PropertyRef {
            id: property_id,
            index: options.array_index,
        };
        let key = PropertyAddress {
            device_id,
            object,
            property_id,
        };
        if self.behaviour.empty_reads.contains(&key) {
            return Ok(PropertyResult::new(property, ReadValue::Values(Vec::new())));
        }
        let values = self.lookup(device_id, object, property).map_err(ClientError::Protocol)?;
        Ok(PropertyResult::new(property, ReadValue::Values(values)))
    }

    async fn read_property_multiple(
        &self,
        address: &AddressSpec,
        requests: &[ReadRequest],
        _max_message_size: Option<u32>,
    ) -> ClientResult<Vec<ObjectReadResult>> {
        self.counters.read_property_multiple.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await;

        let device_id = self.resolve(address)?;
        if self.behaviour.reject_multiple {
            return Err(ClientError::Reject("unrecognized service".to_string()));
        }

        let total: usize = requests.iter().map(|r| r.properties.len()).sum();
        if self.behaviour.multiple_read_limit.is_some_and(|limit| total > limit) {
            return Err(ClientError::Abort("segmentation not supported".to_string()));
        }

        let touches_failing = requests.iter().any(|r| {
            r.properties
                .iter()
                .any(|p| self.is_failing_read(device_id, r.object, p.id))
        });
        if touches_failing {
            return Err(ClientError::Timeout);
        }

        Ok(requests
            .iter()
            .map(|request| ObjectReadResult {
                object: request.object,
                values: request
                    .properties
                    .iter()
                    .map(|property| {
                        let value = match self.lookup(device_id, request.object, *property) {
                            Ok(values) => ReadValue::Values(values),
                            Err(error) => ReadValue::Error(error),
                        };
                        PropertyResult::new(*property, value)
                    })
                    .collect(),
            })
            .collect())
    }

    async fn write_property(
        &self,
        address: &AddressSpec,
        object: ObjectId,
        property_id: u32,
        values: Vec<PropertyValue>,
        priority: u8,
    ) -> ClientResult<()> {
        self.counters.write_property.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await;

        let device_id = self.resolve(address)?;
        let key = PropertyAddress {
            device_id,
            object,
            property_id,
        };
        if self.behaviour.failing_writes.contains(&key) {
            return Err(ClientError::Protocol(ProtocolError::new(
                error_class::PROPERTY,
                error_code::WRITE_ACCESS_DENIED,
            )));
        }
        self.lookup(device_id, object, PropertyRef::new(property_id))
            .map_err(ClientError::Protocol)?;

        if values.first().is_some_and(|v| !v.is_null()) {
            self.properties.insert(key, values.clone());
        }
        tracing::trace!(device_id, object = %object, property_id, priority, "Simulated write");
        self.writes.lock().push(WriteRecord {
            device_id,
            object,
            property_id,
            values,
            priority,
        });
        Ok(())
    }
}
