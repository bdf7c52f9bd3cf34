//! BACnet protocol types used by the job layer

use std::fmt;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Enumerations
// ─────────────────────────────────────────────────────────────────────────────

/// BACnet object type numbers
pub mod object_type {
    pub const ANALOG_INPUT: u32 = 0;
    pub const ANALOG_OUTPUT: u32 = 1;
    pub const ANALOG_VALUE: u32 = 2;
    pub const BINARY_INPUT: u32 = 3;
    pub const BINARY_OUTPUT: u32 = 4;
    pub const BINARY_VALUE: u32 = 5;
    pub const DEVICE: u32 = 8;
    pub const MULTI_STATE_INPUT: u32 = 13;
    pub const MULTI_STATE_OUTPUT: u32 = 14;
    pub const MULTI_STATE_VALUE: u32 = 19;

    pub fn is_analog(object_type: u32) -> bool {
        matches!(object_type, ANALOG_INPUT | ANALOG_OUTPUT | ANALOG_VALUE)
    }

    pub fn is_binary(object_type: u32) -> bool {
        matches!(object_type, BINARY_INPUT | BINARY_OUTPUT | BINARY_VALUE)
    }

    pub fn is_multi_state(object_type: u32) -> bool {
        matches!(
            object_type,
            MULTI_STATE_INPUT | MULTI_STATE_OUTPUT | MULTI_STATE_VALUE
        )
    }

    /// Types that basic discovery turns into points
    pub fn is_supported(object_type: u32) -> bool {
        is_analog(object_type) || is_binary(object_type) || is_multi_state(object_type)
    }
}

/// BACnet property identifiers
pub mod property_id {
    pub const ACTIVE_TEXT: u32 = 4;
    pub const INACTIVE_TEXT: u32 = 46;
    pub const OBJECT_LIST: u32 = 76;
    pub const OBJECT_NAME: u32 = 77;
    pub const PRESENT_VALUE: u32 = 85;
    pub const STATE_TEXT: u32 = 110;
    pub const UNITS: u32 = 117;
}

/// Application tags carried by property values
pub mod application_tag {
    pub const NULL: u8 = 0;
    pub const BOOLEAN: u8 = 1;
    pub const UNSIGNED_INTEGER: u8 = 2;
    pub const SIGNED_INTEGER: u8 = 3;
    pub const REAL: u8 = 4;
    pub const DOUBLE: u8 = 5;
    pub const CHARACTER_STRING: u8 = 7;
    pub const ENUMERATED: u8 = 9;
    pub const OBJECT_IDENTIFIER: u8 = 12;
}

pub mod error_class {
    pub const OBJECT: u32 = 1;
    pub const PROPERTY: u32 = 2;
}

pub mod error_code {
    pub const UNKNOWN_OBJECT: u32 = 31;
    pub const UNKNOWN_PROPERTY: u32 = 32;
    pub const WRITE_ACCESS_DENIED: u32 = 40;
    pub const INVALID_ARRAY_INDEX: u32 = 42;
}

/// Network number addressing every network
pub const GLOBAL_NETWORK: u16 = 65535;

// ─────────────────────────────────────────────────────────────────────────────
// Object and Property References
// ─────────────────────────────────────────────────────────────────────────────

/// Object identifier: (object type, instance)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    #[serde(rename = "type")]
    pub object_type: u32,
    pub instance: u32,
}

impl ObjectId {
    pub const fn new(object_type: u32, instance: u32) -> Self {
        Self {
            object_type,
            instance,
        }
    }

    pub const fn device(instance: u32) -> Self {
        Self::new(object_type::DEVICE, instance)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.instance)
    }
}

/// Property to read, optionally a single array element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyRef {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

impl PropertyRef {
    pub const fn new(id: u32) -> Self {
        Self { id, index: None }
    }
}

/// Properties to read from one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub object: ObjectId,
    pub properties: Vec<PropertyRef>,
}

impl ReadRequest {
    pub fn new(object: ObjectId, properties: impl IntoIterator<Item = u32>) -> Self {
        Self {
            object,
            properties: properties.into_iter().map(PropertyRef::new).collect(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Property Values
// ─────────────────────────────────────────────────────────────────────────────

/// A tagged BACnet application value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum PropertyValue {
    Null,
    Boolean(bool),
    Unsigned(u64),
    Signed(i64),
    Real(f32),
    Double(f64),
    CharacterString(String),
    Enumerated(u32),
    ObjectIdentifier(ObjectId),
}

/// A JSON value that cannot be encoded with the requested application tag
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot encode {value} as application tag {tag}")]
pub struct ValueError {
    pub tag: u8,
    pub value: serde_json::Value,
}

impl PropertyValue {
    /// Application tag number
    pub fn tag(&self) -> u8 {
        match self {
            Self::Null => application_tag::NULL,
            Self::Boolean(_) => application_tag::BOOLEAN,
            Self::Unsigned(_) => application_tag::UNSIGNED_INTEGER,
            Self::Signed(_) => application_tag::SIGNED_INTEGER,
            Self::Real(_) => application_tag::REAL,
            Self::Double(_) => application_tag::DOUBLE,
            Self::CharacterString(_) => application_tag::CHARACTER_STRING,
            Self::Enumerated(_) => application_tag::ENUMERATED,
            Self::ObjectIdentifier(_) => application_tag::OBJECT_IDENTIFIER,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric reading of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Unsigned(v) => Some(*v as f64),
            Self::Signed(v) => Some(*v as f64),
            Self::Real(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            Self::Enumerated(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::CharacterString(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Self::ObjectIdentifier(id) => Some(*id),
            _ => None,
        }
    }

    /// Plain JSON form of the value, without its tag
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Unsigned(v) => serde_json::json!(v),
            Self::Signed(v) => serde_json::json!(v),
            Self::Real(v) => serde_json::json!(v),
            Self::Double(v) => serde_json::json!(v),
            Self::CharacterString(s) => serde_json::Value::String(s.clone()),
            Self::Enumerated(v) => serde_json::json!(v),
            Self::ObjectIdentifier(id) => serde_json::json!(id),
        }
    }

    /// Encode a JSON write value with the given application tag
    ///
    /// `null` always encodes as NULL, which relinquishes a commanded priority.
    pub fn from_json(tag: u8, value: &serde_json::Value) -> Result<Self, ValueError> {
        use serde_json::Value;

        let invalid = || ValueError {
            tag,
            value: value.clone(),
        };
        if value.is_null() {
            return Ok(Self::Null);
        }

        let numeric = match value {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Number(n) => n.as_f64(),
            _ => None,
        };

        match tag {
            application_tag::NULL => Ok(Self::Null),
            application_tag::BOOLEAN => numeric.map(|v| Self::Boolean(v != 0.0)).ok_or_else(invalid),
            application_tag::UNSIGNED_INTEGER => numeric
                .filter(|v| *v >= 0.0 && v.fract() == 0.0)
                .map(|v| Self::Unsigned(v as u64))
                .ok_or_else(invalid),
            application_tag::SIGNED_INTEGER => numeric
                .filter(|v| v.fract() == 0.0)
                .map(|v| Self::Signed(v as i64))
                .ok_or_else(invalid),
            application_tag::REAL => numeric.map(|v| Self::Real(v as f32)).ok_or_else(invalid),
            application_tag::DOUBLE => numeric.map(Self::Double).ok_or_else(invalid),
            application_tag::ENUMERATED => numeric
                .filter(|v| *v >= 0.0 && v.fract() == 0.0 && *v <= f64::from(u32::MAX))
                .map(|v| Self::Enumerated(v as u32))
                .ok_or_else(invalid),
            application_tag::CHARACTER_STRING => match value {
                Value::String(s) => Ok(Self::CharacterString(s.clone())),
                Value::Number(n) => Ok(Self::CharacterString(n.to_string())),
                Value::Bool(b) => Ok(Self::CharacterString(b.to_string())),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Read Results
// ─────────────────────────────────────────────────────────────────────────────

/// Error returned by a device for one property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolError {
    pub error_class: u32,
    pub error_code: u32,
}

impl ProtocolError {
    pub const fn new(error_class: u32, error_code: u32) -> Self {
        Self {
            error_class,
            error_code,
        }
    }

    pub const fn unknown_object() -> Self {
        Self::new(error_class::OBJECT, error_code::UNKNOWN_OBJECT)
    }

    pub const fn unknown_property() -> Self {
        Self::new(error_class::PROPERTY, error_code::UNKNOWN_PROPERTY)
    }

    pub const fn invalid_array_index() -> Self {
        Self::new(error_class::PROPERTY, error_code::INVALID_ARRAY_INDEX)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class {}, code {}", self.error_class, self.error_code)
    }
}

/// Either a list of values or a protocol error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadValue {
    Values(Vec<PropertyValue>),
    Error(ProtocolError),
}

impl ReadValue {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn values(&self) -> &[PropertyValue] {
        match self {
            Self::Values(values) => values,
            Self::Error(_) => &[],
        }
    }

    /// First value, unless the read failed or came back empty
    pub fn first(&self) -> Option<&PropertyValue> {
        self.values().first()
    }
}

/// The value (or error) of one property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyResult {
    pub property_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_index: Option<u32>,
    pub value: ReadValue,
}

impl PropertyResult {
    pub fn new(property: PropertyRef, value: ReadValue) -> Self {
        Self {
            property_id: property.id,
            array_index: property.index,
            value,
        }
    }
}

/// All property results for one object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectReadResult {
    pub object: ObjectId,
    pub values: Vec<PropertyResult>,
}

impl ObjectReadResult {
    pub fn new(object: ObjectId) -> Self {
        Self {
            object,
            values: Vec::new(),
        }
    }

    /// Result for a property, if it was read
    pub fn property(&self, property_id: u32) -> Option<&ReadValue> {
        self.values
            .iter()
            .find(|v| v.property_id == property_id)
            .map(|v| &v.value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Discovery
// ─────────────────────────────────────────────────────────────────────────────

/// Who-Is broadcast parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhoIsRequest {
    /// Target network; `None` or 65535 means every network
    pub network: Option<u16>,
    pub low_limit: Option<u32>,
    pub high_limit: Option<u32>,
}

impl WhoIsRequest {
    /// Whether a device on `network` with instance `device_id` should answer
    pub fn matches(&self, device_id: u32, network: Option<u16>) -> bool {
        let in_range = self.low_limit.is_none_or(|low| device_id >= low)
            && self.high_limit.is_none_or(|high| device_id <= high);
        let on_network = match self.network {
            None | Some(GLOBAL_NETWORK) => true,
            Some(target) => network == Some(target),
        };
        in_range && on_network
    }
}

/// I-Am announcement from a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IAm {
    pub device_id: u32,
    /// IP address with optional port
    pub address: String,
    /// Source network for routed devices
    pub network: Option<u16>,
    /// Source MAC for routed devices
    pub link_address: Option<Vec<u8>>,
    pub max_message_size: Option<u32>,
    pub segmentation: Option<u32>,
    pub vendor_id: u32,
}
