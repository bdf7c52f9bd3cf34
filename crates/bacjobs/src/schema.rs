//! Input record validation
//!
//! Jobs receive their inputs as JSON. These validators turn one record into
//! a typed `Device` or `PointDescriptor`, or explain what is wrong with it.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

use serde_json::{Map, Value, json};

use crate::bacnet::{ObjectId, PropertyValue};
use crate::types::{Device, PointDescriptor};

/// Highest valid device instance
pub const MAX_DEVICE_INSTANCE: u64 = 4_194_302;

/// Highest routable network number
pub const MAX_NETWORK_NUMBER: u64 = 65_534;

/// Highest command priority
pub const MAX_PRIORITY: u64 = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Schema Error
// ─────────────────────────────────────────────────────────────────────────────

/// Why a record failed validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("value must be an object")]
    NotAnObject,

    #[error("\"{0}\" is required")]
    Missing(String),

    #[error("\"{field}\" {message}")]
    Invalid { field: String, message: String },
}

impl SchemaError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Error detail payload naming the offending record
    pub fn detail(&self, key: &str, record: &Value) -> Value {
        json!({ key: record, "error": self.to_string() })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Field Readers
// ─────────────────────────────────────────────────────────────────────────────

fn as_object(record: &Value) -> Result<&Map<String, Value>, SchemaError> {
    record.as_object().ok_or(SchemaError::NotAnObject)
}

/// String field, `default` when absent
fn string_field(map: &Map<String, Value>, field: &str, default: &str) -> Result<String, SchemaError> {
    match map.get(field) {
        None => Ok(default.to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(SchemaError::invalid(field, "must be a string")),
    }
}

/// Integer field in `0..=max`; `None` when absent or null and `nullable`
fn integer_field(
    map: &Map<String, Value>,
    field: &str,
    max: u64,
    nullable: bool,
) -> Result<Option<u64>, SchemaError> {
    let value = match map.get(field) {
        None | Some(Value::Null) if nullable => return Ok(None),
        None => return Err(SchemaError::Missing(field.to_string())),
        Some(value) => value,
    };
    let number = value
        .as_u64()
        .ok_or_else(|| SchemaError::invalid(field, "must be a non-negative integer"))?;
    if number > max {
        return Err(SchemaError::invalid(field, format!("must be less than or equal to {max}")));
    }
    Ok(Some(number))
}

fn required_integer(map: &Map<String, Value>, field: &str, max: u64) -> Result<u64, SchemaError> {
    integer_field(map, field, max, false)?.ok_or_else(|| SchemaError::Missing(field.to_string()))
}

fn validate_address(address: &str) -> bool {
    address.parse::<IpAddr>().is_ok() || address.parse::<SocketAddr>().is_ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Validators
// ─────────────────────────────────────────────────────────────────────────────

/// Validate a device record
pub fn validate_device(record: &Value) -> Result<Device, SchemaError> {
    let map = as_object(record)?;

    let address = match map.get("address") {
        None | Some(Value::Null) => return Err(SchemaError::Missing("address".to_string())),
        Some(Value::String(s)) if validate_address(s) => s.clone(),
        Some(_) => return Err(SchemaError::invalid("address", "must be a valid ip address with optional port")),
    };

    let link_address = match map.get("linkAddress") {
        None | Some(Value::Null) => None,
        Some(Value::Array(bytes)) => Some(
            bytes
                .iter()
                .map(|b| b.as_u64().filter(|b| *b <= 255).map(|b| b as u8))
                .collect::<Option<Vec<u8>>>()
                .ok_or_else(|| SchemaError::invalid("linkAddress", "must be an array of bytes"))?,
        ),
        Some(_) => return Err(SchemaError::invalid("linkAddress", "must be an array or null")),
    };

    Ok(Device {
        name: string_field(map, "deviceName", "")?,
        device_id: required_integer(map, "deviceId", MAX_DEVICE_INSTANCE)? as u32,
        network: integer_field(map, "network", MAX_NETWORK_NUMBER, true)?.map(|n| n as u16),
        address,
        link_address,
        segmentation: integer_field(map, "segmentation", u64::from(u32::MAX), true)?.map(|n| n as u32),
        max_message_size: integer_field(map, "maxMessageSize", u64::from(u32::MAX), true)?
            .map(|n| n as u32),
        vendor_id: required_integer(map, "vendorId", u64::from(u32::MAX))? as u32,
    })
}

/// Validate a point record
pub fn validate_point(record: &Value) -> Result<PointDescriptor, SchemaError> {
    let map = as_object(record)?;
    let max_u32 = u64::from(u32::MAX);

    Ok(PointDescriptor {
        device_name: string_field(map, "deviceName", "")?,
        point_name: string_field(map, "pointName", "")?,
        object_type: required_integer(map, "objectType", max_u32)? as u32,
        object_instance: required_integer(map, "objectInstance", max_u32)? as u32,
        property_id: required_integer(map, "propertyId", max_u32)? as u32,
        value_type: required_integer(map, "valueType", u64::from(u8::MAX))? as u8,
        value: map.get("value").cloned().unwrap_or_else(|| Value::String(String::new())),
        facets: string_field(map, "facets", "")?,
        priority: integer_field(map, "priority", MAX_PRIORITY, true)?.unwrap_or(0) as u8,
    })
}

/// Validate a write map of point id to number, boolean or null
pub fn validate_write_values(record: &Value) -> Result<BTreeMap<String, Value>, SchemaError> {
    let map = as_object(record)?;
    map.iter()
        .map(|(id, value)| match value {
            Value::Number(_) | Value::Bool(_) | Value::Null => Ok((id.clone(), value.clone())),
            _ => Err(SchemaError::invalid(id, "must be a number, boolean or null")),
        })
        .collect()
}

/// Validate an object-list entry
pub fn validate_object_entry(entry: &PropertyValue) -> Result<ObjectId, SchemaError> {
    entry
        .as_object_id()
        .ok_or_else(|| SchemaError::invalid("objectList", "entries must be object identifiers"))
}
