//! Shared domain types for the job layer

use serde::{Deserialize, Serialize};

use crate::bacnet::{AddressSpec, ObjectId};

/// Separator between device and point names in point ids
pub const POINT_ID_SEPARATOR: char = '.';

/// Build the `deviceName.pointName` id of a point
pub fn point_id(device_name: &str, point_name: &str) -> String {
    format!("{device_name}{POINT_ID_SEPARATOR}{point_name}")
}

/// A validated device record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    #[serde(rename = "deviceName")]
    pub name: String,
    pub device_id: u32,
    pub network: Option<u16>,
    /// IP address with optional port
    pub address: String,
    pub link_address: Option<Vec<u8>>,
    pub segmentation: Option<u32>,
    pub max_message_size: Option<u32>,
    pub vendor_id: u32,
}

impl Device {
    /// Where requests for this device are sent
    pub fn address_spec(&self) -> AddressSpec {
        match (self.network, &self.link_address) {
            (Some(network), Some(link)) if !link.is_empty() => AddressSpec::Routed {
                address: self.address.clone(),
                network,
                link_address: link.clone(),
            },
            _ => AddressSpec::Direct {
                address: self.address.clone(),
            },
        }
    }

    pub fn object(&self) -> ObjectId {
        ObjectId::device(self.device_id)
    }
}

/// A validated point record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointDescriptor {
    pub device_name: String,
    pub point_name: String,
    pub object_type: u32,
    pub object_instance: u32,
    pub property_id: u32,
    /// Application tag used when writing
    pub value_type: u8,
    /// Last known value, informational
    pub value: serde_json::Value,
    /// Formatting descriptor, see `facets`
    pub facets: String,
    /// Write priority 1 to 16; 0 means the point is not writable
    pub priority: u8,
}

impl PointDescriptor {
    pub fn id(&self) -> String {
        point_id(&self.device_name, &self.point_name)
    }

    pub fn object(&self) -> ObjectId {
        ObjectId::new(self.object_type, self.object_instance)
    }
}

/// Which objects point discovery reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverMode {
    /// Analog, binary and multi-state objects only
    #[default]
    Basic,
    /// Every object in the object list
    Full,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(network: Option<u16>, link_address: Option<Vec<u8>>) -> Device {
        Device {
            name: "BMS".to_string(),
            device_id: 1,
            network,
            address: "192.168.1.100".to_string(),
            link_address,
            segmentation: None,
            max_message_size: Some(1476),
            vendor_id: 36,
        }
    }

    #[test]
    fn test_address_spec() {
        assert_eq!(
            device(None, None).address_spec(),
            AddressSpec::Direct {
                address: "192.168.1.100".to_string()
            }
        );
        assert_eq!(
            device(Some(5), Some(vec![7])).address_spec(),
            AddressSpec::Routed {
                address: "192.168.1.100".to_string(),
                network: 5,
                link_address: vec![7],
            }
        );
        assert!(matches!(
            device(Some(5), None).address_spec(),
            AddressSpec::Direct { .. }
        ));
    }

    #[test]
    fn test_device_serializes_camel_case() {
        let json = serde_json::to_value(device(None, None)).unwrap();
        assert_eq!(json["deviceName"], "BMS");
        assert_eq!(json["maxMessageSize"], 1476);
        assert_eq!(json["network"], serde_json::Value::Null);
    }
}
