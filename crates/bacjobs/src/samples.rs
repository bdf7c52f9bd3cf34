//! Example inputs, quoted in invalid-input error details so callers can see
//! the expected shape.

use serde_json::{Value, json};

/// One device record
pub fn sample_devices() -> Value {
    json!([{
        "deviceName": "BMS",
        "deviceId": 1,
        "network": null,
        "address": "192.168.1.100",
        "linkAddress": null,
        "segmentation": 0,
        "maxMessageSize": 1476,
        "vendorId": 36
    }])
}

/// One point record on the sample device
pub fn sample_points() -> Value {
    json!([{
        "deviceName": "BMS",
        "pointName": "VAV_1_ZoneTemp",
        "objectType": 2,
        "objectInstance": 96,
        "propertyId": 85,
        "valueType": 4,
        "value": 21.5,
        "facets": "unit:°C;precision:1",
        "priority": 0
    }])
}

/// A write map keyed by `deviceName.pointName`
pub fn sample_write_points() -> Value {
    json!({
        "Device_1.Zone_Temp_SP": 21.5,
        "Device_2.Zone_Temp_SP": 21.5
    })
}
