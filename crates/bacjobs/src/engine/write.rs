//! Smart Write
//!
//! Writes a set of points on one device with bounded concurrency. Each value
//! is encoded with its point's application tag first; a value that cannot be
//! encoded fails that point without a request being sent.

use job_runtime::{RunOptions, RunnerError, Task, TaskOutcome, run_tasks};

use crate::bacnet::{BacnetClient, ClientError, ObjectId, PropertyValue, ValueError};
use crate::types::Device;

/// One property write
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    /// Point id, used to report the outcome
    pub id: String,
    pub object: ObjectId,
    pub property_id: u32,
    /// Application tag the value is encoded with
    pub value_type: u8,
    pub value: serde_json::Value,
    pub priority: u8,
}

/// Why a single write failed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Write every request to `device`
///
/// `on_complete` sees each outcome as it settles; outcomes are also returned
/// in request order.
pub async fn smart_write<F>(
    client: &dyn BacnetClient,
    device: &Device,
    requests: &[WriteRequest],
    max_concurrent: usize,
    on_complete: F,
) -> Result<Vec<TaskOutcome<(), WriteError>>, RunnerError>
where
    F: FnMut(&TaskOutcome<(), WriteError>),
{
    let address = device.address_spec();
    let address = &address;

    let tasks: Vec<Task<'_, (), WriteError>> = requests
        .iter()
        .map(|request| {
            Task::new(request.id.clone(), async move {
                let value = PropertyValue::from_json(request.value_type, &request.value)?;
                tracing::debug!(
                    device = %device.name,
                    point = %request.id,
                    priority = request.priority,
                    "Writing point"
                );
                client
                    .write_property(address, request.object, request.property_id, vec![value], request.priority)
                    .await?;
                Ok::<(), WriteError>(())
            })
        })
        .collect();

    run_tasks(tasks, RunOptions::new(max_concurrent), on_complete).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bacnet::sim::{SimBehaviour, SimulatedNetwork, demo_site};
    use crate::bacnet::{application_tag, object_type, property_id};
    use serde_json::json;

    fn bms() -> Device {
        Device {
            name: "BMS".to_string(),
            device_id: 1,
            network: None,
            address: "192.168.1.100".to_string(),
            link_address: None,
            segmentation: Some(0),
            max_message_size: Some(1476),
            vendor_id: 36,
        }
    }

    fn request(id: &str, object: ObjectId, value_type: u8, value: serde_json::Value) -> WriteRequest {
        WriteRequest {
            id: id.to_string(),
            object,
            property_id: property_id::PRESENT_VALUE,
            value_type,
            value,
            priority: 8,
        }
    }

    #[tokio::test]
    async fn test_writes_and_failures() {
        let damper = ObjectId::new(object_type::ANALOG_OUTPUT, 3);
        let enable = ObjectId::new(object_type::BINARY_OUTPUT, 2);
        let behaviour = SimBehaviour::default().with_failing_write(1, enable, property_id::PRESENT_VALUE);
        let network = SimulatedNetwork::with_behaviour(demo_site(), behaviour);

        let requests = vec![
            request("BMS.VAV_1_Damper", damper, application_tag::REAL, json!(60)),
            request("BMS.AHU_1_Enable", enable, application_tag::ENUMERATED, json!(true)),
            request("BMS.Broken", damper, application_tag::OBJECT_IDENTIFIER, json!(1)),
        ];

        let mut failed = Vec::new();
        let outcomes = smart_write(&network, &bms(), &requests, 1, |o| {
            if !o.is_ok() {
                failed.push(o.id.clone());
            }
        })
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_ok());
        assert!(matches!(outcomes[1].result, Err(WriteError::Client(_))));
        assert!(matches!(outcomes[2].result, Err(WriteError::Value(_))));
        assert_eq!(failed.len(), 2);

        // The unencodable value never reached the device
        assert_eq!(network.stats().write_property, 2);
        assert_eq!(
            network.property(1, damper, property_id::PRESENT_VALUE),
            Some(vec![PropertyValue::Real(60.0)])
        );
    }

    #[tokio::test]
    async fn test_null_relinquishes() {
        let damper = ObjectId::new(object_type::ANALOG_OUTPUT, 3);
        let network = SimulatedNetwork::new(demo_site());
        let requests = vec![request("BMS.VAV_1_Damper", damper, application_tag::REAL, json!(null))];

        smart_write(&network, &bms(), &requests, 1, |_| {}).await.unwrap();

        let writes = network.writes();
        assert_eq!(writes[0].values, vec![PropertyValue::Null]);
        assert_eq!(
            network.property(1, damper, property_id::PRESENT_VALUE),
            Some(vec![PropertyValue::Real(45.0)])
        );
    }
}
