//! BACnet client contract
//!
//! The jobs only ever talk to a device through this trait, so the protocol
//! stack underneath (a BACnet/IP socket, a simulated network) is pluggable.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::types::{
    IAm, ObjectId, ObjectReadResult, PropertyResult, PropertyValue, ProtocolError, ReadRequest,
    WhoIsRequest,
};

// ─────────────────────────────────────────────────────────────────────────────
// Client Error
// ─────────────────────────────────────────────────────────────────────────────

/// Failure of a whole request
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    #[error("Request timed out")]
    Timeout,

    #[error("Request aborted: {0}")]
    Abort(String),

    #[error("Request rejected: {0}")]
    Reject(String),

    #[error("Device returned error: {0}")]
    Protocol(ProtocolError),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type for client requests
pub type ClientResult<T> = Result<T, ClientError>;

// ─────────────────────────────────────────────────────────────────────────────
// Addressing
// ─────────────────────────────────────────────────────────────────────────────

/// Where to send a request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AddressSpec {
    /// Device reachable directly on the local BACnet/IP network
    Direct { address: String },

    /// Device behind a router: the router's IP plus the device's network and MAC
    Routed {
        address: String,
        network: u16,
        link_address: Vec<u8>,
    },
}

impl AddressSpec {
    /// IP address (with optional port) the request is sent to
    pub fn address(&self) -> &str {
        match self {
            Self::Direct { address } | Self::Routed { address, .. } => address,
        }
    }
}

impl fmt::Display for AddressSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { address } => write!(f, "{address}"),
            Self::Routed {
                address,
                network,
                link_address,
            } => write!(f, "{address} via network {network} mac {link_address:?}"),
        }
    }
}

/// Per-request options for ReadProperty
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Largest message the device accepts, when known
    pub max_message_size: Option<u32>,
    /// Array element to read
    pub array_index: Option<u32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Client Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Capabilities the jobs need from a BACnet client
#[async_trait]
pub trait BacnetClient: Send + Sync + 'static {
    /// Broadcast Who-Is. Answers arrive on `subscribe_i_am` receivers.
    async fn who_is(&self, request: WhoIsRequest) -> ClientResult<()>;

    /// Subscribe to inbound I-Am announcements
    fn subscribe_i_am(&self) -> broadcast::Receiver<IAm>;

    /// ReadProperty for one property of one object
    async fn read_property(
        &self,
        address: &AddressSpec,
        object: ObjectId,
        property_id: u32,
        options: ReadOptions,
    ) -> ClientResult<PropertyResult>;

    /// ReadPropertyMultiple for many properties of many objects.
    ///
    /// Rows come back in request order. Per-property failures appear as
    /// `ReadValue::Error` inside the rows rather than failing the request.
    async fn read_property_multiple(
        &self,
        address: &AddressSpec,
        requests: &[ReadRequest],
        max_message_size: Option<u32>,
    ) -> ClientResult<Vec<ObjectReadResult>>;

    /// WriteProperty at a command priority
    async fn write_property(
        &self,
        address: &AddressSpec,
        object: ObjectId,
        property_id: u32,
        values: Vec<PropertyValue>,
        priority: u8,
    ) -> ClientResult<()>;
}
