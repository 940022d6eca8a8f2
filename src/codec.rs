//! Byte payloads at the typed boundary.
//!
//! The runtime moves opaque bytes; the typed handles encode requests and
//! decode responses here. Failures become statuses, never panics.

use crate::status::Status;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Marker for types that can cross the wire. Blanket-implemented for every
/// serde-serializable, thread-safe type.
pub trait Message: Serialize + DeserializeOwned + Send + 'static {}

impl<T: Serialize + DeserializeOwned + Send + 'static> Message for T {}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Status> {
    bincode::serialize(value).map_err(|e| Status::internal(format!("message encoding failed: {e}")))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Status> {
    bincode::deserialize(bytes)
        .map_err(|e| Status::invalid_argument(format!("message decoding failed: {e}")))
}
