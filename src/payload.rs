//! Setup outcome broadcast from the root rank to the whole group.

use crate::error::ErrorReport;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Everything a rank needs to execute its share of the transformation.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SetupOutcome {
    /// Fragment-id set of the input datacube
    pub fragment_ids: String,
    /// Identifier of the output datacube
    pub output_datacube_id: i64,
    /// Whether the output measure is compressed
    pub compressed: bool,
    /// Whether fragments collapse rows
    pub explicit_size_update: bool,
    /// Number of input rows folded into one output row
    pub explicit_size: u64,
    /// Number of dimension placeholders in the query
    pub dim_ref_count: u64,
    /// Byte length of the dimension array sent in a second broadcast
    pub dim_array_len: u64,
    /// Datatype of the output measure
    pub measure_type: String,
    /// Query run against every fragment
    pub query: String,
    /// Elements per row expected if the implicit dimensions are unchanged
    pub predicted_elements: u64,
}

/// Setup result as seen by every rank.
pub type BroadcastPayload = Result<SetupOutcome, ErrorReport>;

/// Payload (de)serialisation error
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("failed to encode setup payload")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode setup payload")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("setup payload has {0} trailing bytes")]
    TrailingBytes(usize),
}

/// Encode a payload for broadcasting.
pub fn encode(payload: &BroadcastPayload) -> Result<Bytes, PayloadError> {
    let bytes = bincode::serde::encode_to_vec(payload, bincode::config::standard())?;
    Ok(bytes.into())
}

/// Decode a broadcast payload.
pub fn decode(bytes: &[u8]) -> Result<BroadcastPayload, PayloadError> {
    let (payload, read): (BroadcastPayload, _) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    if read != bytes.len() {
        return Err(PayloadError::TrailingBytes(bytes.len() - read));
    }
    Ok(payload)
}
