//! Wire encoding of [`AvailabilityUpdate`] on the upstream channel.
//!
//! The channel carries the JSON encoding of the update (the same shape the
//! HTTP API accepts), so other producers such as a change-data-capture
//! pipeline can publish without sharing Rust types.

use crate::update::{AvailabilityUpdate, ValidationError};
use thiserror::Error;

/// Errors from decoding or encoding an upstream message.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The payload is not a JSON `AvailabilityUpdate`.
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload decoded but a required field is empty.
    #[error("Invalid update: {0}")]
    Invalid(#[from] ValidationError),
}

/// Decode and validate a raw upstream payload.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] if the bytes are not a JSON update and
/// [`DecodeError::Invalid`] if the update has an empty `eventId`.
pub fn decode(payload: &[u8]) -> Result<AvailabilityUpdate, DecodeError> {
    let update: AvailabilityUpdate = serde_json::from_slice(payload)?;
    update.validate()?;
    Ok(update)
}

/// Encode an update for publishing.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] if serialization fails.
pub fn encode(update: &AvailabilityUpdate) -> Result<Vec<u8>, DecodeError> {
    Ok(serde_json::to_vec(update)?)
}
