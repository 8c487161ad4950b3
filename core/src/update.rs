//! The availability update payload.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Validation failures for an [`AvailabilityUpdate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The event identifier is empty or whitespace.
    #[error("eventId must not be empty")]
    EmptyEventId,
}

/// A capacity-availability update for one ticketed event.
///
/// This is a value type: it is never mutated after construction and two
/// updates are equal when all fields are equal. The relay treats the numbers
/// as opaque. Whether `available_capacity + reserved_count` is consistent is
/// the upstream system's concern.
///
/// Serialized with camelCase keys:
///
/// ```json
/// {"eventId":"event-1","availableCapacity":90,"reservedCount":10}
/// ```
///
/// Non-negativity is enforced by the unsigned field types, so a negative
/// count fails to deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityUpdate {
    /// Identifier of the ticketed event.
    pub event_id: String,
    /// Remaining sellable capacity.
    pub available_capacity: u32,
    /// Currently reserved or held capacity.
    pub reserved_count: u32,
}

impl AvailabilityUpdate {
    /// Create a new update.
    #[must_use]
    pub fn new(event_id: impl Into<String>, available_capacity: u32, reserved_count: u32) -> Self {
        Self {
            event_id: event_id.into(),
            available_capacity,
            reserved_count,
        }
    }

    /// Check field presence.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyEventId`] if `event_id` is blank.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.event_id.trim().is_empty() {
            return Err(ValidationError::EmptyEventId);
        }
        Ok(())
    }
}

impl fmt::Display for AvailabilityUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (available={}, reserved={})",
            self.event_id, self.available_capacity, self.reserved_count
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_camel_case_keys() {
        let update = AvailabilityUpdate::new("event-1", 90, 10);
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(
            json,
            r#"{"eventId":"event-1","availableCapacity":90,"reservedCount":10}"#
        );
    }

    #[test]
    fn rejects_negative_counts() {
        let result = serde_json::from_str::<AvailabilityUpdate>(
            r#"{"eventId":"event-1","availableCapacity":-1,"reservedCount":0}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_blank_event_id() {
        assert_eq!(
            AvailabilityUpdate::new("", 1, 0).validate(),
            Err(ValidationError::EmptyEventId)
        );
        assert_eq!(
            AvailabilityUpdate::new("   ", 1, 0).validate(),
            Err(ValidationError::EmptyEventId)
        );
        assert!(AvailabilityUpdate::new("event-1", 1, 0).validate().is_ok());
    }
}
