use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced by the location engine.
#[derive(Error, Debug)]
pub enum LocationError {
    /// The geocoding provider failed in a way the caller must see.
    /// Transient provider trouble during interactive flows degrades to
    /// empty results instead of raising this.
    #[error("Geocoding provider error: {0}")]
    Provider(String),

    #[error("Location permission denied")]
    PermissionDenied,

    /// No position fix within the configured wait.
    #[error("Timed out waiting for a position fix")]
    PositionTimeout,

    /// The freshest fix the provider could serve is older than allowed.
    #[error("Position fix is {age_secs}s old, older than the {max_age_secs}s limit")]
    StalePosition { age_secs: u64, max_age_secs: u64 },

    /// The candidate failed the delivery-eligibility check.
    #[error("Location not eligible for delivery: {reason}")]
    Ineligible { reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A candidate reached confirmation without a resolved coordinate.
    #[error("Location has no resolved coordinate")]
    MissingCoordinate,

    /// The requested action is not valid in the current picker phase.
    #[error("Cannot {action} while in state {from}")]
    InvalidState { from: String, action: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LocationError {
    pub fn provider(message: impl Into<String>) -> Self {
        LocationError::Provider(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        LocationError::InvalidInput(message.into())
    }
}
