use skybook_core::CoreError;

use crate::roster::RosterError;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Invalid passenger roster: {0}")]
    Roster(#[from] RosterError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Segment {0} is not part of the current trip")]
    InactiveSegment(String),

    #[error("Unknown passenger: {0}")]
    UnknownPassenger(String),

    #[error("Booking backend rejected the request: {0}")]
    Backend(String),

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl From<CoreError> for BookingError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationError(msg) => BookingError::Validation(msg),
            CoreError::StorageError(msg) => BookingError::Storage(msg),
            CoreError::SerializationError(e) => BookingError::Storage(e.to_string()),
            err @ CoreError::BackendError { .. } => BookingError::Backend(skybook_core::backend::friendly_message(&err)),
            other => BookingError::Backend(other.to_string()),
        }
    }
}

pub type BookingResult<T> = Result<T, BookingError>;
