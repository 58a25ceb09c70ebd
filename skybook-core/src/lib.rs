pub mod amount;
pub mod backend;
pub mod clock;
pub mod identity;
pub mod storage;

pub use backend::{BookingBackend, BookingPayload, MockBookingBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use identity::{IdentityProvider, StaticIdentity, TabIdentity};
pub use storage::{KeyValueStore, MemoryStore, SessionStorage};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Backend request to {endpoint} failed: {message}")]
    BackendError {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },
    #[error("Identity verification failed: {0}")]
    IdentityError(String),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl CoreError {
    pub fn backend(endpoint: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        CoreError::BackendError {
            endpoint: endpoint.into(),
            status,
            message: message.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
