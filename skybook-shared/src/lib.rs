pub mod models;
pub mod pii;

pub use models::events::{ResetReason, SessionEvent};
pub use pii::Masked;
