pub mod auth;

pub use auth::{auth_middleware, caller_from_headers, Caller, Claims};
