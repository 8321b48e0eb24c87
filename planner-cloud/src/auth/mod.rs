//! Authentication middleware for API callers

pub mod caller_auth;

pub use caller_auth::{Caller, caller_auth_middleware};
