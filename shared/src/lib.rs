//! Shared types for the planner services
//!
//! Error system, subscription domain types and small utilities used by
//! the cloud service and its API clients.

pub mod error;
pub mod subscription;
pub mod util;

// Re-exports
pub use axum::Json;
pub use http;
pub use serde::{Deserialize, Serialize};
