//! planner-cloud - subscription lifecycle service
//!
//! - Creates billed subscriptions for users and organizations (one active per sport)
//! - Cancels, reactivates within the retention window, changes plans, extends terms
//! - Expires overdue subscriptions and applies scheduled plan changes in the background
//! - Gates team and member creation on the active plan's limits

pub mod api;
pub mod auth;
pub mod billing;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod quota;
pub mod state;
pub mod worker;
