//! Billing provider seam
//!
//! The lifecycle engine asks the provider to approve a new subscription
//! before committing it, and notifies it (best effort) about cancellations,
//! reactivations and plan changes. A create that is approved (or might have
//! been) but not committed locally is voided.

mod logging;
mod scripted;
mod stripe;

use async_trait::async_trait;
use shared::subscription::Owner;
use thiserror::Error;

use crate::config::Config;

pub use logging::LoggingGateway;
pub use scripted::{BillingCall, ScriptedGateway};
pub use stripe::StripeGateway;

/// What the provider needs to charge for a new subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingRequest {
    pub subscription_id: i64,
    pub owner: Owner,
    pub plan_id: i64,
    pub sport_id: i64,
}

#[derive(Debug, Clone, Error)]
pub enum BillingError {
    /// Provider could not be reached or answered with a server error
    #[error("billing provider unavailable: {0}")]
    Unavailable(String),

    /// Provider rejected the call for a reason other than a declined payment
    #[error("billing provider error: {0}")]
    Provider(String),
}

#[async_trait]
pub trait BillingGateway: Send + Sync {
    /// Ask the provider to start billing. `Ok(false)` means the payment was declined.
    async fn create_subscription(&self, request: &BillingRequest) -> Result<bool, BillingError>;

    async fn change_plan(&self, subscription_id: i64, new_plan_id: i64)
    -> Result<(), BillingError>;

    async fn cancel_subscription(&self, subscription_id: i64) -> Result<(), BillingError>;

    async fn reactivate_subscription(&self, subscription_id: i64) -> Result<(), BillingError>;

    /// End a subscription created for `request` immediately, without
    /// billing the current period. Used when the create was not committed
    /// locally. A subscription the provider never created is not an error.
    async fn void_subscription(&self, request: &BillingRequest) -> Result<(), BillingError>;
}

/// Pick the gateway for this deployment.
pub fn from_config(config: &Config) -> Result<Box<dyn BillingGateway>, String> {
    match &config.stripe_secret_key {
        Some(key) => Ok(Box::new(StripeGateway::new(
            key.clone(),
            config.stripe_price_ids.clone(),
            config.billing_timeout,
        )?)),
        None if config.environment == "production" => {
            Err("a billing provider is required in production".into())
        }
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set, billing calls are logged and approved");
            Ok(Box::new(LoggingGateway))
        }
    }
}
