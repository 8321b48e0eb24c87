use async_trait::async_trait;

use super::{BillingError, BillingGateway, BillingRequest};

/// Approves everything and logs the call. Development only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingGateway;

#[async_trait]
impl BillingGateway for LoggingGateway {
    async fn create_subscription(&self, request: &BillingRequest) -> Result<bool, BillingError> {
        tracing::info!(
            subscription_id = request.subscription_id,
            owner = %request.owner,
            plan_id = request.plan_id,
            sport_id = request.sport_id,
            "Billing create (not forwarded)"
        );
        Ok(true)
    }

    async fn change_plan(
        &self,
        subscription_id: i64,
        new_plan_id: i64,
    ) -> Result<(), BillingError> {
        tracing::info!(subscription_id, new_plan_id, "Billing plan change (not forwarded)");
        Ok(())
    }

    async fn cancel_subscription(&self, subscription_id: i64) -> Result<(), BillingError> {
        tracing::info!(subscription_id, "Billing cancel (not forwarded)");
        Ok(())
    }

    async fn reactivate_subscription(&self, subscription_id: i64) -> Result<(), BillingError> {
        tracing::info!(subscription_id, "Billing reactivate (not forwarded)");
        Ok(())
    }

    async fn void_subscription(&self, request: &BillingRequest) -> Result<(), BillingError> {
        tracing::info!(
            subscription_id = request.subscription_id,
            "Billing void (not forwarded)"
        );
        Ok(())
    }
}
