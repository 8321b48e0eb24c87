use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BillingError, BillingGateway, BillingRequest};

/// A call seen by [`ScriptedGateway`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingCall {
    Create(i64),
    ChangePlan { subscription_id: i64, plan_id: i64 },
    Cancel(i64),
    Reactivate(i64),
    Void(i64),
}

/// Gateway with canned answers that records every call.
#[derive(Debug)]
pub struct ScriptedGateway {
    approve: Mutex<bool>,
    fail: Mutex<Option<BillingError>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<BillingCall>>,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::approving()
    }
}

impl ScriptedGateway {
    pub fn approving() -> Self {
        Self {
            approve: Mutex::new(true),
            fail: Mutex::new(None),
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn declining() -> Self {
        let gateway = Self::approving();
        gateway.set_approve(false);
        gateway
    }

    pub fn set_approve(&self, approve: bool) {
        *self.approve.lock() = approve;
    }

    /// Every call fails with `error` until cleared with `None`.
    pub fn set_failure(&self, error: Option<BillingError>) {
        *self.fail.lock() = error;
    }

    /// Every call sleeps this long before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> Vec<BillingCall> {
        self.calls.lock().clone()
    }

    async fn answer(&self, call: BillingCall) -> Result<(), BillingError> {
        self.calls.lock().push(call);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.fail.lock().clone();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BillingGateway for ScriptedGateway {
    async fn create_subscription(&self, request: &BillingRequest) -> Result<bool, BillingError> {
        self.answer(BillingCall::Create(request.subscription_id))
            .await?;
        Ok(*self.approve.lock())
    }

    async fn change_plan(
        &self,
        subscription_id: i64,
        new_plan_id: i64,
    ) -> Result<(), BillingError> {
        self.answer(BillingCall::ChangePlan {
            subscription_id,
            plan_id: new_plan_id,
        })
        .await
    }

    async fn cancel_subscription(&self, subscription_id: i64) -> Result<(), BillingError> {
        self.answer(BillingCall::Cancel(subscription_id)).await
    }

    async fn reactivate_subscription(&self, subscription_id: i64) -> Result<(), BillingError> {
        self.answer(BillingCall::Reactivate(subscription_id)).await
    }

    async fn void_subscription(&self, request: &BillingRequest) -> Result<(), BillingError> {
        self.answer(BillingCall::Void(request.subscription_id)).await
    }
}
