//! Stripe gateway via REST API (no SDK dependency)

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;

use super::{BillingError, BillingGateway, BillingRequest};

const STRIPE_API: &str = "https://api.stripe.com/v1";

pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: String,
    /// Catalog plan id -> Stripe Price ID
    price_ids: HashMap<i64, String>,
    base_url: String,
    /// Owner -> Stripe customer id, filled as customers are resolved
    customers: Mutex<HashMap<String, String>>,
    /// Our subscription id -> Stripe subscription id, filled from create responses
    subscriptions: Mutex<HashMap<i64, String>>,
}

impl StripeGateway {
    pub fn new(
        secret_key: String,
        price_ids: HashMap<i64, String>,
        timeout: Duration,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build Stripe client: {e}"))?;
        Ok(Self {
            client,
            secret_key,
            price_ids,
            base_url: STRIPE_API.to_string(),
            customers: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base_url))
            .basic_auth(&self.secret_key, None::<&str>)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base_url))
            .basic_auth(&self.secret_key, None::<&str>)
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.client
            .delete(format!("{}{path}", self.base_url))
            .basic_auth(&self.secret_key, None::<&str>)
    }

    /// Send and classify transport-level failures. The caller interprets 4xx.
    async fn send(&self, request: RequestBuilder) -> Result<(StatusCode, Value), BillingError> {
        let resp = request
            .send()
            .await
            .map_err(|e| BillingError::Unavailable(e.to_string()))?;
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(BillingError::Unavailable(format!(
                "Stripe responded {status}: {}",
                error_message(&body)
            )));
        }
        Ok((status, body))
    }

    async fn send_ok(&self, request: RequestBuilder) -> Result<Value, BillingError> {
        let (status, body) = self.send(request).await?;
        if !status.is_success() {
            return Err(BillingError::Provider(format!(
                "Stripe responded {status}: {}",
                error_message(&body)
            )));
        }
        Ok(body)
    }

    /// Find or create the Stripe customer tagged with this owner.
    async fn customer_for(&self, owner: &str) -> Result<String, BillingError> {
        if let Some(id) = self.customers.lock().get(owner) {
            return Ok(id.clone());
        }

        let found = self
            .send_ok(
                self.get("/customers/search")
                    .query(&[("query", format!("metadata['owner']:'{owner}'"))]),
            )
            .await?;
        let id = match found["data"][0]["id"].as_str() {
            Some(id) => id.to_string(),
            None => {
                let created = self
                    .send_ok(self.post("/customers").form(&[("metadata[owner]", owner)]))
                    .await?;
                created["id"].as_str().map(String::from).ok_or_else(|| {
                    BillingError::Provider(format!("customer create failed: {created}"))
                })?
            }
        };
        self.customers.lock().insert(owner.to_string(), id.clone());
        Ok(id)
    }

    /// The create call for `request`. Replaying it with the same customer
    /// and price returns Stripe's stored answer for the idempotency key
    /// instead of creating a second subscription.
    fn create_call(
        &self,
        request: &BillingRequest,
        customer: &str,
        price_id: &str,
    ) -> RequestBuilder {
        let subscription_id = request.subscription_id.to_string();
        let sport_id = request.sport_id.to_string();
        self.post("/subscriptions")
            .header("Idempotency-Key", idempotency_key(request.subscription_id))
            .form(&[
                ("customer", customer),
                ("items[0][price]", price_id),
                ("payment_behavior", "error_if_incomplete"),
                ("metadata[subscription_id]", subscription_id.as_str()),
                ("metadata[sport_id]", sport_id.as_str()),
            ])
    }

    fn remember(&self, subscription_id: i64, body: &Value) {
        if let Some(stripe_id) = body["id"].as_str() {
            self.subscriptions
                .lock()
                .insert(subscription_id, stripe_id.to_string());
        }
    }

    /// Stripe id of the subscription created for `request`, if any.
    ///
    /// Known ids come from earlier create responses. Otherwise the create is
    /// replayed under its idempotency key; when the original never got past
    /// customer resolution there is nothing to find.
    async fn created_subscription_id(
        &self,
        request: &BillingRequest,
    ) -> Result<Option<String>, BillingError> {
        if let Some(id) = self.subscriptions.lock().get(&request.subscription_id) {
            return Ok(Some(id.clone()));
        }
        let Some(price_id) = self.price_ids.get(&request.plan_id) else {
            return Ok(None);
        };
        let customer = self
            .customers
            .lock()
            .get(&request.owner.to_string())
            .cloned();
        let Some(customer) = customer else {
            return Ok(None);
        };

        let (status, body) = self
            .send(self.create_call(request, &customer, price_id))
            .await?;
        if !status.is_success() {
            // Stored rejection for this key: the original create failed too
            return Ok(None);
        }
        self.remember(request.subscription_id, &body);
        Ok(body["id"].as_str().map(String::from))
    }

    /// Stripe id of a committed subscription. Long-lived rows are not in the
    /// local map after a restart, so fall back to a metadata search.
    async fn subscription_id_for(&self, subscription_id: i64) -> Result<String, BillingError> {
        if let Some(id) = self.subscriptions.lock().get(&subscription_id) {
            return Ok(id.clone());
        }
        let found = self
            .send_ok(self.get("/subscriptions/search").query(&[(
                "query",
                format!("metadata['subscription_id']:'{subscription_id}'"),
            )]))
            .await?;
        let id = found["data"][0]["id"].as_str().ok_or_else(|| {
            BillingError::Provider(format!("no Stripe subscription for {subscription_id}"))
        })?;
        self.subscriptions
            .lock()
            .insert(subscription_id, id.to_string());
        Ok(id.to_string())
    }

    async fn set_cancel_at_period_end(
        &self,
        subscription_id: i64,
        cancel: bool,
    ) -> Result<(), BillingError> {
        let stripe_id = self.subscription_id_for(subscription_id).await?;
        self.send_ok(
            self.post(&format!("/subscriptions/{stripe_id}"))
                .form(&[("cancel_at_period_end", if cancel { "true" } else { "false" })]),
        )
        .await?;
        Ok(())
    }
}

fn idempotency_key(subscription_id: i64) -> String {
    format!("planner-sub-{subscription_id}")
}

fn error_message(body: &Value) -> String {
    body["error"]["message"]
        .as_str()
        .map(String::from)
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl BillingGateway for StripeGateway {
    async fn create_subscription(&self, request: &BillingRequest) -> Result<bool, BillingError> {
        let Some(price_id) = self.price_ids.get(&request.plan_id) else {
            tracing::error!(plan_id = request.plan_id, "No Stripe price configured for plan");
            return Ok(false);
        };

        let customer = match self.customer_for(&request.owner.to_string()).await {
            Ok(customer) => customer,
            Err(BillingError::Provider(reason)) => {
                tracing::warn!(owner = %request.owner, %reason, "Stripe customer lookup rejected");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let (status, body) = self
            .send(self.create_call(request, &customer, price_id))
            .await?;

        if status.is_success() {
            self.remember(request.subscription_id, &body);
            return Ok(true);
        }
        // Card declines come back as 402, other 4xx are request rejections
        tracing::warn!(
            subscription_id = request.subscription_id,
            status = status.as_u16(),
            reason = %error_message(&body),
            "Stripe rejected subscription"
        );
        Ok(false)
    }

    async fn change_plan(
        &self,
        subscription_id: i64,
        new_plan_id: i64,
    ) -> Result<(), BillingError> {
        let price_id = self.price_ids.get(&new_plan_id).ok_or_else(|| {
            BillingError::Provider(format!("no Stripe price configured for plan {new_plan_id}"))
        })?;
        let stripe_id = self.subscription_id_for(subscription_id).await?;
        let sub = self
            .send_ok(self.get(&format!("/subscriptions/{stripe_id}")))
            .await?;
        let item_id = sub["items"]["data"][0]["id"].as_str().ok_or_else(|| {
            BillingError::Provider(format!("subscription {stripe_id} has no items"))
        })?;

        self.send_ok(self.post(&format!("/subscriptions/{stripe_id}")).form(&[
            ("items[0][id]", item_id),
            ("items[0][price]", price_id.as_str()),
            ("proration_behavior", "create_prorations"),
        ]))
        .await?;
        Ok(())
    }

    async fn cancel_subscription(&self, subscription_id: i64) -> Result<(), BillingError> {
        self.set_cancel_at_period_end(subscription_id, true).await
    }

    async fn reactivate_subscription(&self, subscription_id: i64) -> Result<(), BillingError> {
        self.set_cancel_at_period_end(subscription_id, false).await
    }

    async fn void_subscription(&self, request: &BillingRequest) -> Result<(), BillingError> {
        let Some(stripe_id) = self.created_subscription_id(request).await? else {
            tracing::debug!(
                subscription_id = request.subscription_id,
                "No Stripe subscription to void"
            );
            return Ok(());
        };

        // Immediate cancellation; the current period is not billed
        let (status, body) = self
            .send(self.delete(&format!("/subscriptions/{stripe_id}")))
            .await?;
        if status.is_success() || status == StatusCode::NOT_FOUND {
            self.subscriptions.lock().remove(&request.subscription_id);
            tracing::info!(
                subscription_id = request.subscription_id,
                %stripe_id,
                "Stripe subscription voided"
            );
            return Ok(());
        }
        Err(BillingError::Provider(format!(
            "Stripe responded {status} voiding {stripe_id}: {}",
            error_message(&body)
        )))
    }
}
