//! Subscription lifecycle engine
//!
//! Every transition follows the same order: validate input, check catalog
//! and authorization, check the current state, then write the subscription
//! and its history row in one store transaction. Creation additionally asks
//! the billing provider for approval while the transaction is still open and
//! only commits when the provider says yes; if the provider may already be
//! billing when the create fails (error, timeout, failed commit) the
//! provider-side subscription is voided. Cancel, reactivate and plan changes
//! notify the provider after commit without waiting for it.
//!
//! Updates are conditional on the row version read at the start of the
//! transition, so two transitions racing on one subscription cannot both
//! apply; the loser gets [`SubscriptionError::StateChanged`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use shared::subscription::{
    ChangePlanRequest, ChangeType, CreateSubscriptionRequest, ExtendSubscriptionRequest, Owner,
    OwnerSubscriptionStatus, ScheduledPlanChange, Sport, Subscription, SubscriptionHistory,
    SubscriptionPlan, SubscriptionStatus,
};
use shared::util::{DAY_MILLIS, snowflake_id};

use crate::billing::{BillingError, BillingGateway, BillingRequest};
use crate::clock::{Clock, SystemClock};
use crate::db::{
    ChangeResolution, Membership, PlanCatalog, StoreError, StoreResult, StoreTx,
    SubscriptionStore,
};
use crate::error::{SubscriptionError, SubscriptionResult};

#[cfg(test)]
mod tests;

/// Engine knobs that do not come from the catalog
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Days a cancelled subscription can still be reactivated
    pub retention_days: i64,
    /// Upper bound for any single billing call
    pub billing_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retention_days: 90,
            billing_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    pub fn retention_millis(&self) -> i64 {
        self.retention_days * DAY_MILLIS
    }
}

/// Result of a plan change request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "data", rename_all = "snake_case")]
pub enum PlanChangeOutcome {
    Applied(Subscription),
    Scheduled(ScheduledPlanChange),
}

/// One write inside a unit of work
enum StagedWrite<'a> {
    Insert(&'a Subscription),
    /// The subscription's new state and the version it was read at
    Update(&'a Subscription, i64),
    History(&'a SubscriptionHistory),
    Schedule(&'a ScheduledPlanChange),
    Resolve(i64, ChangeResolution),
}

async fn stage(tx: &mut dyn StoreTx, writes: &[StagedWrite<'_>], now: i64) -> StoreResult<()> {
    for write in writes {
        match write {
            StagedWrite::Insert(sub) => tx.insert_subscription(sub).await?,
            StagedWrite::Update(sub, expected_version) => {
                tx.update_subscription(sub, *expected_version).await?
            }
            StagedWrite::History(entry) => tx.append_history(entry).await?,
            StagedWrite::Schedule(change) => tx.schedule_plan_change(change).await?,
            StagedWrite::Resolve(change_id, resolution) => {
                tx.resolve_plan_change(*change_id, *resolution, now).await?
            }
        }
    }
    Ok(())
}

async fn rollback(tx: Box<dyn StoreTx>) {
    if let Err(e) = tx.rollback().await {
        tracing::error!(error = %e, "Failed to roll back subscription transaction");
    }
}

/// Billing call made after the local outcome is settled
#[derive(Debug, Clone)]
enum BillingNotice {
    Cancel(i64),
    Reactivate(i64),
    ChangePlan { subscription_id: i64, plan_id: i64 },
    /// Undo a create the provider may have accepted but we did not commit
    Void(BillingRequest),
}

impl BillingNotice {
    fn subscription_id(&self) -> i64 {
        match self {
            Self::Cancel(id) | Self::Reactivate(id) => *id,
            Self::ChangePlan {
                subscription_id, ..
            } => *subscription_id,
            Self::Void(request) => request.subscription_id,
        }
    }

    fn action(&self) -> &'static str {
        match self {
            Self::Cancel(_) => "cancel",
            Self::Reactivate(_) => "reactivate",
            Self::ChangePlan { .. } => "change_plan",
            Self::Void(_) => "void",
        }
    }

    async fn send(self, gateway: &dyn BillingGateway) -> Result<(), BillingError> {
        match self {
            Self::Cancel(id) => gateway.cancel_subscription(id).await,
            Self::Reactivate(id) => gateway.reactivate_subscription(id).await,
            Self::ChangePlan {
                subscription_id,
                plan_id,
            } => gateway.change_plan(subscription_id, plan_id).await,
            Self::Void(request) => gateway.void_subscription(&request).await,
        }
    }
}

fn history_entry(
    sub: &Subscription,
    old_plan_id: Option<i64>,
    change_type: ChangeType,
    requested_at: i64,
    effective_at: i64,
    actor: Option<&str>,
) -> SubscriptionHistory {
    SubscriptionHistory {
        id: snowflake_id(),
        subscription_id: sub.id,
        old_plan_id,
        new_plan_id: sub.plan_id,
        change_type,
        requested_at,
        effective_at,
        actor_user_id: actor.map(String::from),
        note: None,
    }
}

pub struct SubscriptionEngine {
    store: Arc<dyn SubscriptionStore>,
    catalog: Arc<dyn PlanCatalog>,
    membership: Arc<dyn Membership>,
    billing: Arc<dyn BillingGateway>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl SubscriptionEngine {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        catalog: Arc<dyn PlanCatalog>,
        membership: Arc<dyn Membership>,
        billing: Arc<dyn BillingGateway>,
    ) -> Self {
        Self {
            store,
            catalog,
            membership,
            billing,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    // ========== Transitions ==========

    /// Create and bill a new subscription for `req`'s owner.
    ///
    /// All business checks run before the provider is contacted. The
    /// subscription and its history row become visible only after the
    /// provider approves; a decline, error or timeout leaves nothing behind.
    pub async fn create(
        &self,
        caller: &str,
        req: CreateSubscriptionRequest,
    ) -> SubscriptionResult<Subscription> {
        let owner = Owner::from_parts(req.owner_user_id, req.owner_organization_id)?;
        let now = self.now();
        if let Some(end_date) = req.end_date
            && end_date <= now
        {
            return Err(SubscriptionError::InvalidEndDate);
        }

        let plan = self.active_plan(req.plan_id).await?;
        self.active_sport(req.sport_id).await?;
        self.authorize_owner(caller, &owner).await?;

        if self.store.find_active(&owner, req.sport_id).await?.is_some() {
            tracing::debug!(
                owner = %owner,
                sport_id = req.sport_id,
                "Active subscription already exists"
            );
            return Err(SubscriptionError::ActiveSubscriptionExists {
                owner,
                sport_id: req.sport_id,
            });
        }

        let mut sub = Subscription::activate(snowflake_id(), owner, plan.id, req.sport_id, now);
        sub.end_date = req.end_date;
        sub.auto_renew = req.auto_renew;
        if sub.auto_renew {
            sub.next_billing_date = sub.end_date;
        }
        let entry = history_entry(
            &sub,
            None,
            ChangeType::Upgrade,
            now,
            sub.start_date,
            Some(caller),
        );

        let mut tx = self.store.begin().await?;
        let staged = stage(
            tx.as_mut(),
            &[StagedWrite::Insert(&sub), StagedWrite::History(&entry)],
            now,
        )
        .await;
        if let Err(e) = staged {
            rollback(tx).await;
            return Err(self.write_error(e, &sub));
        }

        let request = BillingRequest {
            subscription_id: sub.id,
            owner: sub.owner.clone(),
            plan_id: sub.plan_id,
            sport_id: sub.sport_id,
        };
        let timeout = self.config.billing_timeout;
        let answer =
            tokio::time::timeout(timeout, self.billing.create_subscription(&request)).await;
        match answer {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                rollback(tx).await;
                tracing::info!(
                    subscription_id = sub.id,
                    owner = %sub.owner,
                    "Billing declined subscription"
                );
                return Err(SubscriptionError::PaymentRequired);
            }
            Ok(Err(e)) => {
                rollback(tx).await;
                tracing::warn!(
                    subscription_id = sub.id,
                    error = %e,
                    "Billing call failed, subscription rolled back"
                );
                // The provider may have created it before failing
                self.notify(BillingNotice::Void(request));
                return Err(SubscriptionError::BillingUnavailable(e));
            }
            Err(_) => {
                rollback(tx).await;
                tracing::warn!(
                    subscription_id = sub.id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Billing call timed out, subscription rolled back"
                );
                self.notify(BillingNotice::Void(request));
                return Err(SubscriptionError::BillingTimeout(timeout));
            }
        }

        if let Err(e) = tx.commit().await {
            tracing::error!(
                subscription_id = sub.id,
                error = %e,
                "Commit failed after billing approval"
            );
            self.notify(BillingNotice::Void(request));
            return Err(self.write_error(e, &sub));
        }

        tracing::info!(
            subscription_id = sub.id,
            owner = %sub.owner,
            plan_id = sub.plan_id,
            sport_id = sub.sport_id,
            "Subscription created"
        );
        Ok(sub)
    }

    /// Cancel an active subscription. Access ends immediately; the
    /// subscription stays reactivatable until the retention deadline.
    pub async fn cancel(
        &self,
        caller: &str,
        subscription_id: i64,
    ) -> SubscriptionResult<Subscription> {
        let mut sub = self.load_authorized(caller, subscription_id).await?;
        if !sub.is_active {
            return Err(SubscriptionError::NotActive(sub.id));
        }

        let now = self.now();
        sub.set_status(SubscriptionStatus::Cancelled, now);
        sub.cancelled_at = Some(now);
        sub.retention_ends_at = Some(now + self.config.retention_millis());
        let expected = sub.revise(now);
        let entry = history_entry(
            &sub,
            Some(sub.plan_id),
            ChangeType::Cancel,
            now,
            now,
            Some(caller),
        );

        self.commit_writes(
            &[StagedWrite::Update(&sub, expected), StagedWrite::History(&entry)],
            &sub,
            now,
        )
        .await?;

        tracing::info!(subscription_id = sub.id, owner = %sub.owner, "Subscription cancelled");
        self.notify(BillingNotice::Cancel(sub.id));
        Ok(sub)
    }

    /// Reactivate a cancelled subscription strictly before its retention deadline.
    pub async fn reactivate(
        &self,
        caller: &str,
        subscription_id: i64,
    ) -> SubscriptionResult<Subscription> {
        let mut sub = self.load_authorized(caller, subscription_id).await?;
        if sub.is_active {
            return Err(SubscriptionError::AlreadyActive(sub.id));
        }

        let now = self.now();
        if !sub.within_retention(now) {
            tracing::debug!(
                subscription_id = sub.id,
                retention_ends_at = ?sub.retention_ends_at,
                "Reactivation outside retention"
            );
            return Err(SubscriptionError::RetentionExpired(sub.id));
        }

        sub.set_status(SubscriptionStatus::Active, now);
        sub.cancelled_at = None;
        sub.retention_ends_at = None;
        let expected = sub.revise(now);
        let entry = history_entry(
            &sub,
            Some(sub.plan_id),
            ChangeType::Reactivate,
            now,
            now,
            Some(caller),
        );

        self.commit_writes(
            &[StagedWrite::Update(&sub, expected), StagedWrite::History(&entry)],
            &sub,
            now,
        )
        .await?;

        tracing::info!(subscription_id = sub.id, owner = %sub.owner, "Subscription reactivated");
        self.notify(BillingNotice::Reactivate(sub.id));
        Ok(sub)
    }

    /// Expire every active, non-renewing subscription whose end date is
    /// `<= now`. Each one is written in its own transaction; a failure is
    /// logged and the sweep moves on. Returns how many were expired.
    pub async fn expire_due(&self, now: i64) -> SubscriptionResult<usize> {
        let due = self.store.due_for_expiry(now).await?;
        let mut expired = 0;

        for mut sub in due {
            if !sub.is_expiry_due(now) {
                continue;
            }
            sub.set_status(SubscriptionStatus::Expired, now);
            let expected = sub.revise(now);
            let entry = history_entry(&sub, Some(sub.plan_id), ChangeType::Expire, now, now, None);
            let writes = [
                StagedWrite::Update(&sub, expected),
                StagedWrite::History(&entry),
            ];

            match self.run_writes(&writes, now).await {
                Ok(()) => {
                    tracing::info!(
                        subscription_id = sub.id,
                        owner = %sub.owner,
                        "Subscription expired"
                    );
                    expired += 1;
                }
                Err(StoreError::StaleState(id)) => {
                    tracing::debug!(
                        subscription_id = id,
                        "Subscription changed before expiry, skipped"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        subscription_id = sub.id,
                        error = %e,
                        "Failed to expire subscription"
                    );
                }
            }
        }
        Ok(expired)
    }

    /// Switch an active subscription to another plan, now or at `effective_at`.
    ///
    /// A future `effective_at` queues the change (replacing any queued one);
    /// [`Self::apply_due_plan_changes`] applies it later.
    pub async fn change_plan(
        &self,
        caller: &str,
        subscription_id: i64,
        req: ChangePlanRequest,
    ) -> SubscriptionResult<PlanChangeOutcome> {
        let sub = self.load_authorized(caller, subscription_id).await?;
        if !sub.is_active {
            return Err(SubscriptionError::NotActive(sub.id));
        }
        if req.plan_id == sub.plan_id {
            return Err(SubscriptionError::SamePlan(sub.plan_id));
        }
        let new_plan = self.active_plan(req.plan_id).await?;

        let now = self.now();
        match req.effective_at {
            Some(effective_at) if effective_at > now => {
                let change = ScheduledPlanChange {
                    id: snowflake_id(),
                    subscription_id: sub.id,
                    new_plan_id: new_plan.id,
                    effective_at,
                    requested_at: now,
                    actor_user_id: Some(caller.to_string()),
                };
                self.commit_writes(&[StagedWrite::Schedule(&change)], &sub, now)
                    .await?;
                tracing::info!(
                    subscription_id = sub.id,
                    new_plan_id = new_plan.id,
                    effective_at,
                    "Plan change scheduled"
                );
                Ok(PlanChangeOutcome::Scheduled(change))
            }
            _ => {
                let updated = self
                    .switch_plan(sub, &new_plan, now, now, Some(caller), None)
                    .await?;
                Ok(PlanChangeOutcome::Applied(updated))
            }
        }
    }

    /// Apply queued plan changes that are due. Changes whose subscription is
    /// no longer active, or whose plan is gone, are discarded. Returns how
    /// many were applied.
    pub async fn apply_due_plan_changes(&self, now: i64) -> SubscriptionResult<usize> {
        let due = self.store.due_plan_changes(now).await?;
        let mut applied = 0;

        for change in due {
            match self.apply_scheduled(&change, now).await {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        change_id = change.id,
                        subscription_id = change.subscription_id,
                        error = %e,
                        "Failed to apply scheduled plan change"
                    );
                }
            }
        }
        Ok(applied)
    }

    /// Move the end date of an active subscription further out.
    pub async fn extend(
        &self,
        caller: &str,
        subscription_id: i64,
        req: ExtendSubscriptionRequest,
    ) -> SubscriptionResult<Subscription> {
        let mut sub = self.load_authorized(caller, subscription_id).await?;
        if !sub.is_active {
            return Err(SubscriptionError::NotActive(sub.id));
        }

        let now = self.now();
        if req.end_date <= now || sub.end_date.is_some_and(|current| req.end_date <= current) {
            return Err(SubscriptionError::InvalidEndDate);
        }

        sub.end_date = Some(req.end_date);
        if let Some(auto_renew) = req.auto_renew {
            sub.auto_renew = auto_renew;
        }
        sub.next_billing_date = if sub.auto_renew { sub.end_date } else { None };
        let expected = sub.revise(now);
        let entry = history_entry(
            &sub,
            Some(sub.plan_id),
            ChangeType::Extend,
            now,
            now,
            Some(caller),
        );

        self.commit_writes(
            &[StagedWrite::Update(&sub, expected), StagedWrite::History(&entry)],
            &sub,
            now,
        )
        .await?;

        tracing::info!(
            subscription_id = sub.id,
            end_date = req.end_date,
            "Subscription extended"
        );
        Ok(sub)
    }

    // ========== Queries ==========

    pub async fn get(
        &self,
        caller: &str,
        subscription_id: i64,
    ) -> SubscriptionResult<Subscription> {
        self.load_authorized(caller, subscription_id).await
    }

    pub async fn history(
        &self,
        caller: &str,
        subscription_id: i64,
    ) -> SubscriptionResult<Vec<SubscriptionHistory>> {
        let sub = self.load_authorized(caller, subscription_id).await?;
        Ok(self.store.history(sub.id).await?)
    }

    pub async fn list_for_owner(
        &self,
        caller: &str,
        owner: &Owner,
    ) -> SubscriptionResult<Vec<Subscription>> {
        self.authorize_owner(caller, owner).await?;
        Ok(self.store.list_by_owner(owner).await?)
    }

    /// An active subscription for `sport_id` that is not past its end date.
    /// Overdue rows the sweep has not expired yet do not count.
    pub async fn has_active_subscription(
        &self,
        owner: &Owner,
        sport_id: i64,
    ) -> SubscriptionResult<bool> {
        let now = self.now();
        Ok(self
            .store
            .find_active(owner, sport_id)
            .await?
            .is_some_and(|sub| sub.is_live(now)))
    }

    /// Access overview for `owner`: whether any subscription grants access
    /// now, which ones do, and the full list newest first.
    pub async fn owner_status(
        &self,
        caller: &str,
        owner: &Owner,
    ) -> SubscriptionResult<OwnerSubscriptionStatus> {
        self.authorize_owner(caller, owner).await?;
        let subscriptions = self.store.list_by_owner(owner).await?;
        let now = self.now();
        let live: Vec<Subscription> = subscriptions
            .iter()
            .filter(|sub| sub.is_live(now))
            .cloned()
            .collect();
        Ok(OwnerSubscriptionStatus {
            has_active_subscription: !live.is_empty(),
            active_subscriptions: live,
            subscriptions,
        })
    }

    pub async fn list_active_plans(&self) -> SubscriptionResult<Vec<SubscriptionPlan>> {
        Ok(self.catalog.list_active_plans().await?)
    }

    pub async fn list_active_sports(&self) -> SubscriptionResult<Vec<Sport>> {
        Ok(self.catalog.list_active_sports().await?)
    }

    // ========== Internals ==========

    async fn active_plan(&self, plan_id: i64) -> SubscriptionResult<SubscriptionPlan> {
        self.catalog
            .get_plan(plan_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or(SubscriptionError::PlanNotFound(plan_id))
    }

    async fn active_sport(&self, sport_id: i64) -> SubscriptionResult<Sport> {
        self.catalog
            .get_sport(sport_id)
            .await?
            .filter(|s| s.is_active)
            .ok_or(SubscriptionError::SportNotFound(sport_id))
    }

    /// The caller is the owning user, or a member of the owning organization.
    pub async fn authorize_owner(&self, caller: &str, owner: &Owner) -> SubscriptionResult<()> {
        match owner {
            Owner::User(user_id) if user_id == caller => Ok(()),
            Owner::User(_) => {
                tracing::warn!(caller, owner = %owner, "Caller is not the subscription owner");
                Err(SubscriptionError::NotOwner(owner.clone()))
            }
            Owner::Organization(organization_id) => {
                let organization_id = *organization_id;
                if !self.membership.organization_exists(organization_id).await? {
                    return Err(SubscriptionError::OrganizationNotFound(organization_id));
                }
                if !self
                    .membership
                    .is_organization_member(organization_id, caller)
                    .await?
                {
                    tracing::warn!(caller, organization_id, "Caller is not an organization member");
                    return Err(SubscriptionError::NotOrganizationMember {
                        organization_id,
                        user_id: caller.to_string(),
                    });
                }
                Ok(())
            }
        }
    }

    async fn load_authorized(
        &self,
        caller: &str,
        subscription_id: i64,
    ) -> SubscriptionResult<Subscription> {
        let sub = self
            .store
            .find_by_id(subscription_id)
            .await?
            .ok_or(SubscriptionError::SubscriptionNotFound(subscription_id))?;
        self.authorize_owner(caller, &sub.owner).await?;
        Ok(sub)
    }

    /// Begin, stage, commit. Rolls back on any staging error.
    async fn run_writes(&self, writes: &[StagedWrite<'_>], now: i64) -> StoreResult<()> {
        let mut tx = self.store.begin().await?;
        if let Err(e) = stage(tx.as_mut(), writes, now).await {
            rollback(tx).await;
            return Err(e);
        }
        tx.commit().await
    }

    async fn commit_writes(
        &self,
        writes: &[StagedWrite<'_>],
        sub: &Subscription,
        now: i64,
    ) -> SubscriptionResult<()> {
        self.run_writes(writes, now)
            .await
            .map_err(|e| self.write_error(e, sub))
    }

    /// Translate a failed write on `sub` into the caller-facing error.
    fn write_error(&self, e: StoreError, sub: &Subscription) -> SubscriptionError {
        match e {
            StoreError::UniqueViolation(constraint) => {
                tracing::debug!(
                    subscription_id = sub.id,
                    %constraint,
                    "Unique index rejected write"
                );
                SubscriptionError::ActiveSubscriptionExists {
                    owner: sub.owner.clone(),
                    sport_id: sub.sport_id,
                }
            }
            StoreError::StaleState(id) => SubscriptionError::StateChanged(id),
            other => SubscriptionError::Store(other),
        }
    }

    async fn switch_plan(
        &self,
        mut sub: Subscription,
        new_plan: &SubscriptionPlan,
        requested_at: i64,
        effective_at: i64,
        actor: Option<&str>,
        scheduled_change: Option<i64>,
    ) -> SubscriptionResult<Subscription> {
        let old_plan = self.catalog.get_plan(sub.plan_id).await?.ok_or_else(|| {
            SubscriptionError::Store(StoreError::Corrupt(format!(
                "subscription {} references missing plan {}",
                sub.id, sub.plan_id
            )))
        })?;
        let change_type = ChangeType::for_plan_change(old_plan.level, new_plan.level);

        let now = self.now();
        sub.plan_id = new_plan.id;
        let expected = sub.revise(now);
        let entry = history_entry(
            &sub,
            Some(old_plan.id),
            change_type,
            requested_at,
            effective_at,
            actor,
        );

        {
            let mut writes = vec![
                StagedWrite::Update(&sub, expected),
                StagedWrite::History(&entry),
            ];
            if let Some(change_id) = scheduled_change {
                writes.push(StagedWrite::Resolve(change_id, ChangeResolution::Applied));
            }
            self.commit_writes(&writes, &sub, now).await?;
        }

        tracing::info!(
            subscription_id = sub.id,
            old_plan_id = old_plan.id,
            new_plan_id = new_plan.id,
            change_type = change_type.as_db(),
            "Subscription plan changed"
        );
        self.notify(BillingNotice::ChangePlan {
            subscription_id: sub.id,
            plan_id: new_plan.id,
        });
        Ok(sub)
    }

    /// `Ok(false)` when the change was discarded or already resolved.
    async fn apply_scheduled(
        &self,
        change: &ScheduledPlanChange,
        now: i64,
    ) -> SubscriptionResult<bool> {
        let sub = self
            .store
            .find_by_id(change.subscription_id)
            .await?
            .filter(|s| s.is_active && s.plan_id != change.new_plan_id);
        let plan = self
            .catalog
            .get_plan(change.new_plan_id)
            .await?
            .filter(|p| p.is_active);

        let (Some(sub), Some(plan)) = (sub, plan) else {
            match self
                .run_writes(&[StagedWrite::Resolve(change.id, ChangeResolution::Discarded)], now)
                .await
            {
                Ok(()) | Err(StoreError::StaleState(_)) => {}
                Err(e) => return Err(e.into()),
            }
            tracing::info!(
                change_id = change.id,
                subscription_id = change.subscription_id,
                "Scheduled plan change discarded"
            );
            return Ok(false);
        };

        match self
            .switch_plan(
                sub,
                &plan,
                change.requested_at,
                change.effective_at,
                change.actor_user_id.as_deref(),
                Some(change.id),
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(SubscriptionError::StateChanged(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Fire-and-forget provider notification; failures are only logged.
    fn notify(&self, notice: BillingNotice) {
        let billing = Arc::clone(&self.billing);
        let timeout = self.config.billing_timeout;
        tokio::spawn(async move {
            let subscription_id = notice.subscription_id();
            let action = notice.action();
            match tokio::time::timeout(timeout, notice.send(billing.as_ref())).await {
                Ok(Ok(())) => {
                    tracing::debug!(subscription_id, action, "Billing notified");
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        subscription_id,
                        action,
                        error = %e,
                        "Billing notification failed"
                    );
                }
                Err(_) => {
                    tracing::warn!(subscription_id, action, "Billing notification timed out");
                }
            }
        });
    }
}
