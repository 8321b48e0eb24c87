//! Plan-limit gate
//!
//! Read-only precondition checks run before a plan-limited resource (a team,
//! a team member) is created. The owner's active subscription for the sport
//! decides which plan limits apply; one past its end date no longer counts,
//! even before the expiry sweep has marked it expired.

use std::sync::Arc;

use serde::Serialize;
use shared::error::{AppError, ErrorCode};
use shared::subscription::{Owner, SubscriptionPlan};

use crate::clock::{Clock, SystemClock};
use crate::db::{PlanCatalog, ResourceCounter, StoreError, SubscriptionStore};
use crate::error::{SubscriptionError, SubscriptionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitedResource {
    Teams,
    TeamMembers,
}

/// Outcome of a limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LimitCheck {
    /// `max = None` means unlimited
    Allowed { current: i64, max: Option<i64> },
    NoActiveSubscription,
    LimitExceeded { current: i64, max: i64 },
}

impl LimitCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Error code for a denial, `None` when allowed.
    pub fn error_code(&self, resource: LimitedResource) -> Option<ErrorCode> {
        match self {
            Self::Allowed { .. } => None,
            Self::NoActiveSubscription => Some(ErrorCode::NoActiveSubscription),
            Self::LimitExceeded { .. } => Some(match resource {
                LimitedResource::Teams => ErrorCode::TeamLimitReached,
                LimitedResource::TeamMembers => ErrorCode::MemberLimitReached,
            }),
        }
    }

    /// Turn a denial into an [`AppError`] for resource-creation handlers.
    pub fn into_result(self, resource: LimitedResource) -> Result<(), AppError> {
        let Some(code) = self.error_code(resource) else {
            return Ok(());
        };
        let err = AppError::new(code);
        Err(match self {
            Self::LimitExceeded { current, max } => {
                err.with_detail("current", current).with_detail("max", max)
            }
            _ => err,
        })
    }
}

/// Pure limit rule: `current >= max` is exceeded, no max is unlimited.
pub fn evaluate_limit(current: i64, max: Option<i32>) -> LimitCheck {
    match max {
        Some(max) if current >= i64::from(max) => LimitCheck::LimitExceeded {
            current,
            max: i64::from(max),
        },
        max => LimitCheck::Allowed {
            current,
            max: max.map(i64::from),
        },
    }
}

pub struct PlanLimitGate {
    store: Arc<dyn SubscriptionStore>,
    catalog: Arc<dyn PlanCatalog>,
    counter: Arc<dyn ResourceCounter>,
    clock: Arc<dyn Clock>,
}

impl PlanLimitGate {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        catalog: Arc<dyn PlanCatalog>,
        counter: Arc<dyn ResourceCounter>,
    ) -> Self {
        Self {
            store,
            catalog,
            counter,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// May `owner` create another team for `sport_id`?
    pub async fn check_team_limit(
        &self,
        owner: &Owner,
        sport_id: i64,
    ) -> SubscriptionResult<LimitCheck> {
        let Some(plan) = self.active_plan(owner, sport_id).await? else {
            return Ok(LimitCheck::NoActiveSubscription);
        };
        let current = self.counter.count_teams(owner).await?;
        let check = evaluate_limit(current, plan.max_teams);
        log_denial(owner, sport_id, LimitedResource::Teams, &check);
        Ok(check)
    }

    /// May `team_id` take another member? The team must belong to `owner`;
    /// a missing team and someone else's team look the same to the caller.
    pub async fn check_member_limit(
        &self,
        owner: &Owner,
        sport_id: i64,
        team_id: i64,
    ) -> SubscriptionResult<LimitCheck> {
        if self.counter.team_owner(team_id).await?.as_ref() != Some(owner) {
            tracing::debug!(owner = %owner, team_id, "Team not owned by the checked owner");
            return Err(SubscriptionError::TeamNotFound(team_id));
        }
        let Some(plan) = self.active_plan(owner, sport_id).await? else {
            return Ok(LimitCheck::NoActiveSubscription);
        };
        let current = self.counter.count_team_members(team_id).await?;
        let check = evaluate_limit(current, plan.max_members_per_team);
        log_denial(owner, sport_id, LimitedResource::TeamMembers, &check);
        Ok(check)
    }

    async fn active_plan(
        &self,
        owner: &Owner,
        sport_id: i64,
    ) -> SubscriptionResult<Option<SubscriptionPlan>> {
        let now = self.clock.now_millis();
        let Some(sub) = self
            .store
            .find_active(owner, sport_id)
            .await?
            .filter(|sub| sub.is_live(now))
        else {
            return Ok(None);
        };
        // Plans referenced by a live subscription are never removed
        let plan = self.catalog.get_plan(sub.plan_id).await?.ok_or_else(|| {
            SubscriptionError::Store(StoreError::Corrupt(format!(
                "subscription {} references missing plan {}",
                sub.id, sub.plan_id
            )))
        })?;
        Ok(Some(plan))
    }
}

fn log_denial(owner: &Owner, sport_id: i64, resource: LimitedResource, check: &LimitCheck) {
    if let LimitCheck::LimitExceeded { current, max } = check {
        tracing::warn!(owner = %owner, sport_id, ?resource, current, max, "Plan limit reached");
    }
}
