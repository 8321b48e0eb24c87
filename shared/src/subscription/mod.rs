//! Subscription domain types shared between the service and its clients
//!
//! Timestamps are Unix milliseconds (UTC), ids are snowflake `i64`s except
//! user ids, which are opaque identity-provider subjects.

mod owner;
mod request;

pub use owner::{Owner, OwnerError};
pub use request::{
    ChangePlanRequest, CreateSubscriptionRequest, ExtendSubscriptionRequest, LimitQuery,
};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Subscription lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Suspended,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    /// Parse from database string value (lowercase)
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Database string representation (lowercase)
    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Access gate: only an active subscription grants access.
    pub fn grants_access(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Kind of change recorded in the subscription history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Upgrade,
    Downgrade,
    Cancel,
    Reactivate,
    Extend,
    Expire,
}

impl ChangeType {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "upgrade" => Some(Self::Upgrade),
            "downgrade" => Some(Self::Downgrade),
            "cancel" => Some(Self::Cancel),
            "reactivate" => Some(Self::Reactivate),
            "extend" => Some(Self::Extend),
            "expire" => Some(Self::Expire),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Upgrade => "upgrade",
            Self::Downgrade => "downgrade",
            Self::Cancel => "cancel",
            Self::Reactivate => "reactivate",
            Self::Extend => "extend",
            Self::Expire => "expire",
        }
    }

    /// Plan change direction by plan level. Equal levels count as a downgrade.
    pub fn for_plan_change(old_level: i32, new_level: i32) -> Self {
        if new_level > old_level {
            Self::Upgrade
        } else {
            Self::Downgrade
        }
    }
}

/// A purchasable plan from the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: i64,
    pub name: String,
    /// Ordering used to tell upgrades from downgrades
    pub level: i32,
    pub price: Decimal,
    /// `None` means unlimited
    pub max_teams: Option<i32>,
    /// `None` means unlimited
    pub max_members_per_team: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sport {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
}

/// A subscription of one owner to one plan for one sport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub owner: Owner,
    pub plan_id: i64,
    pub sport_id: i64,
    pub status: SubscriptionStatus,
    /// Mirrors `status == Active`; kept as a column for the partial unique index
    pub is_active: bool,
    pub start_date: i64,
    pub end_date: Option<i64>,
    pub auto_renew: bool,
    pub next_billing_date: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub retention_ends_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Row revision, bumped on every update; conditional writes compare it
    pub version: i64,
}

impl Subscription {
    /// A freshly activated subscription starting at `now`.
    pub fn activate(id: i64, owner: Owner, plan_id: i64, sport_id: i64, now: i64) -> Self {
        Self {
            id,
            owner,
            plan_id,
            sport_id,
            status: SubscriptionStatus::Active,
            is_active: true,
            start_date: now,
            end_date: None,
            auto_renew: false,
            next_billing_date: None,
            cancelled_at: None,
            retention_ends_at: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Start the next revision of this row. Returns the version the stored
    /// row must still carry for the update to apply.
    pub fn revise(&mut self, now: i64) -> i64 {
        let read = self.version;
        self.version += 1;
        self.updated_at = now;
        read
    }

    /// Move to `status`, keeping `is_active` in sync.
    pub fn set_status(&mut self, status: SubscriptionStatus, now: i64) {
        self.status = status;
        self.is_active = status.grants_access();
        self.updated_at = now;
    }

    /// Reactivation is allowed strictly before the retention deadline.
    pub fn within_retention(&self, now: i64) -> bool {
        self.retention_ends_at.is_some_and(|ends_at| now < ends_at)
    }

    /// Grants access right now: active and not past a fixed end date.
    pub fn is_live(&self, now: i64) -> bool {
        self.is_active && self.end_date.is_none_or(|end| end > now)
    }

    /// Active, past its end date and not renewed automatically.
    pub fn is_expiry_due(&self, now: i64) -> bool {
        self.is_active && !self.auto_renew && self.end_date.is_some_and(|end| end <= now)
    }
}

/// Append-only audit row, one per lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionHistory {
    pub id: i64,
    pub subscription_id: i64,
    pub old_plan_id: Option<i64>,
    pub new_plan_id: i64,
    pub change_type: ChangeType,
    pub requested_at: i64,
    pub effective_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Access overview of one owner's subscriptions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSubscriptionStatus {
    /// At least one subscription grants access right now
    pub has_active_subscription: bool,
    /// Active and not past their end date, newest first
    pub active_subscriptions: Vec<Subscription>,
    /// Every subscription of the owner, newest first
    pub subscriptions: Vec<Subscription>,
}

/// Plan change waiting for its effective date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledPlanChange {
    pub id: i64,
    pub subscription_id: i64,
    pub new_plan_id: i64,
    pub effective_at: i64,
    pub requested_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_user_id: Option<String>,
}
