//! Persistence layer
//!
//! The lifecycle engine talks to storage only through the traits below.
//! [`postgres::PgStore`] backs production; [`memory::InMemoryStore`] backs
//! tests and local runs without a database.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use shared::subscription::{
    Owner, ScheduledPlanChange, Sport, Subscription, SubscriptionHistory, SubscriptionPlan,
};
use thiserror::Error;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A unique index rejected the write (one active subscription per owner and sport)
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Conditional write matched no row: the record changed since it was read
    #[error("record {0} no longer matches the expected state")]
    StaleState(i64),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// How a scheduled plan change left the pending queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeResolution {
    Applied,
    Discarded,
    Replaced,
}

impl ChangeResolution {
    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Discarded => "discarded",
            Self::Replaced => "replaced",
        }
    }
}

/// Subscription and history persistence
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Open a unit of work. Dropping it without commit rolls it back.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Subscription>>;

    async fn find_active(&self, owner: &Owner, sport_id: i64)
    -> StoreResult<Option<Subscription>>;

    async fn list_by_owner(&self, owner: &Owner) -> StoreResult<Vec<Subscription>>;

    /// History rows in append order
    async fn history(&self, subscription_id: i64) -> StoreResult<Vec<SubscriptionHistory>>;

    /// Active, non-renewing subscriptions whose end date is `<= now`
    async fn due_for_expiry(&self, now: i64) -> StoreResult<Vec<Subscription>>;

    /// Unresolved scheduled plan changes whose effective date is `<= now`
    async fn due_plan_changes(&self, now: i64) -> StoreResult<Vec<ScheduledPlanChange>>;
}

/// One transaction over the subscription tables
#[async_trait]
pub trait StoreTx: Send {
    async fn insert_subscription(&mut self, sub: &Subscription) -> StoreResult<()>;

    /// Overwrite the mutable columns of `sub` (including its new `version`),
    /// but only while the stored row is still at `expected_version`
    /// ([`StoreError::StaleState`] otherwise).
    async fn update_subscription(
        &mut self,
        sub: &Subscription,
        expected_version: i64,
    ) -> StoreResult<()>;

    async fn append_history(&mut self, entry: &SubscriptionHistory) -> StoreResult<()>;

    /// Queue a plan change; an unresolved change for the same subscription is replaced.
    async fn schedule_plan_change(&mut self, change: &ScheduledPlanChange) -> StoreResult<()>;

    async fn resolve_plan_change(
        &mut self,
        change_id: i64,
        resolution: ChangeResolution,
        now: i64,
    ) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Read-only plan and sport catalog
#[async_trait]
pub trait PlanCatalog: Send + Sync {
    async fn get_plan(&self, plan_id: i64) -> StoreResult<Option<SubscriptionPlan>>;

    async fn get_sport(&self, sport_id: i64) -> StoreResult<Option<Sport>>;

    async fn list_active_plans(&self) -> StoreResult<Vec<SubscriptionPlan>>;

    async fn list_active_sports(&self) -> StoreResult<Vec<Sport>>;
}

/// Organization membership lookups
#[async_trait]
pub trait Membership: Send + Sync {
    async fn organization_exists(&self, organization_id: i64) -> StoreResult<bool>;

    async fn is_organization_member(&self, organization_id: i64, user_id: &str)
    -> StoreResult<bool>;
}

/// Counts of plan-limited resources
#[async_trait]
pub trait ResourceCounter: Send + Sync {
    /// Teams owned by `owner`, across all sports
    async fn count_teams(&self, owner: &Owner) -> StoreResult<i64>;

    /// Owner of a team, `None` when the team does not exist
    async fn team_owner(&self, team_id: i64) -> StoreResult<Option<Owner>>;

    async fn count_team_members(&self, team_id: i64) -> StoreResult<i64>;
}
