//! PostgreSQL implementation of the store traits

use async_trait::async_trait;
use rust_decimal::Decimal;
use shared::subscription::{
    ChangeType, Owner, ScheduledPlanChange, Sport, Subscription, SubscriptionHistory,
    SubscriptionPlan, SubscriptionStatus,
};
use sqlx::{PgPool, Postgres, Transaction};

use super::{
    ChangeResolution, Membership, PlanCatalog, ResourceCounter, StoreError, StoreResult,
    StoreTx, SubscriptionStore,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: i64,
    owner_user_id: Option<String>,
    owner_organization_id: Option<i64>,
    plan_id: i64,
    sport_id: i64,
    status: String,
    is_active: bool,
    start_date: i64,
    end_date: Option<i64>,
    auto_renew: bool,
    next_billing_date: Option<i64>,
    cancelled_at: Option<i64>,
    retention_ends_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
    version: i64,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let owner = Owner::from_parts(row.owner_user_id, row.owner_organization_id)
            .map_err(|e| StoreError::Corrupt(format!("subscription {}: {e}", row.id)))?;
        let status = SubscriptionStatus::from_db(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("subscription {}: status `{}`", row.id, row.status))
        })?;
        Ok(Self {
            id: row.id,
            owner,
            plan_id: row.plan_id,
            sport_id: row.sport_id,
            status,
            is_active: row.is_active,
            start_date: row.start_date,
            end_date: row.end_date,
            auto_renew: row.auto_renew,
            next_billing_date: row.next_billing_date,
            cancelled_at: row.cancelled_at,
            retention_ends_at: row.retention_ends_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    subscription_id: i64,
    old_plan_id: Option<i64>,
    new_plan_id: i64,
    change_type: String,
    requested_at: i64,
    effective_at: i64,
    actor_user_id: Option<String>,
    note: Option<String>,
}

impl TryFrom<HistoryRow> for SubscriptionHistory {
    type Error = StoreError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let change_type = ChangeType::from_db(&row.change_type).ok_or_else(|| {
            StoreError::Corrupt(format!("history {}: change type `{}`", row.id, row.change_type))
        })?;
        Ok(Self {
            id: row.id,
            subscription_id: row.subscription_id,
            old_plan_id: row.old_plan_id,
            new_plan_id: row.new_plan_id,
            change_type,
            requested_at: row.requested_at,
            effective_at: row.effective_at,
            actor_user_id: row.actor_user_id,
            note: row.note,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ScheduledChangeRow {
    id: i64,
    subscription_id: i64,
    new_plan_id: i64,
    effective_at: i64,
    requested_at: i64,
    actor_user_id: Option<String>,
}

impl From<ScheduledChangeRow> for ScheduledPlanChange {
    fn from(row: ScheduledChangeRow) -> Self {
        Self {
            id: row.id,
            subscription_id: row.subscription_id,
            new_plan_id: row.new_plan_id,
            effective_at: row.effective_at,
            requested_at: row.requested_at,
            actor_user_id: row.actor_user_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: i64,
    name: String,
    level: i32,
    price: Decimal,
    max_teams: Option<i32>,
    max_members_per_team: Option<i32>,
    features: Option<String>,
    is_active: bool,
}

impl From<PlanRow> for SubscriptionPlan {
    fn from(row: PlanRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            level: row.level,
            price: row.price,
            max_teams: row.max_teams,
            max_members_per_team: row.max_members_per_team,
            features: row.features,
            is_active: row.is_active,
        }
    }
}

fn into_subscriptions(rows: Vec<SubscriptionRow>) -> StoreResult<Vec<Subscription>> {
    rows.into_iter().map(Subscription::try_from).collect()
}

/// Unique violations become [`StoreError::UniqueViolation`] carrying the constraint name.
fn map_write_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e
        && db.is_unique_violation()
    {
        return StoreError::UniqueViolation(db.constraint().unwrap_or("unique").to_string());
    }
    StoreError::Database(e)
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            "SELECT id, owner_user_id, owner_organization_id, plan_id, sport_id, status, is_active,
                    start_date, end_date, auto_renew, next_billing_date, cancelled_at,
                    retention_ends_at, created_at, updated_at, version
             FROM subscriptions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn find_active(
        &self,
        owner: &Owner,
        sport_id: i64,
    ) -> StoreResult<Option<Subscription>> {
        // Only one of the owner columns is ever bound to a non-NULL value
        let row: Option<SubscriptionRow> = sqlx::query_as(
            "SELECT id, owner_user_id, owner_organization_id, plan_id, sport_id, status, is_active,
                    start_date, end_date, auto_renew, next_billing_date, cancelled_at,
                    retention_ends_at, created_at, updated_at, version
             FROM subscriptions
             WHERE (owner_user_id = $1 OR owner_organization_id = $2)
               AND sport_id = $3 AND is_active",
        )
        .bind(owner.user_id())
        .bind(owner.organization_id())
        .bind(sport_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn list_by_owner(&self, owner: &Owner) -> StoreResult<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(
            "SELECT id, owner_user_id, owner_organization_id, plan_id, sport_id, status, is_active,
                    start_date, end_date, auto_renew, next_billing_date, cancelled_at,
                    retention_ends_at, created_at, updated_at, version
             FROM subscriptions
             WHERE owner_user_id = $1 OR owner_organization_id = $2
             ORDER BY created_at DESC, id DESC",
        )
        .bind(owner.user_id())
        .bind(owner.organization_id())
        .fetch_all(&self.pool)
        .await?;
        into_subscriptions(rows)
    }

    async fn history(&self, subscription_id: i64) -> StoreResult<Vec<SubscriptionHistory>> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            "SELECT id, subscription_id, old_plan_id, new_plan_id, change_type, requested_at,
                    effective_at, actor_user_id, note
             FROM subscription_history
             WHERE subscription_id = $1
             ORDER BY seq",
        )
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SubscriptionHistory::try_from).collect()
    }

    async fn due_for_expiry(&self, now: i64) -> StoreResult<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(
            "SELECT id, owner_user_id, owner_organization_id, plan_id, sport_id, status, is_active,
                    start_date, end_date, auto_renew, next_billing_date, cancelled_at,
                    retention_ends_at, created_at, updated_at, version
             FROM subscriptions
             WHERE is_active AND NOT auto_renew AND end_date IS NOT NULL AND end_date <= $1
             ORDER BY end_date",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        into_subscriptions(rows)
    }

    async fn due_plan_changes(&self, now: i64) -> StoreResult<Vec<ScheduledPlanChange>> {
        let rows: Vec<ScheduledChangeRow> = sqlx::query_as(
            "SELECT id, subscription_id, new_plan_id, effective_at, requested_at, actor_user_id
             FROM scheduled_plan_changes
             WHERE resolved_at IS NULL AND effective_at <= $1
             ORDER BY effective_at, id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ScheduledPlanChange::from).collect())
    }
}

pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn insert_subscription(&mut self, sub: &Subscription) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO subscriptions (id, owner_user_id, owner_organization_id, plan_id, sport_id,
                status, is_active, start_date, end_date, auto_renew, next_billing_date,
                cancelled_at, retention_ends_at, created_at, updated_at, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(sub.id)
        .bind(sub.owner.user_id())
        .bind(sub.owner.organization_id())
        .bind(sub.plan_id)
        .bind(sub.sport_id)
        .bind(sub.status.as_db())
        .bind(sub.is_active)
        .bind(sub.start_date)
        .bind(sub.end_date)
        .bind(sub.auto_renew)
        .bind(sub.next_billing_date)
        .bind(sub.cancelled_at)
        .bind(sub.retention_ends_at)
        .bind(sub.created_at)
        .bind(sub.updated_at)
        .bind(sub.version)
        .execute(&mut *self.tx)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn update_subscription(
        &mut self,
        sub: &Subscription,
        expected_version: i64,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE subscriptions SET
                plan_id = $2, status = $3, is_active = $4, end_date = $5, auto_renew = $6,
                next_billing_date = $7, cancelled_at = $8, retention_ends_at = $9,
                updated_at = $10, version = $11
             WHERE id = $1 AND version = $12",
        )
        .bind(sub.id)
        .bind(sub.plan_id)
        .bind(sub.status.as_db())
        .bind(sub.is_active)
        .bind(sub.end_date)
        .bind(sub.auto_renew)
        .bind(sub.next_billing_date)
        .bind(sub.cancelled_at)
        .bind(sub.retention_ends_at)
        .bind(sub.updated_at)
        .bind(sub.version)
        .bind(expected_version)
        .execute(&mut *self.tx)
        .await
        .map_err(map_write_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StaleState(sub.id));
        }
        Ok(())
    }

    async fn append_history(&mut self, entry: &SubscriptionHistory) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO subscription_history (id, subscription_id, old_plan_id, new_plan_id,
                change_type, requested_at, effective_at, actor_user_id, note)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(entry.id)
        .bind(entry.subscription_id)
        .bind(entry.old_plan_id)
        .bind(entry.new_plan_id)
        .bind(entry.change_type.as_db())
        .bind(entry.requested_at)
        .bind(entry.effective_at)
        .bind(entry.actor_user_id.as_deref())
        .bind(entry.note.as_deref())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn schedule_plan_change(&mut self, change: &ScheduledPlanChange) -> StoreResult<()> {
        sqlx::query(
            "UPDATE scheduled_plan_changes SET resolved_at = $2, resolution = $3
             WHERE subscription_id = $1 AND resolved_at IS NULL",
        )
        .bind(change.subscription_id)
        .bind(change.requested_at)
        .bind(ChangeResolution::Replaced.as_db())
        .execute(&mut *self.tx)
        .await?;

        sqlx::query(
            "INSERT INTO scheduled_plan_changes (id, subscription_id, new_plan_id, effective_at,
                requested_at, actor_user_id)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(change.id)
        .bind(change.subscription_id)
        .bind(change.new_plan_id)
        .bind(change.effective_at)
        .bind(change.requested_at)
        .bind(change.actor_user_id.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn resolve_plan_change(
        &mut self,
        change_id: i64,
        resolution: ChangeResolution,
        now: i64,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE scheduled_plan_changes SET resolved_at = $2, resolution = $3
             WHERE id = $1 AND resolved_at IS NULL",
        )
        .bind(change_id)
        .bind(now)
        .bind(resolution.as_db())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StaleState(change_id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(map_write_error)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl PlanCatalog for PgStore {
    async fn get_plan(&self, plan_id: i64) -> StoreResult<Option<SubscriptionPlan>> {
        let row: Option<PlanRow> = sqlx::query_as(
            "SELECT id, name, level, price, max_teams, max_members_per_team, features, is_active
             FROM subscription_plans WHERE id = $1",
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(SubscriptionPlan::from))
    }

    async fn get_sport(&self, sport_id: i64) -> StoreResult<Option<Sport>> {
        let row: Option<(i64, String, bool)> =
            sqlx::query_as("SELECT id, name, is_active FROM sports WHERE id = $1")
                .bind(sport_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, name, is_active)| Sport {
            id,
            name,
            is_active,
        }))
    }

    async fn list_active_plans(&self) -> StoreResult<Vec<SubscriptionPlan>> {
        let rows: Vec<PlanRow> = sqlx::query_as(
            "SELECT id, name, level, price, max_teams, max_members_per_team, features, is_active
             FROM subscription_plans WHERE is_active ORDER BY level, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SubscriptionPlan::from).collect())
    }

    async fn list_active_sports(&self) -> StoreResult<Vec<Sport>> {
        let rows: Vec<(i64, String, bool)> =
            sqlx::query_as(
                "SELECT id, name, is_active FROM sports WHERE is_active ORDER BY name, id",
            )
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name, is_active)| Sport {
                id,
                name,
                is_active,
            })
            .collect())
    }
}

#[async_trait]
impl Membership for PgStore {
    async fn organization_exists(&self, organization_id: i64) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM organizations WHERE id = $1)")
                .bind(organization_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn is_organization_member(
        &self,
        organization_id: i64,
        user_id: &str,
    ) -> StoreResult<bool> {
        let member: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM organization_memberships
                           WHERE organization_id = $1 AND user_id = $2)",
        )
        .bind(organization_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(member)
    }
}

#[async_trait]
impl ResourceCounter for PgStore {
    async fn count_teams(&self, owner: &Owner) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM teams WHERE owner_user_id = $1 OR owner_organization_id = $2",
        )
        .bind(owner.user_id())
        .bind(owner.organization_id())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn team_owner(&self, team_id: i64) -> StoreResult<Option<Owner>> {
        let row: Option<(Option<String>, Option<i64>)> = sqlx::query_as(
            "SELECT owner_user_id, owner_organization_id FROM teams WHERE id = $1",
        )
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(user_id, organization_id)| {
            Owner::from_parts(user_id, organization_id)
                .map_err(|e| StoreError::Corrupt(format!("team {team_id}: {e}")))
        })
        .transpose()
    }

    async fn count_team_members(&self, team_id: i64) -> StoreResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM team_members WHERE team_id = $1")
                .bind(team_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
