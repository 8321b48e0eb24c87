//! In-memory store for tests and database-less local runs
//!
//! Transactions stage their writes and apply them atomically on commit.
//! Inserting an active subscription reserves its (owner, sport) key until the
//! transaction ends, which gives concurrent creates the same outcome as the
//! partial unique index in PostgreSQL: the second writer gets
//! [`StoreError::UniqueViolation`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared::subscription::{
    Owner, ScheduledPlanChange, Sport, Subscription, SubscriptionHistory, SubscriptionPlan,
};

use super::{
    ChangeResolution, Membership, PlanCatalog, ResourceCounter, StoreError, StoreResult,
    StoreTx, SubscriptionStore,
};

const ACTIVE_OWNER_SPORT_INDEX: &str = "uq_subscriptions_active_owner_sport";

type OwnerSportKey = (Owner, i64);

#[derive(Default)]
struct MemoryState {
    subscriptions: BTreeMap<i64, Subscription>,
    history: Vec<SubscriptionHistory>,
    scheduled: Vec<(ScheduledPlanChange, Option<ChangeResolution>)>,
    /// Active keys claimed by uncommitted transactions
    reserved: HashSet<OwnerSportKey>,
    plans: BTreeMap<i64, SubscriptionPlan>,
    sports: HashMap<i64, Sport>,
    organizations: HashMap<i64, HashSet<String>>,
    teams: HashMap<i64, Owner>,
    team_members: HashMap<i64, i64>,
    /// Fault injection: the next commit fails before applying anything
    fail_next_commit: bool,
}

impl MemoryState {
    fn active_key_taken(&self, key: &OwnerSportKey, except_id: Option<i64>) -> bool {
        self.subscriptions.values().any(|s| {
            s.is_active && Some(s.id) != except_id && s.owner == key.0 && s.sport_id == key.1
        })
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Seeding ==========

    pub fn add_plan(&self, plan: SubscriptionPlan) {
        self.state.lock().plans.insert(plan.id, plan);
    }

    pub fn add_sport(&self, sport: Sport) {
        self.state.lock().sports.insert(sport.id, sport);
    }

    pub fn add_organization(&self, organization_id: i64, members: &[&str]) {
        self.state.lock().organizations.insert(
            organization_id,
            members.iter().map(|m| m.to_string()).collect(),
        );
    }

    pub fn add_team(&self, team_id: i64, owner: Owner) {
        self.state.lock().teams.insert(team_id, owner);
    }

    pub fn set_team_members(&self, team_id: i64, count: i64) {
        self.state.lock().team_members.insert(team_id, count);
    }

    /// Make the next commit fail with a database error.
    pub fn fail_next_commit(&self) {
        self.state.lock().fail_next_commit = true;
    }

    // ========== Inspection ==========

    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    pub fn history_count(&self) -> usize {
        self.state.lock().history.len()
    }

    pub fn pending_plan_changes(&self) -> Vec<ScheduledPlanChange> {
        self.state
            .lock()
            .scheduled
            .iter()
            .filter(|(_, resolution)| resolution.is_none())
            .map(|(change, _)| change.clone())
            .collect()
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        Ok(Box::new(InMemoryTx {
            state: Arc::clone(&self.state),
            ops: Vec::new(),
            reservations: Vec::new(),
            finished: false,
        }))
    }

    async fn find_by_id(&self, id: i64) -> StoreResult<Option<Subscription>> {
        Ok(self.state.lock().subscriptions.get(&id).cloned())
    }

    async fn find_active(
        &self,
        owner: &Owner,
        sport_id: i64,
    ) -> StoreResult<Option<Subscription>> {
        Ok(self
            .state
            .lock()
            .subscriptions
            .values()
            .find(|s| s.is_active && &s.owner == owner && s.sport_id == sport_id)
            .cloned())
    }

    async fn list_by_owner(&self, owner: &Owner) -> StoreResult<Vec<Subscription>> {
        let mut subs: Vec<Subscription> = self
            .state
            .lock()
            .subscriptions
            .values()
            .filter(|s| &s.owner == owner)
            .cloned()
            .collect();
        subs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(subs)
    }

    async fn history(&self, subscription_id: i64) -> StoreResult<Vec<SubscriptionHistory>> {
        Ok(self
            .state
            .lock()
            .history
            .iter()
            .filter(|h| h.subscription_id == subscription_id)
            .cloned()
            .collect())
    }

    async fn due_for_expiry(&self, now: i64) -> StoreResult<Vec<Subscription>> {
        let mut due: Vec<Subscription> = self
            .state
            .lock()
            .subscriptions
            .values()
            .filter(|s| s.is_expiry_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.end_date);
        Ok(due)
    }

    async fn due_plan_changes(&self, now: i64) -> StoreResult<Vec<ScheduledPlanChange>> {
        let mut due: Vec<ScheduledPlanChange> = self
            .state
            .lock()
            .scheduled
            .iter()
            .filter(|(change, resolution)| resolution.is_none() && change.effective_at <= now)
            .map(|(change, _)| change.clone())
            .collect();
        due.sort_by_key(|c| (c.effective_at, c.id));
        Ok(due)
    }
}

enum StagedOp {
    Insert(Subscription),
    Update {
        sub: Subscription,
        expected_version: i64,
    },
    History(SubscriptionHistory),
    Schedule(ScheduledPlanChange),
    Resolve {
        change_id: i64,
        resolution: ChangeResolution,
    },
}

pub struct InMemoryTx {
    state: Arc<Mutex<MemoryState>>,
    ops: Vec<StagedOp>,
    reservations: Vec<OwnerSportKey>,
    finished: bool,
}

impl InMemoryTx {
    fn release(&mut self, state: &mut MemoryState) {
        for key in self.reservations.drain(..) {
            state.reserved.remove(&key);
        }
        self.finished = true;
    }

    fn validate(&self, state: &MemoryState) -> StoreResult<()> {
        for op in &self.ops {
            match op {
                StagedOp::Insert(sub) => {
                    if state.subscriptions.contains_key(&sub.id) {
                        return Err(StoreError::UniqueViolation("subscriptions_pkey".into()));
                    }
                }
                StagedOp::Update {
                    sub,
                    expected_version,
                } => {
                    let current = state
                        .subscriptions
                        .get(&sub.id)
                        .ok_or(StoreError::StaleState(sub.id))?;
                    if current.version != *expected_version {
                        return Err(StoreError::StaleState(sub.id));
                    }
                    if sub.is_active && !current.is_active {
                        let key = (sub.owner.clone(), sub.sport_id);
                        if state.active_key_taken(&key, Some(sub.id))
                            || (state.reserved.contains(&key) && !self.reservations.contains(&key))
                        {
                            return Err(StoreError::UniqueViolation(
                                ACTIVE_OWNER_SPORT_INDEX.into(),
                            ));
                        }
                    }
                }
                StagedOp::Resolve { change_id, .. } => {
                    let pending = state
                        .scheduled
                        .iter()
                        .any(|(c, r)| c.id == *change_id && r.is_none());
                    if !pending {
                        return Err(StoreError::StaleState(*change_id));
                    }
                }
                StagedOp::History(_) | StagedOp::Schedule(_) => {}
            }
        }
        Ok(())
    }

    fn apply(ops: Vec<StagedOp>, state: &mut MemoryState) {
        for op in ops {
            match op {
                StagedOp::Insert(sub) | StagedOp::Update { sub, .. } => {
                    state.subscriptions.insert(sub.id, sub);
                }
                StagedOp::History(entry) => state.history.push(entry),
                StagedOp::Schedule(change) => {
                    for (pending, resolution) in state.scheduled.iter_mut() {
                        if pending.subscription_id == change.subscription_id && resolution.is_none()
                        {
                            *resolution = Some(ChangeResolution::Replaced);
                        }
                    }
                    state.scheduled.push((change, None));
                }
                StagedOp::Resolve {
                    change_id,
                    resolution,
                } => {
                    if let Some((_, slot)) =
                        state.scheduled.iter_mut().find(|(c, _)| c.id == change_id)
                    {
                        *slot = Some(resolution);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn insert_subscription(&mut self, sub: &Subscription) -> StoreResult<()> {
        if sub.is_active {
            let key = (sub.owner.clone(), sub.sport_id);
            let mut state = self.state.lock();
            if state.active_key_taken(&key, None) || state.reserved.contains(&key) {
                return Err(StoreError::UniqueViolation(ACTIVE_OWNER_SPORT_INDEX.into()));
            }
            state.reserved.insert(key.clone());
            self.reservations.push(key);
        }
        self.ops.push(StagedOp::Insert(sub.clone()));
        Ok(())
    }

    async fn update_subscription(
        &mut self,
        sub: &Subscription,
        expected_version: i64,
    ) -> StoreResult<()> {
        self.ops.push(StagedOp::Update {
            sub: sub.clone(),
            expected_version,
        });
        Ok(())
    }

    async fn append_history(&mut self, entry: &SubscriptionHistory) -> StoreResult<()> {
        self.ops.push(StagedOp::History(entry.clone()));
        Ok(())
    }

    async fn schedule_plan_change(&mut self, change: &ScheduledPlanChange) -> StoreResult<()> {
        self.ops.push(StagedOp::Schedule(change.clone()));
        Ok(())
    }

    async fn resolve_plan_change(
        &mut self,
        change_id: i64,
        resolution: ChangeResolution,
        _now: i64,
    ) -> StoreResult<()> {
        self.ops.push(StagedOp::Resolve {
            change_id,
            resolution,
        });
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let state_arc = Arc::clone(&self.state);
        let mut state = state_arc.lock();
        let outcome = if std::mem::take(&mut state.fail_next_commit) {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        } else {
            self.validate(&state)
        };
        if outcome.is_ok() {
            let ops = std::mem::take(&mut self.ops);
            Self::apply(ops, &mut state);
        }
        self.release(&mut state);
        outcome
    }

    async fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        let state_arc = Arc::clone(&self.state);
        let mut state = state_arc.lock();
        self.release(&mut state);
        Ok(())
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        if !self.finished {
            let state_arc = Arc::clone(&self.state);
            let mut state = state_arc.lock();
            self.release(&mut state);
        }
    }
}

#[async_trait]
impl PlanCatalog for InMemoryStore {
    async fn get_plan(&self, plan_id: i64) -> StoreResult<Option<SubscriptionPlan>> {
        Ok(self.state.lock().plans.get(&plan_id).cloned())
    }

    async fn get_sport(&self, sport_id: i64) -> StoreResult<Option<Sport>> {
        Ok(self.state.lock().sports.get(&sport_id).cloned())
    }

    async fn list_active_plans(&self) -> StoreResult<Vec<SubscriptionPlan>> {
        let mut plans: Vec<SubscriptionPlan> = self
            .state
            .lock()
            .plans
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        plans.sort_by_key(|p| (p.level, p.id));
        Ok(plans)
    }

    async fn list_active_sports(&self) -> StoreResult<Vec<Sport>> {
        let mut sports: Vec<Sport> = self
            .state
            .lock()
            .sports
            .values()
            .filter(|s| s.is_active)
            .cloned()
            .collect();
        sports.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(sports)
    }
}

#[async_trait]
impl Membership for InMemoryStore {
    async fn organization_exists(&self, organization_id: i64) -> StoreResult<bool> {
        Ok(self.state.lock().organizations.contains_key(&organization_id))
    }

    async fn is_organization_member(
        &self,
        organization_id: i64,
        user_id: &str,
    ) -> StoreResult<bool> {
        Ok(self
            .state
            .lock()
            .organizations
            .get(&organization_id)
            .is_some_and(|members| members.contains(user_id)))
    }
}

#[async_trait]
impl ResourceCounter for InMemoryStore {
    async fn count_teams(&self, owner: &Owner) -> StoreResult<i64> {
        let count = self
            .state
            .lock()
            .teams
            .values()
            .filter(|team_owner| *team_owner == owner)
            .count();
        Ok(count as i64)
    }

    async fn team_owner(&self, team_id: i64) -> StoreResult<Option<Owner>> {
        Ok(self.state.lock().teams.get(&team_id).cloned())
    }

    async fn count_team_members(&self, team_id: i64) -> StoreResult<i64> {
        Ok(self
            .state
            .lock()
            .team_members
            .get(&team_id)
            .copied()
            .unwrap_or(0))
    }
}
