use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use shared::subscription::{
    ChangePlanRequest, ChangeType, CreateSubscriptionRequest, ExtendSubscriptionRequest, Owner,
    Sport, SubscriptionPlan, SubscriptionStatus,
};
use shared::util::DAY_MILLIS;

use super::*;
use crate::billing::{BillingCall, BillingError, ScriptedGateway};
use crate::clock::ManualClock;
use crate::db::InMemoryStore;
use crate::error::ErrorKind;

const START: i64 = 1_750_000_000_000;
const SPORT: i64 = 10;
const INACTIVE_SPORT: i64 = 11;
const BASIC: i64 = 1;
const PRO: i64 = 2;
const RETIRED: i64 = 3;
const ORG: i64 = 100;

struct Fixture {
    store: InMemoryStore,
    billing: Arc<ScriptedGateway>,
    clock: Arc<ManualClock>,
    engine: SubscriptionEngine,
}

fn plan(id: i64, level: i32, max_teams: Option<i32>, is_active: bool) -> SubscriptionPlan {
    SubscriptionPlan {
        id,
        name: format!("plan-{id}"),
        level,
        price: Decimal::new(999 * level as i64, 2),
        max_teams,
        max_members_per_team: None,
        features: None,
        is_active,
    }
}

fn fixture_with(config: EngineConfig) -> Fixture {
    let store = InMemoryStore::new();
    store.add_plan(plan(BASIC, 1, Some(1), true));
    store.add_plan(plan(PRO, 2, Some(5), true));
    store.add_plan(plan(RETIRED, 3, None, false));
    store.add_sport(Sport {
        id: SPORT,
        name: "football".into(),
        is_active: true,
    });
    store.add_sport(Sport {
        id: INACTIVE_SPORT,
        name: "cricket".into(),
        is_active: false,
    });
    store.add_organization(ORG, &["alice", "bob"]);

    let billing = Arc::new(ScriptedGateway::approving());
    let clock = Arc::new(ManualClock::new(START));
    let engine = SubscriptionEngine::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        billing.clone(),
    )
    .with_clock(clock.clone())
    .with_config(config);

    Fixture {
        store,
        billing,
        clock,
        engine,
    }
}

fn fixture() -> Fixture {
    fixture_with(EngineConfig::default())
}

fn for_user(user: &str, plan_id: i64) -> CreateSubscriptionRequest {
    CreateSubscriptionRequest {
        owner_user_id: Some(user.into()),
        plan_id,
        sport_id: SPORT,
        ..Default::default()
    }
}

fn for_org(plan_id: i64) -> CreateSubscriptionRequest {
    CreateSubscriptionRequest {
        owner_organization_id: Some(ORG),
        plan_id,
        sport_id: SPORT,
        ..Default::default()
    }
}

/// Let spawned billing notifications run.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// ========== Create ==========

#[tokio::test]
async fn create_persists_active_subscription_with_history() {
    let f = fixture();
    let sub = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap();

    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert!(sub.is_active);
    assert_eq!(sub.owner, Owner::User("alice".into()));
    assert_eq!(sub.start_date, START);

    let history = f.engine.history("alice", sub.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].change_type, ChangeType::Upgrade);
    assert_eq!(history[0].old_plan_id, None);
    assert_eq!(history[0].new_plan_id, BASIC);
    assert_eq!(history[0].actor_user_id.as_deref(), Some("alice"));
    assert_eq!(f.billing.calls(), vec![BillingCall::Create(sub.id)]);
}

#[tokio::test]
async fn create_requires_exactly_one_owner() {
    let f = fixture();

    let both = CreateSubscriptionRequest {
        owner_user_id: Some("alice".into()),
        owner_organization_id: Some(ORG),
        plan_id: BASIC,
        sport_id: SPORT,
        ..Default::default()
    };
    let err = f.engine.create("alice", both).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);

    let neither = CreateSubscriptionRequest {
        plan_id: BASIC,
        sport_id: SPORT,
        ..Default::default()
    };
    let err = f.engine.create("alice", neither).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);

    assert_eq!(f.store.subscription_count(), 0);
    assert!(f.billing.calls().is_empty());
}

#[tokio::test]
async fn create_rejects_unknown_or_inactive_catalog_entries() {
    let f = fixture();

    let err = f.engine.create("alice", for_user("alice", 99)).await.unwrap_err();
    assert!(matches!(err, SubscriptionError::PlanNotFound(99)));

    let err = f
        .engine
        .create("alice", for_user("alice", RETIRED))
        .await
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::PlanNotFound(RETIRED)));

    let mut req = for_user("alice", BASIC);
    req.sport_id = INACTIVE_SPORT;
    let err = f.engine.create("alice", req).await.unwrap_err();
    assert!(matches!(err, SubscriptionError::SportNotFound(INACTIVE_SPORT)));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn create_rejects_past_end_date() {
    let f = fixture();
    let mut req = for_user("alice", BASIC);
    req.end_date = Some(START);
    let err = f.engine.create("alice", req).await.unwrap_err();
    assert!(matches!(err, SubscriptionError::InvalidEndDate));
}

#[tokio::test]
async fn create_checks_caller_authority() {
    let f = fixture();

    let err = f.engine.create("mallory", for_user("alice", BASIC)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = f.engine.create("mallory", for_org(BASIC)).await.unwrap_err();
    assert!(matches!(
        err,
        SubscriptionError::NotOrganizationMember { organization_id: ORG, .. }
    ));

    let mut req = for_org(BASIC);
    req.owner_organization_id = Some(404);
    let err = f.engine.create("alice", req).await.unwrap_err();
    assert!(matches!(err, SubscriptionError::OrganizationNotFound(404)));

    assert!(f.billing.calls().is_empty());
    assert!(f.engine.create("bob", for_org(BASIC)).await.is_ok());
}

#[tokio::test]
async fn second_active_subscription_for_same_sport_conflicts() {
    let f = fixture();
    f.engine.create("alice", for_user("alice", BASIC)).await.unwrap();

    let err = f.engine.create("alice", for_user("alice", PRO)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(f.billing.calls().len(), 1);

    // Same user, organization owner: independent key
    f.engine.create("alice", for_org(BASIC)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_yield_one_winner() {
    for _ in 0..20 {
        let f = fixture();
        f.billing.set_delay(Some(Duration::from_millis(5)));
        let engine = Arc::new(f.engine);

        let (a, b) = tokio::join!(
            {
                let engine = Arc::clone(&engine);
                async move { engine.create("bob", for_org(BASIC)).await }
            },
            {
                let engine = Arc::clone(&engine);
                async move { engine.create("alice", for_org(PRO)).await }
            }
        );

        let results = [a, b];
        let won = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.kind() == ErrorKind::Conflict))
            .count();
        assert_eq!(won, 1);
        assert_eq!(conflicts, 1);
        assert_eq!(f.store.subscription_count(), 1);
        assert_eq!(f.store.history_count(), 1);
    }
}

#[tokio::test]
async fn declined_payment_leaves_no_trace() {
    let f = fixture();
    f.billing.set_approve(false);

    let err = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap_err();
    assert!(matches!(err, SubscriptionError::PaymentRequired));
    assert_eq!(err.kind(), ErrorKind::PaymentRequired);
    assert_eq!(f.store.subscription_count(), 0);
    assert_eq!(f.store.history_count(), 0);

    // The (owner, sport) key is free again
    f.billing.set_approve(true);
    f.engine.create("alice", for_user("alice", BASIC)).await.unwrap();
}

#[tokio::test]
async fn unreachable_billing_rolls_back_as_transient() {
    let f = fixture();
    f.billing
        .set_failure(Some(BillingError::Unavailable("connection refused".into())));

    let err = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap_err();
    assert!(matches!(err, SubscriptionError::BillingUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(f.store.subscription_count(), 0);
    assert_eq!(f.store.history_count(), 0);
}

#[tokio::test]
async fn billing_timeout_rolls_back() {
    let f = fixture_with(EngineConfig {
        billing_timeout: Duration::from_millis(20),
        ..EngineConfig::default()
    });
    f.billing.set_delay(Some(Duration::from_millis(500)));

    let err = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap_err();
    assert!(matches!(err, SubscriptionError::BillingTimeout(_)));
    assert!(err.is_retryable());
    assert_eq!(f.store.subscription_count(), 0);
    assert!(
        !f.engine
            .has_active_subscription(&Owner::User("alice".into()), SPORT)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn failed_billing_call_voids_provider_side() {
    let f = fixture();
    f.billing
        .set_failure(Some(BillingError::Unavailable("reset by peer".into())));

    f.engine.create("alice", for_user("alice", BASIC)).await.unwrap_err();
    settle().await;

    let calls = f.billing.calls();
    let Some(BillingCall::Create(id)) = calls.first().cloned() else {
        panic!("expected a create call, got {calls:?}");
    };
    assert!(calls.contains(&BillingCall::Void(id)));
}

#[tokio::test]
async fn timed_out_create_is_voided() {
    let f = fixture_with(EngineConfig {
        billing_timeout: Duration::from_millis(20),
        ..EngineConfig::default()
    });
    f.billing.set_delay(Some(Duration::from_millis(500)));

    f.engine.create("alice", for_user("alice", BASIC)).await.unwrap_err();
    settle().await;

    let calls = f.billing.calls();
    assert_eq!(calls.len(), 2);
    let BillingCall::Create(id) = calls[0] else {
        panic!("expected a create call, got {calls:?}");
    };
    assert_eq!(calls[1], BillingCall::Void(id));
}

#[tokio::test]
async fn commit_failure_after_approval_voids_provider_side() {
    let f = fixture();
    f.store.fail_next_commit();

    let err = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap_err();
    assert!(matches!(err, SubscriptionError::Store(_)));
    assert!(err.is_retryable());
    assert_eq!(f.store.subscription_count(), 0);
    assert_eq!(f.store.history_count(), 0);

    settle().await;
    let calls = f.billing.calls();
    let Some(BillingCall::Create(id)) = calls.first().cloned() else {
        panic!("expected a create call, got {calls:?}");
    };
    assert_eq!(calls, vec![BillingCall::Create(id), BillingCall::Void(id)]);
    assert!(!calls.contains(&BillingCall::Cancel(id)));
}

#[tokio::test]
async fn declined_create_is_not_voided() {
    let f = fixture();
    f.billing.set_approve(false);

    f.engine.create("alice", for_user("alice", BASIC)).await.unwrap_err();
    settle().await;
    assert!(
        !f.billing
            .calls()
            .iter()
            .any(|call| matches!(call, BillingCall::Void(_)))
    );
}

// ========== Cancel / Reactivate ==========

#[tokio::test]
async fn cancel_blocks_access_and_opens_retention_window() {
    let f = fixture();
    let sub = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap();

    f.clock.advance(1_000);
    let cancelled = f.engine.cancel("alice", sub.id).await.unwrap();
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    assert!(!cancelled.is_active);
    assert_eq!(cancelled.cancelled_at, Some(START + 1_000));
    assert_eq!(
        cancelled.retention_ends_at,
        Some(START + 1_000 + 90 * DAY_MILLIS)
    );

    settle().await;
    assert!(f.billing.calls().contains(&BillingCall::Cancel(sub.id)));
}

#[tokio::test]
async fn cancel_twice_is_invalid_state() {
    let f = fixture();
    let sub = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap();

    f.engine.cancel("alice", sub.id).await.unwrap();
    let err = f.engine.cancel("alice", sub.id).await.unwrap_err();
    assert!(matches!(err, SubscriptionError::NotActive(id) if id == sub.id));
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn cancel_survives_billing_failure() {
    let f = fixture();
    let sub = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap();

    f.billing
        .set_failure(Some(BillingError::Provider("no such subscription".into())));
    let cancelled = f.engine.cancel("alice", sub.id).await.unwrap();
    settle().await;

    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    let stored = f.engine.get("alice", sub.id).await.unwrap();
    assert_eq!(stored.status, SubscriptionStatus::Cancelled);
}

#[tokio::test]
async fn only_owner_or_member_may_act() {
    let f = fixture();
    let personal = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap();
    let shared = f.engine.create("alice", for_org(BASIC)).await.unwrap();

    let err = f.engine.cancel("bob", personal.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = f.engine.cancel("mallory", shared.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    // Any member of the owning organization
    f.engine.cancel("bob", shared.id).await.unwrap();

    let err = f.engine.cancel("alice", 12345).await.unwrap_err();
    assert!(matches!(err, SubscriptionError::SubscriptionNotFound(12345)));
}

#[tokio::test]
async fn reactivate_restores_access_within_retention() {
    let f = fixture();
    let sub = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap();
    f.engine.cancel("alice", sub.id).await.unwrap();

    f.clock.advance(DAY_MILLIS);
    let active = f.engine.reactivate("alice", sub.id).await.unwrap();
    assert_eq!(active.status, SubscriptionStatus::Active);
    assert!(active.is_active);
    assert_eq!(active.cancelled_at, None);
    assert_eq!(active.retention_ends_at, None);

    settle().await;
    assert!(f.billing.calls().contains(&BillingCall::Reactivate(sub.id)));
}

#[tokio::test]
async fn retention_deadline_is_exclusive() {
    let f = fixture();
    let sub = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap();

    let cancelled = f.engine.cancel("alice", sub.id).await.unwrap();
    let deadline = cancelled.retention_ends_at.unwrap();
    f.clock.set(deadline - 1);
    f.engine.reactivate("alice", sub.id).await.unwrap();

    let cancelled = f.engine.cancel("alice", sub.id).await.unwrap();
    let deadline = cancelled.retention_ends_at.unwrap();
    f.clock.set(deadline);
    let err = f.engine.reactivate("alice", sub.id).await.unwrap_err();
    assert!(matches!(err, SubscriptionError::RetentionExpired(_)));
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    f.clock.set(deadline + DAY_MILLIS);
    assert!(f.engine.reactivate("alice", sub.id).await.is_err());
}

#[tokio::test]
async fn reactivate_active_subscription_is_invalid_state() {
    let f = fixture();
    let sub = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap();
    let err = f.engine.reactivate("alice", sub.id).await.unwrap_err();
    assert!(matches!(err, SubscriptionError::AlreadyActive(_)));
}

#[tokio::test]
async fn reactivate_conflicts_with_newer_active_subscription() {
    let f = fixture();
    let old = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap();
    f.engine.cancel("alice", old.id).await.unwrap();
    f.engine.create("alice", for_user("alice", PRO)).await.unwrap();

    let err = f.engine.reactivate("alice", old.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    let stored = f.engine.get("alice", old.id).await.unwrap();
    assert_eq!(stored.status, SubscriptionStatus::Cancelled);
}

#[tokio::test]
async fn each_transition_appends_one_history_row() {
    let f = fixture();
    let sub = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap();
    f.engine.cancel("alice", sub.id).await.unwrap();
    f.engine.reactivate("alice", sub.id).await.unwrap();
    // Rejected transitions write nothing
    let _ = f.engine.reactivate("alice", sub.id).await;

    let kinds: Vec<ChangeType> = f
        .engine
        .history("alice", sub.id)
        .await
        .unwrap()
        .into_iter()
        .map(|h| h.change_type)
        .collect();
    assert_eq!(
        kinds,
        vec![ChangeType::Upgrade, ChangeType::Cancel, ChangeType::Reactivate]
    );
}

// ========== Expiry ==========

#[tokio::test]
async fn expire_due_is_idempotent() {
    let f = fixture();
    let mut fixed = for_user("alice", BASIC);
    fixed.end_date = Some(START + 10 * DAY_MILLIS);
    let fixed = f.engine.create("alice", fixed).await.unwrap();

    let mut renewing = for_org(BASIC);
    renewing.end_date = Some(START + 10 * DAY_MILLIS);
    renewing.auto_renew = true;
    let renewing = f.engine.create("alice", renewing).await.unwrap();

    assert_eq!(f.engine.expire_due(START + 10 * DAY_MILLIS - 1).await.unwrap(), 0);

    let now = START + 10 * DAY_MILLIS;
    assert_eq!(f.engine.expire_due(now).await.unwrap(), 1);
    assert_eq!(f.engine.expire_due(now).await.unwrap(), 0);

    let expired = f.engine.get("alice", fixed.id).await.unwrap();
    assert_eq!(expired.status, SubscriptionStatus::Expired);
    assert!(!expired.is_active);
    let history = f.engine.history("alice", fixed.id).await.unwrap();
    assert_eq!(history.last().map(|h| h.change_type), Some(ChangeType::Expire));

    let still = f.engine.get("alice", renewing.id).await.unwrap();
    assert!(still.is_active);

    // Expired subscriptions cannot be reactivated
    let err = f.engine.reactivate("alice", fixed.id).await.unwrap_err();
    assert!(matches!(err, SubscriptionError::RetentionExpired(_)));
}

#[tokio::test]
async fn write_from_stale_read_cannot_revert_plan_change() {
    let f = fixture();
    let sub = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap();
    let mut stale = f.store.find_by_id(sub.id).await.unwrap().unwrap();

    f.engine
        .change_plan("alice", sub.id, ChangePlanRequest { plan_id: PRO, effective_at: None })
        .await
        .unwrap();

    // A sweep that read the row before the plan change tries to expire it
    stale.set_status(SubscriptionStatus::Expired, START);
    let expected = stale.revise(START);
    let mut tx = f.store.begin().await.unwrap();
    tx.update_subscription(&stale, expected).await.unwrap();
    let err = tx.commit().await.unwrap_err();
    assert!(matches!(err, StoreError::StaleState(id) if id == sub.id));

    let stored = f.engine.get("alice", sub.id).await.unwrap();
    assert_eq!(stored.plan_id, PRO);
    assert!(stored.is_active);
    let history = f.engine.history("alice", sub.id).await.unwrap();
    assert_eq!(history.last().map(|h| h.new_plan_id), Some(stored.plan_id));
}

#[tokio::test]
async fn expiry_sweep_does_not_overwrite_a_later_extension() {
    let f = fixture();
    let mut req = for_user("alice", BASIC);
    req.end_date = Some(START + DAY_MILLIS);
    let sub = f.engine.create("alice", req).await.unwrap();
    let seen_by_sweep = f.store.find_by_id(sub.id).await.unwrap().unwrap();

    let extended = f
        .engine
        .extend(
            "alice",
            sub.id,
            ExtendSubscriptionRequest { end_date: START + 30 * DAY_MILLIS, auto_renew: None },
        )
        .await
        .unwrap();
    assert_eq!(extended.version, seen_by_sweep.version + 1);

    let mut expired = seen_by_sweep;
    expired.set_status(SubscriptionStatus::Expired, START + DAY_MILLIS);
    let expected = expired.revise(START + DAY_MILLIS);
    let mut tx = f.store.begin().await.unwrap();
    tx.update_subscription(&expired, expected).await.unwrap();
    assert!(tx.commit().await.is_err());

    // The sweep itself re-reads and finds nothing due
    assert_eq!(f.engine.expire_due(START + DAY_MILLIS).await.unwrap(), 0);
    let stored = f.engine.get("alice", sub.id).await.unwrap();
    assert!(stored.is_active);
    assert_eq!(stored.end_date, Some(START + 30 * DAY_MILLIS));
}

#[tokio::test]
async fn every_transition_bumps_the_version() {
    let f = fixture();
    let sub = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap();
    assert_eq!(sub.version, 1);

    let cancelled = f.engine.cancel("alice", sub.id).await.unwrap();
    assert_eq!(cancelled.version, 2);
    let reactivated = f.engine.reactivate("alice", sub.id).await.unwrap();
    assert_eq!(reactivated.version, 3);
    assert_eq!(f.store.find_by_id(sub.id).await.unwrap().unwrap().version, 3);
}

// ========== Plan changes ==========

#[tokio::test]
async fn immediate_plan_change_records_direction() {
    let f = fixture();
    let sub = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap();

    let outcome = f
        .engine
        .change_plan("alice", sub.id, ChangePlanRequest { plan_id: PRO, effective_at: None })
        .await
        .unwrap();
    let PlanChangeOutcome::Applied(upgraded) = outcome else {
        panic!("expected immediate change");
    };
    assert_eq!(upgraded.plan_id, PRO);

    f.engine
        .change_plan("alice", sub.id, ChangePlanRequest { plan_id: BASIC, effective_at: None })
        .await
        .unwrap();

    let history = f.engine.history("alice", sub.id).await.unwrap();
    assert_eq!(history[1].change_type, ChangeType::Upgrade);
    assert_eq!(history[1].old_plan_id, Some(BASIC));
    assert_eq!(history[2].change_type, ChangeType::Downgrade);
    assert_eq!(history[2].new_plan_id, BASIC);

    settle().await;
    assert!(f.billing.calls().contains(&BillingCall::ChangePlan {
        subscription_id: sub.id,
        plan_id: PRO
    }));
}

#[tokio::test]
async fn plan_change_validation() {
    let f = fixture();
    let sub = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap();

    let err = f
        .engine
        .change_plan("alice", sub.id, ChangePlanRequest { plan_id: BASIC, effective_at: None })
        .await
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::SamePlan(BASIC)));

    let err = f
        .engine
        .change_plan("alice", sub.id, ChangePlanRequest { plan_id: RETIRED, effective_at: None })
        .await
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::PlanNotFound(RETIRED)));

    f.engine.cancel("alice", sub.id).await.unwrap();
    let err = f
        .engine
        .change_plan("alice", sub.id, ChangePlanRequest { plan_id: PRO, effective_at: None })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn scheduled_plan_change_applies_when_due() {
    let f = fixture();
    let sub = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap();
    let at = START + 30 * DAY_MILLIS;

    let outcome = f
        .engine
        .change_plan(
            "alice",
            sub.id,
            ChangePlanRequest { plan_id: PRO, effective_at: Some(at - DAY_MILLIS) },
        )
        .await
        .unwrap();
    assert!(matches!(outcome, PlanChangeOutcome::Scheduled(_)));

    // A newer request replaces the pending one
    f.engine
        .change_plan("alice", sub.id, ChangePlanRequest { plan_id: PRO, effective_at: Some(at) })
        .await
        .unwrap();
    let pending = f.store.pending_plan_changes();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].effective_at, at);

    assert_eq!(f.engine.apply_due_plan_changes(at - 1).await.unwrap(), 0);
    assert_eq!(f.engine.apply_due_plan_changes(at).await.unwrap(), 1);
    assert_eq!(f.engine.apply_due_plan_changes(at).await.unwrap(), 0);

    let stored = f.engine.get("alice", sub.id).await.unwrap();
    assert_eq!(stored.plan_id, PRO);
    let history = f.engine.history("alice", sub.id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.change_type, ChangeType::Upgrade);
    assert_eq!(last.effective_at, at);
    assert_eq!(last.requested_at, START);
    assert!(f.store.pending_plan_changes().is_empty());
}

#[tokio::test]
async fn scheduled_change_for_cancelled_subscription_is_discarded() {
    let f = fixture();
    let sub = f.engine.create("alice", for_user("alice", BASIC)).await.unwrap();
    let at = START + DAY_MILLIS;
    f.engine
        .change_plan("alice", sub.id, ChangePlanRequest { plan_id: PRO, effective_at: Some(at) })
        .await
        .unwrap();
    f.engine.cancel("alice", sub.id).await.unwrap();

    assert_eq!(f.engine.apply_due_plan_changes(at).await.unwrap(), 0);
    assert!(f.store.pending_plan_changes().is_empty());
    let stored = f.engine.get("alice", sub.id).await.unwrap();
    assert_eq!(stored.plan_id, BASIC);
}

// ========== Extend / queries ==========

#[tokio::test]
async fn extend_moves_end_date_forward_only() {
    let f = fixture();
    let mut req = for_user("alice", BASIC);
    req.end_date = Some(START + 10 * DAY_MILLIS);
    let sub = f.engine.create("alice", req).await.unwrap();

    let err = f
        .engine
        .extend(
            "alice",
            sub.id,
            ExtendSubscriptionRequest { end_date: START + 5 * DAY_MILLIS, auto_renew: None },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::InvalidEndDate));

    let extended = f
        .engine
        .extend(
            "alice",
            sub.id,
            ExtendSubscriptionRequest {
                end_date: START + 40 * DAY_MILLIS,
                auto_renew: Some(true),
            },
        )
        .await
        .unwrap();
    assert_eq!(extended.end_date, Some(START + 40 * DAY_MILLIS));
    assert!(extended.auto_renew);
    assert_eq!(extended.next_billing_date, extended.end_date);

    let history = f.engine.history("alice", sub.id).await.unwrap();
    assert_eq!(history.last().map(|h| h.change_type), Some(ChangeType::Extend));
}

#[tokio::test]
async fn owner_queries() {
    let f = fixture();
    let org = Owner::Organization(ORG);
    assert!(!f.engine.has_active_subscription(&org, SPORT).await.unwrap());

    let sub = f.engine.create("bob", for_org(PRO)).await.unwrap();
    assert!(f.engine.has_active_subscription(&org, SPORT).await.unwrap());

    let listed = f.engine.list_for_owner("alice", &org).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, sub.id);

    let err = f.engine.list_for_owner("mallory", &org).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let plans = f.engine.list_active_plans().await.unwrap();
    let ids: Vec<i64> = plans.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![BASIC, PRO]);
}

#[tokio::test]
async fn owner_status_reports_live_subscriptions() {
    let f = fixture();
    let alice = Owner::User("alice".into());

    let empty = f.engine.owner_status("alice", &alice).await.unwrap();
    assert!(!empty.has_active_subscription);
    assert!(empty.subscriptions.is_empty());

    let mut req = for_user("alice", BASIC);
    req.end_date = Some(START + 10 * DAY_MILLIS);
    let sub = f.engine.create("alice", req).await.unwrap();

    let status = f.engine.owner_status("alice", &alice).await.unwrap();
    assert!(status.has_active_subscription);
    assert_eq!(status.active_subscriptions.len(), 1);
    assert_eq!(status.active_subscriptions[0].id, sub.id);

    // Past its end date but not yet swept: still listed, no longer live
    f.clock.set(START + 10 * DAY_MILLIS);
    let status = f.engine.owner_status("alice", &alice).await.unwrap();
    assert!(!status.has_active_subscription);
    assert!(status.active_subscriptions.is_empty());
    assert_eq!(status.subscriptions.len(), 1);
    assert!(!f.engine.has_active_subscription(&alice, SPORT).await.unwrap());

    let err = f.engine.owner_status("bob", &alice).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn only_active_sports_are_listed() {
    let f = fixture();
    let sports = f.engine.list_active_sports().await.unwrap();
    let ids: Vec<i64> = sports.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![SPORT]);
}
