//! Periodic maintenance: due plan changes, then expiry

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::lifecycle::SubscriptionEngine;

/// What one maintenance pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub plan_changes_applied: usize,
    pub expired: usize,
}

/// One pass at the engine's current time. Errors are logged, never returned.
pub async fn run_maintenance(engine: &SubscriptionEngine) -> MaintenanceReport {
    let now = engine.now();
    let mut report = MaintenanceReport::default();

    match engine.apply_due_plan_changes(now).await {
        Ok(applied) => report.plan_changes_applied = applied,
        Err(e) => tracing::error!(error = %e, "Scheduled plan change sweep failed"),
    }
    match engine.expire_due(now).await {
        Ok(expired) => report.expired = expired,
        Err(e) => tracing::error!(error = %e, "Expiry sweep failed"),
    }

    if report != MaintenanceReport::default() {
        tracing::info!(
            plan_changes_applied = report.plan_changes_applied,
            expired = report.expired,
            "Maintenance pass finished"
        );
    }
    report
}

/// Run [`run_maintenance`] every `period` until the runtime shuts down.
pub fn spawn_maintenance(engine: Arc<SubscriptionEngine>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            run_maintenance(&engine).await;
        }
    })
}
