//! Application state for planner-cloud

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

use crate::billing;
use crate::config::Config;
use crate::db::PgStore;
use crate::lifecycle::SubscriptionEngine;
use crate::quota::PlanLimitGate;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Subscription lifecycle engine
    pub engine: Arc<SubscriptionEngine>,
    /// Plan-limit checks for resource creation
    pub limits: Arc<PlanLimitGate>,
    /// JWT secret for caller authentication
    pub jwt_secret: String,
}

impl AppState {
    /// Connect to PostgreSQL, run migrations and wire the engine.
    pub async fn new(config: &Config) -> Result<Self, BoxError> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(&config.database_url)
            .await?;
        tracing::info!("Database connected");

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");

        let store = Arc::new(PgStore::new(pool));
        let billing: Arc<dyn billing::BillingGateway> = Arc::from(billing::from_config(config)?);

        let engine = SubscriptionEngine::new(store.clone(), store.clone(), store.clone(), billing)
            .with_config(config.engine_config());
        let limits = PlanLimitGate::new(store.clone(), store.clone(), store);

        Ok(Self::from_parts(
            Arc::new(engine),
            Arc::new(limits),
            config.jwt_secret.clone(),
        ))
    }

    pub fn from_parts(
        engine: Arc<SubscriptionEngine>,
        limits: Arc<PlanLimitGate>,
        jwt_secret: String,
    ) -> Self {
        Self {
            engine,
            limits,
            jwt_secret,
        }
    }
}
