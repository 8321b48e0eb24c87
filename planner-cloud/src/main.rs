//! planner-cloud - subscription lifecycle service

use planner_cloud::api;
use planner_cloud::config::Config;
use planner_cloud::state::AppState;
use planner_cloud::worker;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "planner_cloud=info,tower_http=info".into());
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting planner-cloud (env: {})", config.environment);

    // Initialize application state
    let state = AppState::new(&config).await?;

    // Expiry and scheduled plan changes
    let maintenance = worker::spawn_maintenance(state.engine.clone(), config.maintenance_interval);

    let app = api::create_router(state);
    let http_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&http_addr).await?;
    tracing::info!("planner-cloud HTTP listening on {http_addr}");

    axum::serve(listener, app).await?;
    maintenance.abort();

    Ok(())
}
