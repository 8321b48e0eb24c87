//! Service configuration

use std::collections::HashMap;
use std::time::Duration;

use crate::lifecycle::EngineConfig;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Service configuration, loaded once at startup
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// HTTP port
    pub http_port: u16,
    /// Environment: development | staging | production
    pub environment: String,
    /// JWT secret for caller authentication
    pub jwt_secret: String,
    /// Stripe secret key; the logging gateway is used when absent
    pub stripe_secret_key: Option<String>,
    /// Catalog plan id -> Stripe Price ID
    pub stripe_price_ids: HashMap<i64, String>,
    /// Upper bound for a blocking billing call
    pub billing_timeout: Duration,
    /// Days a cancelled subscription can still be reactivated
    pub retention_days: i64,
    /// Period of the expiry / scheduled-change sweep
    pub maintenance_interval: Duration,
    /// Emit JSON log lines
    pub log_json: bool,
}

impl Config {
    /// Require a secret env var: must be set and non-empty in non-development environments.
    fn require_secret(name: &str, environment: &str) -> Result<String, BoxError> {
        let val = match std::env::var(name) {
            Ok(v) => v,
            Err(_) => {
                if environment != "development" {
                    return Err(format!("{name} must be set in {environment} environment").into());
                }
                format!("dev-{name}-not-for-production")
            }
        };
        if val.is_empty() && environment != "development" {
            return Err(format!("{name} must not be empty in {environment} environment").into());
        }
        Ok(val)
    }

    /// Billing key is optional in development only.
    fn billing_secret(environment: &str) -> Result<Option<String>, BoxError> {
        let key = std::env::var("STRIPE_SECRET_KEY")
            .ok()
            .filter(|s| !s.is_empty());
        if key.is_none() && environment == "production" {
            return Err("STRIPE_SECRET_KEY must be set in production environment".into());
        }
        Ok(key)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, BoxError> {
        let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into());

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?,
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            jwt_secret: Self::require_secret("JWT_SECRET", &environment)?,
            stripe_secret_key: Self::billing_secret(&environment)?,
            stripe_price_ids: parse_price_ids(
                &std::env::var("STRIPE_PRICE_IDS").unwrap_or_default(),
            )?,
            billing_timeout: Duration::from_millis(
                std::env::var("BILLING_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10_000),
            ),
            retention_days: std::env::var("RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|days: &i64| *days > 0)
                .unwrap_or(90),
            maintenance_interval: Duration::from_secs(
                std::env::var("MAINTENANCE_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .filter(|secs: &u64| *secs > 0)
                    .unwrap_or(60),
            ),
            log_json: std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")),
            environment,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            retention_days: self.retention_days,
            billing_timeout: self.billing_timeout,
        }
    }
}

/// Parse `1=price_abc,2=price_def` into a plan -> price map.
pub fn parse_price_ids(raw: &str) -> Result<HashMap<i64, String>, BoxError> {
    let mut map = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (plan, price) = entry
            .split_once('=')
            .ok_or_else(|| format!("STRIPE_PRICE_IDS entry `{entry}` is not plan=price"))?;
        let plan_id: i64 = plan
            .trim()
            .parse()
            .map_err(|_| format!("STRIPE_PRICE_IDS plan id `{plan}` is not a number"))?;
        let price = price.trim();
        if price.is_empty() {
            return Err(format!("STRIPE_PRICE_IDS plan {plan_id} has an empty price").into());
        }
        map.insert(plan_id, price.to_string());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_price_map() {
        let map = parse_price_ids(" 1=price_basic, 2 = price_pro ,").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&1], "price_basic");
        assert_eq!(map[&2], "price_pro");
    }

    #[test]
    fn empty_price_map() {
        assert!(parse_price_ids("").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(parse_price_ids("basic").is_err());
        assert!(parse_price_ids("x=price").is_err());
        assert!(parse_price_ids("1=").is_err());
    }
}
