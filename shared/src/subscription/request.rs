//! Request payloads for the subscription API

use serde::{Deserialize, Serialize};

/// POST /api/subscriptions
///
/// The owner arrives as a nullable pair and is validated into an
/// [`Owner`](super::Owner) before anything else happens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    #[serde(default)]
    pub owner_user_id: Option<String>,
    #[serde(default)]
    pub owner_organization_id: Option<i64>,
    pub plan_id: i64,
    pub sport_id: i64,
    /// Optional fixed term; open-ended when absent
    #[serde(default)]
    pub end_date: Option<i64>,
    #[serde(default)]
    pub auto_renew: bool,
}

/// POST /api/subscriptions/{id}/plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePlanRequest {
    pub plan_id: i64,
    /// Apply at this instant instead of immediately
    #[serde(default)]
    pub effective_at: Option<i64>,
}

/// POST /api/subscriptions/{id}/extend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendSubscriptionRequest {
    pub end_date: i64,
    #[serde(default)]
    pub auto_renew: Option<bool>,
}

/// Query string of the limit endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitQuery {
    pub sport_id: i64,
    #[serde(default)]
    pub organization_id: Option<i64>,
    #[serde(default)]
    pub team_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_defaults() {
        let req: CreateSubscriptionRequest =
            serde_json::from_str(r#"{"owner_user_id":"u1","plan_id":2,"sport_id":3}"#).unwrap();
        assert_eq!(req.owner_user_id.as_deref(), Some("u1"));
        assert_eq!(req.owner_organization_id, None);
        assert_eq!(req.end_date, None);
        assert!(!req.auto_renew);
    }
}
