//! Lifecycle error type
//!
//! `SubscriptionError` is what the engine and the limit gate return. It
//! carries enough structure for callers to branch on [`ErrorKind`] and maps
//! onto the API-layer [`AppError`] with a stable [`ErrorCode`].

use std::time::Duration;

use axum::response::IntoResponse;
use shared::error::{AppError, ErrorCode};
use shared::subscription::{Owner, OwnerError};
use thiserror::Error;

use crate::billing::BillingError;
use crate::db::StoreError;

/// Coarse classification callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    NotFound,
    Forbidden,
    Conflict,
    InvalidState,
    PaymentRequired,
    /// Retry may succeed (provider outage, timeout, storage failure)
    Transient,
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error(transparent)]
    InvalidOwner(#[from] OwnerError),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("end date must be in the future")]
    InvalidEndDate,

    #[error("subscription is already on plan {0}")]
    SamePlan(i64),

    #[error("plan {0} not found")]
    PlanNotFound(i64),

    #[error("sport {0} not found")]
    SportNotFound(i64),

    #[error("organization {0} not found")]
    OrganizationNotFound(i64),

    #[error("subscription {0} not found")]
    SubscriptionNotFound(i64),

    #[error("team {0} not found")]
    TeamNotFound(i64),

    #[error("user {user_id} is not a member of organization {organization_id}")]
    NotOrganizationMember {
        organization_id: i64,
        user_id: String,
    },

    #[error("caller may not act for {0}")]
    NotOwner(Owner),

    #[error("{owner} already has an active subscription for sport {sport_id}")]
    ActiveSubscriptionExists { owner: Owner, sport_id: i64 },

    #[error("subscription {0} is not active")]
    NotActive(i64),

    #[error("subscription {0} is already active")]
    AlreadyActive(i64),

    #[error("retention period of subscription {0} has ended")]
    RetentionExpired(i64),

    #[error("subscription {0} was changed concurrently")]
    StateChanged(i64),

    #[error("payment was declined")]
    PaymentRequired,

    #[error(transparent)]
    BillingUnavailable(BillingError),

    #[error("billing provider did not answer within {0:?}")]
    BillingTimeout(Duration),

    #[error(transparent)]
    Store(StoreError),
}

impl SubscriptionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidOwner(_)
            | Self::InvalidRequest(_)
            | Self::InvalidEndDate
            | Self::SamePlan(_) => ErrorKind::InvalidRequest,
            Self::PlanNotFound(_)
            | Self::SportNotFound(_)
            | Self::OrganizationNotFound(_)
            | Self::SubscriptionNotFound(_)
            | Self::TeamNotFound(_) => ErrorKind::NotFound,
            Self::NotOrganizationMember { .. } | Self::NotOwner(_) => ErrorKind::Forbidden,
            Self::ActiveSubscriptionExists { .. } => ErrorKind::Conflict,
            Self::NotActive(_)
            | Self::AlreadyActive(_)
            | Self::RetentionExpired(_)
            | Self::StateChanged(_) => ErrorKind::InvalidState,
            Self::PaymentRequired => ErrorKind::PaymentRequired,
            Self::BillingUnavailable(_) | Self::BillingTimeout(_) | Self::Store(_) => {
                ErrorKind::Transient
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidOwner(_) => ErrorCode::InvalidOwner,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::InvalidEndDate => ErrorCode::InvalidEndDate,
            Self::SamePlan(_) => ErrorCode::SamePlan,
            Self::PlanNotFound(_) => ErrorCode::PlanNotFound,
            Self::SportNotFound(_) => ErrorCode::SportNotFound,
            Self::OrganizationNotFound(_) => ErrorCode::OrganizationNotFound,
            Self::SubscriptionNotFound(_) => ErrorCode::SubscriptionNotFound,
            Self::TeamNotFound(_) => ErrorCode::TeamNotFound,
            Self::NotOrganizationMember { .. } => ErrorCode::NotOrganizationMember,
            Self::NotOwner(_) => ErrorCode::NotSubscriptionOwner,
            Self::ActiveSubscriptionExists { .. } => ErrorCode::ActiveSubscriptionExists,
            Self::NotActive(_) => ErrorCode::SubscriptionNotActive,
            Self::AlreadyActive(_) => ErrorCode::SubscriptionAlreadyActive,
            Self::RetentionExpired(_) => ErrorCode::RetentionExpired,
            Self::StateChanged(_) => ErrorCode::SubscriptionStateChanged,
            Self::PaymentRequired => ErrorCode::PaymentRequired,
            Self::BillingUnavailable(_) => ErrorCode::BillingUnavailable,
            Self::BillingTimeout(_) => ErrorCode::TimeoutError,
            Self::Store(_) => ErrorCode::DatabaseError,
        }
    }
}

impl From<StoreError> for SubscriptionError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<BillingError> for SubscriptionError {
    fn from(e: BillingError) -> Self {
        Self::BillingUnavailable(e)
    }
}

impl From<SubscriptionError> for AppError {
    fn from(e: SubscriptionError) -> Self {
        let code = e.code();
        match e {
            // Infrastructure details stay in the log
            SubscriptionError::Store(err) => {
                tracing::error!(error = %err, "Subscription store error");
                AppError::new(code)
            }
            SubscriptionError::BillingUnavailable(err) => {
                tracing::error!(error = %err, "Billing provider error");
                AppError::new(code)
            }
            SubscriptionError::BillingTimeout(after) => {
                tracing::error!(
                    timeout_ms = after.as_millis() as u64,
                    "Billing provider timed out"
                );
                AppError::new(code)
            }
            SubscriptionError::ActiveSubscriptionExists { ref owner, sport_id } => {
                AppError::with_message(code, e.to_string())
                    .with_detail("owner", owner.to_string())
                    .with_detail("sport_id", sport_id)
            }
            SubscriptionError::NotOrganizationMember {
                organization_id, ..
            } => AppError::with_message(code, e.to_string())
                .with_detail("organization_id", organization_id),
            SubscriptionError::SubscriptionNotFound(id)
            | SubscriptionError::NotActive(id)
            | SubscriptionError::AlreadyActive(id)
            | SubscriptionError::RetentionExpired(id)
            | SubscriptionError::StateChanged(id) => {
                AppError::with_message(code, e.to_string()).with_detail("subscription_id", id)
            }
            other => AppError::with_message(code, other.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        SubscriptionError::Store(e).into()
    }
}

impl IntoResponse for SubscriptionError {
    fn into_response(self) -> axum::response::Response {
        let app_error: AppError = self.into();
        app_error.into_response()
    }
}

pub type SubscriptionResult<T> = Result<T, SubscriptionError>;
