//! Unified error codes for the planner services
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 2xxx: Permission errors
//! - 3xxx: Subscription errors
//! - 4xxx: Plan limit errors
//! - 5xxx: Payment errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values for efficient serialization
/// and cross-language compatibility (Rust, TypeScript, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists
    AlreadyExists = 4,
    /// Invalid request
    InvalidRequest = 5,
    /// Invalid format
    InvalidFormat = 6,
    /// Required field missing
    RequiredField = 7,

    // ==================== 1xxx: Auth ====================
    /// Caller is not authenticated
    NotAuthenticated = 1001,
    /// Token has expired
    TokenExpired = 1003,
    /// Token is invalid
    TokenInvalid = 1004,

    // ==================== 2xxx: Permission ====================
    /// Permission denied
    PermissionDenied = 2001,
    /// Caller is not a member of the owning organization
    NotOrganizationMember = 2002,
    /// Caller does not own the subscription
    NotSubscriptionOwner = 2003,

    // ==================== 3xxx: Subscription ====================
    /// Subscription not found
    SubscriptionNotFound = 3001,
    /// Plan not found or not offered anymore
    PlanNotFound = 3002,
    /// Sport not found or disabled
    SportNotFound = 3003,
    /// Organization not found
    OrganizationNotFound = 3004,
    /// Owner already has an active subscription for this sport
    ActiveSubscriptionExists = 3005,
    /// Subscription is not active
    SubscriptionNotActive = 3006,
    /// Subscription is already active
    SubscriptionAlreadyActive = 3007,
    /// Reactivation window has closed
    RetentionExpired = 3008,
    /// Requested plan equals the current plan
    SamePlan = 3009,
    /// End date is not after the current one
    InvalidEndDate = 3010,
    /// Subscription changed concurrently
    SubscriptionStateChanged = 3011,
    /// Exactly one of user or organization must own a subscription
    InvalidOwner = 3012,

    // ==================== 4xxx: Plan limits ====================
    /// Owner has no active subscription for the sport
    NoActiveSubscription = 4001,
    /// Team limit of the plan reached
    TeamLimitReached = 4002,
    /// Member-per-team limit of the plan reached
    MemberLimitReached = 4003,
    /// Team does not exist or belongs to another owner
    TeamNotFound = 4004,

    // ==================== 5xxx: Payment ====================
    /// Billing provider declined the subscription
    PaymentRequired = 5001,
    /// Billing provider unreachable
    BillingUnavailable = 5002,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Database error
    DatabaseError = 9002,
    /// Network error
    NetworkError = 9003,
    /// Operation timeout
    TimeoutError = 9004,
    /// Configuration error
    ConfigError = 9005,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Check if this is a success code
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Get the developer-facing English message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::Unknown => "An unknown error occurred",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::AlreadyExists => "Resource already exists",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::InvalidFormat => "Invalid format",
            ErrorCode::RequiredField => "Required field is missing",

            // Auth
            ErrorCode::NotAuthenticated => "User is not authenticated",
            ErrorCode::TokenExpired => "Authentication token has expired",
            ErrorCode::TokenInvalid => "Authentication token is invalid",

            // Permission
            ErrorCode::PermissionDenied => "Permission denied",
            ErrorCode::NotOrganizationMember => "Caller is not a member of the organization",
            ErrorCode::NotSubscriptionOwner => "Caller does not own this subscription",

            // Subscription
            ErrorCode::SubscriptionNotFound => "Subscription not found",
            ErrorCode::PlanNotFound => "Subscription plan not found",
            ErrorCode::SportNotFound => "Sport not found",
            ErrorCode::OrganizationNotFound => "Organization not found",
            ErrorCode::ActiveSubscriptionExists => {
                "An active subscription already exists for this sport"
            }
            ErrorCode::SubscriptionNotActive => "Subscription is not active",
            ErrorCode::SubscriptionAlreadyActive => "Subscription is already active",
            ErrorCode::RetentionExpired => {
                "Retention period has ended, create a new subscription instead"
            }
            ErrorCode::SamePlan => "Subscription is already on this plan",
            ErrorCode::InvalidEndDate => "End date must be later than the current one",
            ErrorCode::SubscriptionStateChanged => "Subscription was modified concurrently",
            ErrorCode::InvalidOwner => "Exactly one of user or organization must be set",

            // Plan limits
            ErrorCode::NoActiveSubscription => "No active subscription",
            ErrorCode::TeamLimitReached => "Team limit of the current plan reached",
            ErrorCode::MemberLimitReached => "Member limit per team of the current plan reached",
            ErrorCode::TeamNotFound => "Team not found",

            // Payment
            ErrorCode::PaymentRequired => "Payment required",
            ErrorCode::BillingUnavailable => "Billing provider unavailable",

            // System
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::NetworkError => "Network error",
            ErrorCode::TimeoutError => "Operation timed out",
            ErrorCode::ConfigError => "Configuration error",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error returned when converting an unknown u16 into an [`ErrorCode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::Unknown),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            4 => Ok(ErrorCode::AlreadyExists),
            5 => Ok(ErrorCode::InvalidRequest),
            6 => Ok(ErrorCode::InvalidFormat),
            7 => Ok(ErrorCode::RequiredField),

            // Auth
            1001 => Ok(ErrorCode::NotAuthenticated),
            1003 => Ok(ErrorCode::TokenExpired),
            1004 => Ok(ErrorCode::TokenInvalid),

            // Permission
            2001 => Ok(ErrorCode::PermissionDenied),
            2002 => Ok(ErrorCode::NotOrganizationMember),
            2003 => Ok(ErrorCode::NotSubscriptionOwner),

            // Subscription
            3001 => Ok(ErrorCode::SubscriptionNotFound),
            3002 => Ok(ErrorCode::PlanNotFound),
            3003 => Ok(ErrorCode::SportNotFound),
            3004 => Ok(ErrorCode::OrganizationNotFound),
            3005 => Ok(ErrorCode::ActiveSubscriptionExists),
            3006 => Ok(ErrorCode::SubscriptionNotActive),
            3007 => Ok(ErrorCode::SubscriptionAlreadyActive),
            3008 => Ok(ErrorCode::RetentionExpired),
            3009 => Ok(ErrorCode::SamePlan),
            3010 => Ok(ErrorCode::InvalidEndDate),
            3011 => Ok(ErrorCode::SubscriptionStateChanged),
            3012 => Ok(ErrorCode::InvalidOwner),

            // Plan limits
            4001 => Ok(ErrorCode::NoActiveSubscription),
            4002 => Ok(ErrorCode::TeamLimitReached),
            4003 => Ok(ErrorCode::MemberLimitReached),
            4004 => Ok(ErrorCode::TeamNotFound),

            // Payment
            5001 => Ok(ErrorCode::PaymentRequired),
            5002 => Ok(ErrorCode::BillingUnavailable),

            // System
            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::DatabaseError),
            9003 => Ok(ErrorCode::NetworkError),
            9004 => Ok(ErrorCode::TimeoutError),
            9005 => Ok(ErrorCode::ConfigError),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::Success.code(), 0);
        assert_eq!(ErrorCode::InvalidRequest.code(), 5);
        assert_eq!(ErrorCode::NotAuthenticated.code(), 1001);
        assert_eq!(ErrorCode::PermissionDenied.code(), 2001);
        assert_eq!(ErrorCode::SubscriptionNotFound.code(), 3001);
        assert_eq!(ErrorCode::ActiveSubscriptionExists.code(), 3005);
        assert_eq!(ErrorCode::RetentionExpired.code(), 3008);
        assert_eq!(ErrorCode::TeamLimitReached.code(), 4002);
        assert_eq!(ErrorCode::PaymentRequired.code(), 5001);
        assert_eq!(ErrorCode::InternalError.code(), 9001);
    }

    #[test]
    fn test_is_success() {
        assert!(ErrorCode::Success.is_success());
        assert!(!ErrorCode::NotFound.is_success());
    }

    #[test]
    fn test_try_from_valid() {
        assert_eq!(ErrorCode::try_from(0), Ok(ErrorCode::Success));
        assert_eq!(ErrorCode::try_from(3005), Ok(ErrorCode::ActiveSubscriptionExists));
        assert_eq!(ErrorCode::try_from(4003), Ok(ErrorCode::MemberLimitReached));
        assert_eq!(ErrorCode::try_from(5001), Ok(ErrorCode::PaymentRequired));
    }

    #[test]
    fn test_try_from_invalid() {
        assert_eq!(ErrorCode::try_from(999), Err(InvalidErrorCode(999)));
        assert_eq!(ErrorCode::try_from(4002 + 100), Err(InvalidErrorCode(4102)));
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_string(&ErrorCode::RetentionExpired).unwrap();
        assert_eq!(json, "3008");
    }

    #[test]
    fn test_deserialize() {
        let code: ErrorCode = serde_json::from_str("4002").unwrap();
        assert_eq!(code, ErrorCode::TeamLimitReached);

        let result: Result<ErrorCode, _> = serde_json::from_str("65000");
        assert!(result.is_err());
    }

    #[test]
    fn test_message() {
        assert_eq!(ErrorCode::PaymentRequired.message(), "Payment required");
        assert_eq!(ErrorCode::NoActiveSubscription.message(), "No active subscription");
    }

    #[test]
    fn test_invalid_error_code_display() {
        assert_eq!(InvalidErrorCode(12).to_string(), "Invalid error code: 12");
    }

    #[test]
    fn test_roundtrip_every_code() {
        for code in [
            ErrorCode::Success,
            ErrorCode::Unknown,
            ErrorCode::ValidationFailed,
            ErrorCode::NotFound,
            ErrorCode::AlreadyExists,
            ErrorCode::InvalidRequest,
            ErrorCode::InvalidFormat,
            ErrorCode::RequiredField,
            ErrorCode::NotAuthenticated,
            ErrorCode::TokenExpired,
            ErrorCode::TokenInvalid,
            ErrorCode::PermissionDenied,
            ErrorCode::NotOrganizationMember,
            ErrorCode::NotSubscriptionOwner,
            ErrorCode::SubscriptionNotFound,
            ErrorCode::PlanNotFound,
            ErrorCode::SportNotFound,
            ErrorCode::OrganizationNotFound,
            ErrorCode::ActiveSubscriptionExists,
            ErrorCode::SubscriptionNotActive,
            ErrorCode::SubscriptionAlreadyActive,
            ErrorCode::RetentionExpired,
            ErrorCode::SamePlan,
            ErrorCode::InvalidEndDate,
            ErrorCode::SubscriptionStateChanged,
            ErrorCode::InvalidOwner,
            ErrorCode::NoActiveSubscription,
            ErrorCode::TeamLimitReached,
            ErrorCode::MemberLimitReached,
            ErrorCode::TeamNotFound,
            ErrorCode::PaymentRequired,
            ErrorCode::BillingUnavailable,
            ErrorCode::InternalError,
            ErrorCode::DatabaseError,
            ErrorCode::NetworkError,
            ErrorCode::TimeoutError,
            ErrorCode::ConfigError,
        ] {
            assert_eq!(ErrorCode::try_from(code.code()), Ok(code));
        }
    }
}
