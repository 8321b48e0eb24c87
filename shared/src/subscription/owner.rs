//! Subscription owner reference

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Who a subscription belongs to: a single user or an organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Owner {
    /// Identity-provider subject of the user
    User(String),
    Organization(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OwnerError {
    #[error("either owner_user_id or owner_organization_id must be set")]
    Missing,
    #[error("owner_user_id and owner_organization_id are mutually exclusive")]
    Ambiguous,
    #[error("owner_user_id must not be blank")]
    BlankUserId,
}

impl Owner {
    /// Build an owner from the nullable column/field pair.
    pub fn from_parts(
        user_id: Option<String>,
        organization_id: Option<i64>,
    ) -> Result<Self, OwnerError> {
        match (user_id, organization_id) {
            (Some(_), Some(_)) => Err(OwnerError::Ambiguous),
            (None, None) => Err(OwnerError::Missing),
            (Some(user_id), None) if user_id.trim().is_empty() => Err(OwnerError::BlankUserId),
            (Some(user_id), None) => Ok(Self::User(user_id)),
            (None, Some(organization_id)) => Ok(Self::Organization(organization_id)),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::User(id) => Some(id),
            Self::Organization(_) => None,
        }
    }

    pub fn organization_id(&self) -> Option<i64> {
        match self {
            Self::User(_) => None,
            Self::Organization(id) => Some(*id),
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Organization(id) => write!(f, "organization:{id}"),
        }
    }
}
