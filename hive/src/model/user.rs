//! Users, as far as the core reads them: identity, role, display context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Admins bypass the daily run quota and the LLM kill switch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Admin => "ADMIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USER" => Some(Self::User),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub display_name: Option<String>,
    pub role: UserRole,
    /// Free-text instructions the user wants every supervisor turn to honour.
    pub custom_instructions: Option<String>,
    pub created_at: DateTime<Utc>,
}
