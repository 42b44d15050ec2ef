//! Account records and the public projection shared by the API and the client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Student,
    Staff,
    Parent,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Student => "STUDENT",
            Self::Staff => "STAFF",
            Self::Parent => "PARENT",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "STUDENT" => Ok(Self::Student),
            "STAFF" => Ok(Self::Staff),
            "PARENT" => Ok(Self::Parent),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// What a one-time code authorizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodePurpose {
    VerifyEmail,
    ResetPassword,
}

impl CodePurpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VerifyEmail => "verify_email",
            Self::ResetPassword => "reset_password",
        }
    }
}

impl FromStr for CodePurpose {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "verify_email" => Ok(Self::VerifyEmail),
            "reset_password" => Ok(Self::ResetPassword),
            other => Err(format!("unknown code purpose: {other}")),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password_hash", &"***")
            .field("role", &self.role)
            .field("verified", &self.verified)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Input for account creation; the email must already be normalized.
#[derive(Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

impl fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewAccount")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub verified: bool,
}

impl From<&Account> for UserProfile {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.to_string(),
            name: account.name.clone(),
            email: account.email.clone(),
            role: account.role,
            verified: account.verified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn role_serializes_upper_case() -> Result<()> {
        assert_eq!(serde_json::to_value(Role::Student)?, "STUDENT");
        let parsed: Role = serde_json::from_value(serde_json::json!("PARENT"))?;
        assert_eq!(parsed, Role::Parent);
        Ok(())
    }

    #[test]
    fn role_from_str_is_case_insensitive() {
        assert_eq!("staff".parse::<Role>(), Ok(Role::Staff));
        assert!("ADMIN".parse::<Role>().is_err());
    }

    #[test]
    fn code_purpose_round_trips() {
        for purpose in [CodePurpose::VerifyEmail, CodePurpose::ResetPassword] {
            assert_eq!(purpose.as_str().parse::<CodePurpose>(), Ok(purpose));
        }
    }

    #[test]
    fn account_debug_redacts_hash() {
        let account = Account {
            id: Uuid::nil(),
            name: "Alice".to_string(),
            email: "alice@x.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            role: Role::Student,
            verified: false,
            created_at: Utc::now(),
        };
        let debug = format!("{account:?}");
        assert!(!debug.contains("argon2id"));
        assert_eq!(UserProfile::from(&account).email, "alice@x.com");
    }
}
