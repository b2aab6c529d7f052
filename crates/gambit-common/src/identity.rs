//! Caller identities.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{status::UnexpectedValueError, TokenId, UnixNanos, UserId};

/// Why a token was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenReason {
    /// Issued without credentials.
    Anonymous,
    /// Issued in exchange for legacy credentials.
    MigratedCredentials,
    /// Issued by an operator.
    Manual,
}

impl TokenReason {
    /// Return a string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenReason::Anonymous => "anonymous",
            TokenReason::MigratedCredentials => "migrated_credentials",
            TokenReason::Manual => "manual",
        }
    }
}

impl Display for TokenReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenReason {
    type Err = UnexpectedValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "anonymous" => TokenReason::Anonymous,
            "migrated_credentials" => TokenReason::MigratedCredentials,
            "manual" => TokenReason::Manual,
            _ => Err(UnexpectedValueError(s.to_string()))?,
        })
    }
}

/// A bearer token and its audit fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    /// Internal ID.
    pub id: TokenId,
    /// The owning legacy user, `None` for anonymous tokens.
    pub user_id: Option<UserId>,
    /// The token string.
    pub token: String,
    /// Issue time.
    pub created_at: UnixNanos,
    /// Last successful validation.
    pub last_used_at: Option<UnixNanos>,
    /// Why the token was issued.
    pub issued_reason: TokenReason,
    /// Last reported client version.
    pub client_version: Option<String>,
    /// Last reported host name.
    pub client_host: Option<String>,
    /// Last reported GPU type.
    pub gpu_type: Option<String>,
    /// Last reported GPU index.
    pub gpu_id: Option<i32>,
}

impl AuthToken {
    /// Whether the token has no owning user.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }
}

/// Input for creating an [`AuthToken`].
#[derive(Debug, Clone)]
pub struct NewAuthToken {
    /// The owning legacy user.
    pub user_id: Option<UserId>,
    /// The token string.
    pub token: String,
    /// Why the token was issued.
    pub issued_reason: TokenReason,
    /// Issue time.
    pub created_at: UnixNanos,
}

/// Self-reported information about a client.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Host name.
    #[serde(default)]
    pub hostname: String,
    /// Client version.
    #[serde(default)]
    pub version: String,
    /// GPU type.
    #[serde(default)]
    pub gpu_type: String,
    /// GPU index.
    #[serde(default)]
    pub gpu_id: Option<i32>,
}

/// A user from the pre-token credential store, never written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyUser {
    /// The user's ID.
    pub id: UserId,
    /// Login name.
    pub username: String,
    /// Stored password.
    pub password: String,
}
