//! Error classification shared by all components.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// The category of a failed operation as seen by clients.
///
/// Clients use this to tell "retry now" apart from
/// "stop, the input was wrong".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    /// Malformed caller input.
    InvalidArgument,
    /// The token is not known.
    Unauthenticated,
    /// The requested entity does not exist.
    NotFound,
    /// No work can be handed out right now.
    Unavailable,
    /// Repository failure or numeric failure on the server side.
    Internal,
    /// An internal invariant was violated.
    FailedPrecondition,
}

impl Code {
    /// Return a string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::Unauthenticated => "UNAUTHENTICATED",
            Code::NotFound => "NOT_FOUND",
            Code::Unavailable => "UNAVAILABLE",
            Code::Internal => "INTERNAL",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
        }
    }

    /// Whether the client is expected to retry the same request later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Code::Unavailable | Code::Internal)
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Code {
    type Err = UnexpectedValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "INVALID_ARGUMENT" => Code::InvalidArgument,
            "UNAUTHENTICATED" => Code::Unauthenticated,
            "NOT_FOUND" => Code::NotFound,
            "UNAVAILABLE" => Code::Unavailable,
            "INTERNAL" => Code::Internal,
            "FAILED_PRECONDITION" => Code::FailedPrecondition,
            _ => Err(UnexpectedValueError(s.to_string()))?,
        })
    }
}

/// Unexpected value received.
#[derive(Debug, thiserror::Error)]
#[error("unexpected value: {0}")]
pub struct UnexpectedValueError(pub String);
