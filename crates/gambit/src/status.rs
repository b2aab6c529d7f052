use gambit_common::status::Code;
use serde::{Deserialize, Serialize};

/// A failed RPC as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Status {
    /// Error category.
    pub code: Code,
    /// Human-readable description.
    pub message: String,
}

impl Status {
    /// Create a new status.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Whether the client may retry the same request later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    fn internal(error: &dyn std::error::Error) -> Self {
        tracing::error!(%error, "internal error");
        Self::new(Code::Internal, "internal error")
    }
}

impl From<gambit_identity::Error> for Status {
    fn from(error: gambit_identity::Error) -> Self {
        match error.code() {
            Code::Internal => Status::internal(&error),
            code => Status::new(code, error.to_string()),
        }
    }
}

impl From<gambit_scheduler::Error> for Status {
    fn from(error: gambit_scheduler::Error) -> Self {
        match error.code() {
            Code::Internal => Status::internal(&error),
            code => Status::new(code, error.to_string()),
        }
    }
}

impl From<gambit_tracker::Error> for Status {
    fn from(error: gambit_tracker::Error) -> Self {
        match error.code() {
            Code::Internal => Status::internal(&error),
            code => Status::new(code, error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_errors_keep_their_code() {
        let status = Status::from(gambit_identity::Error::InvalidTokenFormat);
        assert_eq!(status.code, Code::InvalidArgument);
        assert_eq!(status.message, "invalid token format");
        assert!(!status.is_retryable());

        let status = Status::from(gambit_scheduler::Error::NoActiveRun);
        assert_eq!(status.code, Code::Unavailable);
        assert!(status.is_retryable());

        let status = Status::from(gambit_tracker::Error::UnknownTask);
        assert_eq!(status.code, Code::NotFound);
    }

    #[test]
    fn internal_details_are_hidden() {
        let status = Status::from(gambit_identity::Error::TokenExhausted(10));
        assert_eq!(status.code, Code::Internal);
        assert_eq!(status.message, "internal error");
        assert!(status.is_retryable());
    }

    #[test]
    fn wire_format() {
        let status = Status::new(Code::FailedPrecondition, "broken");
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({ "code": "FAILED_PRECONDITION", "message": "broken" })
        );
    }
}
