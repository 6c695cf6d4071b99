use serde::Serialize;
use thiserror::Error;

/// Failure taxonomy shared by every engine operation. Anything the store or
/// cache throws that is not one of the named cases surfaces as `Internal`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("user progress not found")]
    UserNotFound,
    #[error("character mastery not found")]
    MasteryNotFound,
    #[error("streak not found")]
    StreakNotFound,
    #[error("streak freeze limit reached")]
    FreezeLimitReached,
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn internal(message: impl std::fmt::Display) -> Self {
        Self::Internal(message.to_string())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::MasteryNotFound => "MASTERY_NOT_FOUND",
            Self::StreakNotFound => "STREAK_NOT_FOUND",
            Self::FreezeLimitReached => "FREEZE_LIMIT_REACHED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Uniform `{success, data?, message, error?}` envelope the HTTP layer
/// serializes verbatim.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

impl<T: Serialize> ServiceResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.into(),
            error: None,
        }
    }

    pub fn err(err: &EngineError) -> Self {
        Self {
            success: false,
            data: None,
            message: err.to_string(),
            error: Some(err.code()),
        }
    }

    pub fn from_result(result: Result<T, EngineError>, message: impl Into<String>) -> Self {
        match result {
            Ok(data) => Self::ok(data, message),
            Err(err) => Self::err(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(EngineError::UserNotFound.code(), "USER_NOT_FOUND");
        assert_eq!(EngineError::FreezeLimitReached.code(), "FREEZE_LIMIT_REACHED");
        assert_eq!(EngineError::validation("bad accuracy").code(), "VALIDATION_ERROR");
        assert_eq!(EngineError::internal("boom").code(), "INTERNAL_ERROR");
    }

    #[test]
    fn envelope_shape() {
        let ok = ServiceResponse::ok(5i32, "done");
        assert!(ok.success);
        assert_eq!(ok.data, Some(5));
        assert!(ok.error.is_none());

        let err = ServiceResponse::<i32>::err(&EngineError::StreakNotFound);
        assert!(!err.success);
        assert_eq!(err.error, Some("STREAK_NOT_FOUND"));
    }
}
