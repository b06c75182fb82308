//! Error types shared across the CheckIn crates.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CheckinError>;

#[derive(Debug, Error)]
pub enum CheckinError {
    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("invalid task configuration")]
    TaskConfig(#[from] TaskConfigError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A task configuration key that is missing or unusable.
///
/// Task configuration is a free-form JSON object edited by users, so these
/// are expected at run time and always end up as a failed run rather than a
/// crash.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskConfigError {
    #[error("missing required key `{0}`")]
    MissingKey(&'static str),

    #[error("key `{key}` must be {expected}")]
    WrongType {
        key: &'static str,
        expected: &'static str,
    },

    #[error("key `{key}` has invalid value: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn task_config_error_is_the_source() {
        let err = CheckinError::from(TaskConfigError::MissingKey("signin_url"));
        assert_eq!(err.to_string(), "invalid task configuration");
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("missing required key `signin_url`"));
    }
}
