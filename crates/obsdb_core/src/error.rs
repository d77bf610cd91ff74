use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObsError {
    #[error("out of range: {message}")]
    OutOfRange { message: String },
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
    #[error("no such field: {name}; available fields: {}", .available.join(", "))]
    UnknownField {
        name: String,
        available: Vec<String>,
    },
    #[error("invalid pattern: {message}")]
    InvalidPattern { message: String },
    #[error("unresolved identity: {message} (attempts: {attempts})")]
    UnresolvedIdentity { message: String, attempts: u32 },
    #[error("storage error: {message}")]
    Storage { message: String },
}

/// Status reported to remote callers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    OutOfRange,
    InvalidArgument,
    Internal,
}

impl ObsError {
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::OutOfRange {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn unknown_field(name: impl Into<String>, available: Vec<String>) -> Self {
        Self::UnknownField {
            name: name.into(),
            available,
        }
    }

    pub fn invalid_pattern(message: impl Into<String>) -> Self {
        Self::InvalidPattern {
            message: message.into(),
        }
    }

    pub fn unresolved(message: impl Into<String>, attempts: u32) -> Self {
        Self::UnresolvedIdentity {
            message: message.into(),
            attempts,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Prefix a storage failure with the name of the operation that produced it.
    pub fn context(self, operation: &str) -> Self {
        match self {
            Self::Storage { message } => Self::Storage {
                message: format!("{operation}: {message}"),
            },
            other => other,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::OutOfRange { .. } => StatusCode::OutOfRange,
            Self::InvalidArgument { .. } => StatusCode::InvalidArgument,
            Self::UnknownField { .. }
            | Self::InvalidPattern { .. }
            | Self::UnresolvedIdentity { .. }
            | Self::Storage { .. } => StatusCode::Internal,
        }
    }
}

pub type ObsResult<T> = Result<T, ObsError>;

impl From<sea_orm::DbErr> for ObsError {
    fn from(value: sea_orm::DbErr) -> Self {
        ObsError::storage(value.to_string())
    }
}

/// Flatten a call result into the `(status, message)` pair of the remote interface.
pub fn status_of<T>(result: &ObsResult<T>) -> (StatusCode, String) {
    match result {
        Ok(_) => (StatusCode::Ok, String::new()),
        Err(err) => (err.status(), err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::{ObsError, StatusCode, status_of};

    #[test]
    fn helper_constructors_set_variants() {
        let err = ObsError::out_of_range("late");
        assert!(matches!(err, ObsError::OutOfRange { .. }));
        let err = ObsError::invalid("bad");
        assert!(matches!(err, ObsError::InvalidArgument { .. }));
        let err = ObsError::unknown_field("colour", vec!["platform".into()]);
        assert!(matches!(err, ObsError::UnknownField { .. }));
        let err = ObsError::invalid_pattern("x/y");
        assert!(matches!(err, ObsError::InvalidPattern { .. }));
        let err = ObsError::unresolved("race", 3);
        assert!(matches!(err, ObsError::UnresolvedIdentity { attempts: 3, .. }));
        let err = ObsError::storage("disk");
        assert!(matches!(err, ObsError::Storage { .. }));
    }

    #[test]
    fn internal_variants_share_status() {
        assert_eq!(ObsError::out_of_range("x").status(), StatusCode::OutOfRange);
        assert_eq!(ObsError::invalid("x").status(), StatusCode::InvalidArgument);
        assert_eq!(
            ObsError::invalid_pattern("x").status(),
            StatusCode::Internal
        );
        assert_eq!(ObsError::unresolved("x", 3).status(), StatusCode::Internal);
        assert_eq!(ObsError::storage("x").status(), StatusCode::Internal);
    }

    #[test]
    fn unknown_field_lists_valid_names() {
        let err = ObsError::unknown_field("colour", vec!["level".into(), "platform".into()]);
        assert_eq!(
            err.to_string(),
            "no such field: colour; available fields: level, platform"
        );
    }

    #[test]
    fn context_prefixes_storage_only() {
        let err = ObsError::storage("locked").context("upsert observation");
        assert_eq!(err.to_string(), "storage error: upsert observation: locked");
        let err = ObsError::out_of_range("late").context("ignored");
        assert_eq!(err.to_string(), "out of range: late");
    }

    #[test]
    fn status_of_flattens_results() {
        let ok: Result<(), ObsError> = Ok(());
        assert_eq!(status_of(&ok), (StatusCode::Ok, String::new()));
        let err: Result<(), ObsError> = Err(ObsError::out_of_range("too many"));
        assert_eq!(
            status_of(&err),
            (StatusCode::OutOfRange, "out of range: too many".to_string())
        );
    }
}
