use domain::services::conversion::ConversionError;
use thiserror::Error;

/// Engine-wide error taxonomy.
///
/// Every fallible operation in this crate resolves to one of these
/// variants so callers can react to the kind without string matching.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("External service error: {0}")]
    External(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Short kind tag used in persisted error details.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Validation",
            Self::NotFound(_) => "NotFound",
            Self::Conflict(_) => "Conflict",
            Self::Forbidden(_) => "Forbidden",
            Self::Authentication(_) => "Authentication",
            Self::External(_) => "External",
            Self::Database(_) => "Database",
            Self::Internal(_) => "Internal",
        }
    }

    /// Whether another attempt of the same operation could succeed.
    ///
    /// Validation and authorization failures are deterministic; retrying
    /// them would only burn the retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::External(_) | Self::Database(_) | Self::Internal(_)
        )
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => EngineError::NotFound("Resource not found".into()),
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => EngineError::Conflict("Resource already exists".into()),
                        "23503" => EngineError::NotFound("Referenced resource not found".into()),
                        _ => EngineError::Database(format!("Database error: {}", db_err)),
                    }
                } else {
                    EngineError::Database(format!("Database error: {}", db_err))
                }
            }
            _ => EngineError::Database(format!("Database error: {}", err)),
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::External(format!("HTTP request failed: {}", err))
    }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| {
                    let message = e
                        .message
                        .clone()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "invalid value".to_string());
                    format!("{}: {}", field, message)
                })
            })
            .collect();
        EngineError::Validation(details.join("; "))
    }
}

impl From<ConversionError> for EngineError {
    fn from(err: ConversionError) -> Self {
        EngineError::Validation(format!("Conversion failed: {}", err))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(format!("Serialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlx_row_not_found_maps_to_not_found() {
        let err: EngineError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(EngineError::Validation("x".into()).kind(), "Validation");
        assert_eq!(EngineError::External("x".into()).kind(), "External");
        assert_eq!(EngineError::Authentication("x".into()).kind(), "Authentication");
    }

    #[test]
    fn test_retryability() {
        assert!(EngineError::External("down".into()).is_retryable());
        assert!(EngineError::Database("timeout".into()).is_retryable());
        assert!(!EngineError::Validation("bad input".into()).is_retryable());
        assert!(!EngineError::Forbidden("not yours".into()).is_retryable());
        assert!(!EngineError::Authentication("bad token".into()).is_retryable());
    }
}
