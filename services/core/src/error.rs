use serde::{Deserialize, Serialize};

/// Failure taxonomy shared by both process roles.
///
/// Codes are transport-neutral; the API layer maps them to HTTP statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    FileTooLarge,
    UnsupportedFormat,
    NotFound,
    StorageError,
    ProcessingError,
    DatabaseError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::FileTooLarge => "FILE_TOO_LARGE",
            ErrorCode::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::ProcessingError => "PROCESSING_ERROR",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether the code denotes a client-side (4xx) failure.
    pub fn is_client_error(self) -> bool {
        matches!(
            self,
            ErrorCode::ValidationError
                | ErrorCode::FileTooLarge
                | ErrorCode::UnsupportedFormat
                | ErrorCode::NotFound
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_strings() {
        assert_eq!(ErrorCode::FileTooLarge.as_str(), "FILE_TOO_LARGE");
        assert_eq!(
            serde_json::to_string(&ErrorCode::UnsupportedFormat).unwrap(),
            "\"UNSUPPORTED_FORMAT\""
        );
    }

    #[test]
    fn test_client_error_split() {
        assert!(ErrorCode::ValidationError.is_client_error());
        assert!(ErrorCode::NotFound.is_client_error());
        assert!(!ErrorCode::StorageError.is_client_error());
        assert!(!ErrorCode::DatabaseError.is_client_error());
    }
}
