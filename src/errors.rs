use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("STORE_UNAVAILABLE: {0}")]
    StoreUnavailable(String),
    #[error("STALE_RECORD: {0}")]
    StaleRecord(String),
    #[error("EMPTY_NAME: profile name cannot be empty")]
    EmptyName,
    #[error("MISSING_SCOPE: {0}")]
    MissingScope(String),
    #[error("MISSING_IDENTITY: {0}")]
    MissingIdentity(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("DUPLICATE_NAME: {0}")]
    DuplicateName(String),
    #[error("LAST_PROFILE: {0}")]
    LastProfile(String),
    #[error("INVALID_RECORD: {0}")]
    InvalidRecord(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::StaleRecord(_) => "STALE_RECORD",
            Self::EmptyName => "EMPTY_NAME",
            Self::MissingScope(_) => "MISSING_SCOPE",
            Self::MissingIdentity(_) => "MISSING_IDENTITY",
            Self::NotFound(_) => "NOT_FOUND",
            Self::DuplicateName(_) => "DUPLICATE_NAME",
            Self::LastProfile(_) => "LAST_PROFILE",
            Self::InvalidRecord(_) => "INVALID_RECORD",
            Self::Io(_) => "IO_FAILURE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn poisoned() -> Self {
        Self::StoreUnavailable("database mutex poisoned".to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &value {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::CannotOpen
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::ReadOnly
                | ErrorCode::DiskFull => Self::StoreUnavailable(value.to_string()),
                ErrorCode::ConstraintViolation
                    if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    Self::DuplicateName(value.to_string())
                }
                _ => Self::Internal(value.to_string()),
            },
            _ => Self::Internal(value.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidRecord(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn display_carries_stable_code_prefix() {
        let error = AppError::StaleRecord("mod_orders row 4".to_string());
        assert_eq!(error.code(), "STALE_RECORD");
        assert!(error.to_string().starts_with("STALE_RECORD: "));
        assert_eq!(AppError::EmptyName.code(), "EMPTY_NAME");
    }

    #[test]
    fn busy_database_maps_to_store_unavailable() {
        let error = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        assert_eq!(AppError::from(error).code(), "STORE_UNAVAILABLE");
    }

    #[test]
    fn malformed_json_maps_to_invalid_record() {
        let error = serde_json::from_str::<Vec<u32>>("{not json").expect_err("parse error");
        assert_eq!(AppError::from(error).code(), "INVALID_RECORD");
    }
}
