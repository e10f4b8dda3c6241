use thiserror::Error;

/// Error taxonomy for the coordination store, claim scheduler, and control
/// API. Names map directly onto the distinguished failure modes the store
/// contract promises: callers match on variant, not on message text.
#[derive(Error, Debug)]
pub enum FarmError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("store contention: {0}")]
    Contention(String),

    #[error("converter failed: {0}")]
    ConverterFailed(String),

    #[error("converter timed out after {0:?}")]
    ConverterTimedOut(std::time::Duration),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("sql error: {0}")]
    Sql(#[from] SqlError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wraps the backend driver's error type so `farm-core` doesn't leak `sqlx`
/// into every caller's `use` list when the `sqlite` feature is disabled.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct SqlError(pub String);

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for FarmError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => FarmError::NotFound(e.to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                FarmError::Conflict(e.to_string())
            }
            _ => FarmError::Sql(SqlError(e.to_string())),
        }
    }
}

pub type FarmResult<T> = Result<T, FarmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message() {
        let err = FarmError::NotFound("job j1".to_string());
        assert_eq!(err.to_string(), "not found: job j1");
    }

    #[test]
    fn converter_timed_out_message_includes_duration() {
        let err = FarmError::ConverterTimedOut(std::time::Duration::from_secs(90));
        assert!(err.to_string().contains("90s"));
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let err: FarmError = io_err.into();
        assert!(matches!(err, FarmError::Io(_)));
    }
}
