use thiserror::Error;

/// Errors returned by store and collection operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller passed something the operation refuses before touching storage.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A `$`-key that neither the filter nor the update grammar knows about.
    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    /// An operator was given a value of the wrong JSON type.
    #[error("malformed expression: {0}")]
    MalformedExpression(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for failures raised while executing statements or decoding stored rows.
    ///
    /// Only these are subject to [`crate::base::ErrorPolicy::LogAndContinue`].
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Sqlite(_) | Error::Json(_))
    }

    pub fn sqlite_code(&self) -> Option<i32> {
        match self {
            Error::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => Some(e.extended_code),
            _ => None,
        }
    }
}
