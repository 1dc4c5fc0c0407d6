use thiserror::Error;

/// Why a ciphertext could not be turned into bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeFailure {
    #[error("hex input has odd length {0}")]
    OddLength(usize),
    #[error("invalid hex digit at offset {0}")]
    InvalidDigit(usize),
    #[error("cipher key is empty")]
    EmptyKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("malformed episode entry at index {index}: {reason}")]
    MalformedInput { index: usize, reason: String },
}

/// Errors reported by the local state store.
///
/// Every mutation resolves to success or one of these kinds; callers match on
/// the variant to pick the user-facing message.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bookmark limit of {capacity} reached")]
    CapacityExceeded { capacity: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] StorageFault),
}

#[derive(Debug, Error)]
pub enum StorageFault {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::StorageUnavailable(err.into())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageUnavailable(err.into())
    }
}
