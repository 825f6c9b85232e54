use telemon_common::retry::{is_transient_io, Transient};
use telemon_common::types::{MetricError, MetricKey};

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use telemon_common::types::{MetricKey, MetricKind};
/// use telemon_storage::StorageError;
///
/// let err = StorageError::NotFound(MetricKey::new(MetricKind::Gauge, "Alloc"));
/// assert_eq!(err.to_string(), "Storage: metric gauge/Alloc not found");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage: metric {0} not found")]
    NotFound(MetricKey),

    #[error("Storage: metric {0} already exists")]
    AlreadyExists(MetricKey),

    /// Rejected input; the stored value is unchanged.
    #[error("Storage: {0}")]
    Metric(#[from] MetricError),

    #[error("Storage: database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A dump line that cannot be turned back into a metric.
    #[error("Storage: malformed dump line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Storage: refusing to restore a dump into a non-empty store")]
    RestoreIntoNonEmpty,

    /// A row whose columns do not match its metric type.
    #[error("Storage: corrupt row for {0}")]
    CorruptRow(String),

    #[error("Storage: {0} is not supported by this backend")]
    Unsupported(&'static str),
}

impl Transient for StorageError {
    fn is_transient(&self) -> bool {
        match self {
            StorageError::Db(err) => {
                matches!(
                    err,
                    sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_)
                ) || is_transient_io(err)
            }
            StorageError::Io(err) => is_transient_io(err),
            _ => false,
        }
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
