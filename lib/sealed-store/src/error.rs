use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// An insert, update or delete touched zero rows.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// The crypto provider rejected a call (usually: no provider configured).
    #[error("Crypto unavailable: {0}")]
    CryptoUnavailable(String),

    /// A batch statement failed and the transaction was rolled back.
    /// `source` is the statement's original error.
    #[error("Transaction failed at statement {index}: {source}")]
    TransactionFailed {
        index: usize,
        #[source]
        source: Box<StorageError>,
    },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Empty patch for table {0}")]
    EmptyPatch(String),
}
