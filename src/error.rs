use sled::transaction::TransactionError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage medium failure: {0}")]
    Medium(#[from] sled::Error),
    #[error("malformed value stored under {key:?}: {source}")]
    Malformed {
        key: String,
        source: serde_json::Error,
    },
    #[error("could not encode value for {key:?}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
}

impl From<TransactionError<StoreError>> for StoreError {
    fn from(err: TransactionError<StoreError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => StoreError::Medium(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
