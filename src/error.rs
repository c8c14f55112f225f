use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Ledger not configured: {0}")]
    NotConfigured(String),

    #[error("Ledger unreachable: {0}")]
    Connectivity(String),

    #[error("Ledger rejected the request: {0}")]
    Rejected(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    #[error("Transaction {tx_ref} was broadcast but not finalized in time")]
    Unconfirmed { tx_ref: String },

    #[error("OCR service error: {0}")]
    Ocr(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MediError {
    /// Stable machine-readable kind reported to API callers.
    pub fn kind(&self) -> &'static str {
        match self {
            MediError::InvalidInput(_) => "INVALID_INPUT",
            MediError::Unauthorized(_) => "UNAUTHORIZED",
            MediError::NotConfigured(_) => "NOT_CONFIGURED",
            MediError::Connectivity(_) => "CONNECTIVITY_ERROR",
            MediError::Rejected(_) => "REJECTED",
            MediError::NotFound(_) => "NOT_FOUND",
            MediError::InconsistentState(_) => "INCONSISTENT_STATE",
            MediError::Unconfirmed { .. } => "UNCONFIRMED",
            MediError::Ocr(_) => "OCR_ERROR",
            MediError::Database(_) => "DATABASE_ERROR",
            MediError::Io(_) => "IO_ERROR",
            MediError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Only transient ledger failures are safe to retry. A rejection is
    /// authoritative and an unconfirmed submission must be re-verified,
    /// never re-sent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MediError::Connectivity(_))
    }
}

pub type Result<T> = std::result::Result<T, MediError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connectivity_is_retryable() {
        assert!(MediError::Connectivity("timeout".into()).is_retryable());
        assert!(!MediError::Rejected("already registered".into()).is_retryable());
        assert!(!MediError::Unconfirmed {
            tx_ref: "0xabc".into()
        }
        .is_retryable());
        assert!(!MediError::NotConfigured("endpoint".into()).is_retryable());
    }

    #[test]
    fn test_kinds_are_distinct_for_ledger_failures() {
        assert_ne!(
            MediError::Connectivity(String::new()).kind(),
            MediError::NotFound(String::new()).kind()
        );
        assert_eq!(MediError::Rejected(String::new()).kind(), "REJECTED");
    }
}
