//! Typed errors for the seams between the pipeline stages.
//!
//! Remote reads fail with [`GatewayError`], which the retry layer classifies as
//! transient or not. Everything a job can fail with is folded into
//! [`IndexerError`]; the binary wraps that in `anyhow` at the edge.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl GatewayError {
    /// Timeouts and RPC failures are worth another attempt; malformed data is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Timeout(_) | GatewayError::Rpc(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(0)
        } else {
            GatewayError::Rpc(err.to_string())
        }
    }
}

impl From<ethers::providers::ProviderError> for GatewayError {
    fn from(err: ethers::providers::ProviderError) -> Self {
        let message = err.to_string();
        if message.contains("execution reverted") {
            GatewayError::NotFound(message)
        } else {
            GatewayError::Rpc(message)
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("persistence conflict: {0}")]
    Conflict(String),

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
        timed_out: bool,
    },

    #[error("invalid block range [{start}, {end}]")]
    InvalidRange { start: i64, end: i64 },
}

impl From<diesel::result::Error> for IndexerError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match err {
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                IndexerError::Conflict(info.message().to_string())
            }
            other => IndexerError::Persistence(other.to_string()),
        }
    }
}

impl IndexerError {
    pub fn is_retryable(&self) -> bool {
        match self {
            IndexerError::Gateway(e) => e.is_retryable(),
            IndexerError::Persistence(_) => true,
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            IndexerError::Gateway(GatewayError::Timeout(_))
                | IndexerError::RetriesExhausted { timed_out: true, .. }
        )
    }
}

pub type IndexerResult<T> = Result<T, IndexerError>;
