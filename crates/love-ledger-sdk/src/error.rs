use crate::status::ContractStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("contract not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("contract is {status}: cannot {operation}")]
    InvalidState {
        status: ContractStatus,
        operation: &'static str,
    },

    #[error("concurrent update on {0}, please retry")]
    Conflict(String),

    #[error("record store error: {0}")]
    Store(String),

    #[error("invalid record {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("chain error: {0}")]
    Chain(String),
}

impl Error {
    /// True for the conditions a caller is expected to handle (bad input,
    /// unknown id, wrong party, wrong state) as opposed to infrastructure
    /// failures.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::NotFound(_)
                | Error::Unauthorized(_)
                | Error::InvalidState { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by [`LedgerService`](crate::service::LedgerService) async operations.
#[derive(Debug)]
pub enum ServiceError {
    /// The store mutex was poisoned by a prior panic.
    MutexPoisoned,
    /// A `spawn_blocking` task failed to join.
    Task(String),
    /// A lifecycle or stats operation failed.
    Ledger(Error),
}

impl ServiceError {
    pub fn is_expected(&self) -> bool {
        matches!(self, ServiceError::Ledger(e) if e.is_expected())
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::MutexPoisoned => write!(f, "internal mutex poisoned by a prior panic"),
            ServiceError::Task(e) => write!(f, "task join error: {e}"),
            ServiceError::Ledger(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Ledger(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Error> for ServiceError {
    fn from(e: Error) -> Self {
        ServiceError::Ledger(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_conditions() {
        assert!(Error::Validation("x".into()).is_expected());
        assert!(Error::NotFound("c1".into()).is_expected());
        assert!(Error::Unauthorized("x".into()).is_expected());
        assert!(
            Error::InvalidState {
                status: ContractStatus::Verified,
                operation: "pair",
            }
            .is_expected()
        );

        assert!(!Error::Conflict("c1".into()).is_expected());
        assert!(!Error::Store("io".into()).is_expected());
        assert!(!Error::Chain("rpc".into()).is_expected());

        assert!(ServiceError::from(Error::NotFound("c1".into())).is_expected());
        assert!(!ServiceError::MutexPoisoned.is_expected());
        assert!(!ServiceError::Task("join".into()).is_expected());
    }
}
