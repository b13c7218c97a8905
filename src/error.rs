// ============================================================================
// Engine Errors
// Error taxonomy shared by the book, the engine and the dispatch layer
// ============================================================================

use crate::domain::{OrderId, OrderStatus};
use thiserror::Error;

/// Errors surfaced by the matching core.
///
/// `InvalidOrder`, `DuplicateOrder`, `NotFound` and `NotCancelable` are client
/// errors and are never retried. `PersistenceFailure` comes from a
/// collaborator and is retried off the matching path.
/// `EngineInvariantViolation` is fatal for the instrument that raised it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid order: {reason}")]
    InvalidOrder { reason: String },

    #[error("duplicate order: {order_id}")]
    DuplicateOrder { order_id: OrderId },

    #[error("order not found: {order_id}")]
    NotFound { order_id: OrderId },

    #[error("order {order_id} cannot be cancelled in state {status}")]
    NotCancelable {
        order_id: OrderId,
        status: OrderStatus,
    },

    #[error("persistence failure during {operation}: {source}")]
    PersistenceFailure {
        operation: &'static str,
        source: StoreError,
    },

    #[error("engine invariant violated on {instrument}: {detail}")]
    EngineInvariantViolation { instrument: String, detail: String },

    #[error("instrument {instrument} is halted: {reason}")]
    InstrumentHalted { instrument: String, reason: String },

    #[error("instrument {instrument} is not accepting commands")]
    InstrumentUnavailable { instrument: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        EngineError::InvalidOrder {
            reason: reason.into(),
        }
    }

    pub fn invariant(instrument: impl Into<String>, detail: impl Into<String>) -> Self {
        EngineError::EngineInvariantViolation {
            instrument: instrument.into(),
            detail: detail.into(),
        }
    }

    /// True for errors that must stop the owning instrument.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::EngineInvariantViolation { .. })
    }
}

/// Errors returned by store and publish collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Temporary failure (timeout, connection reset); safe to retry.
    #[error("transient store error: {0}")]
    Transient(String),

    /// The store refused the write; retrying will not help.
    #[error("store rejected write: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidEnv { key: String, value: String },

    #[error("{0}")]
    Invalid(String),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let id = OrderId::new();
        let err = EngineError::NotCancelable {
            order_id: id,
            status: OrderStatus::Filled,
        };
        assert_eq!(
            err.to_string(),
            format!("order {} cannot be cancelled in state filled", id)
        );

        let err = EngineError::PersistenceFailure {
            operation: "trade append",
            source: StoreError::Transient("timeout".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "persistence failure during trade append: transient store error: timeout"
        );
    }

    #[test]
    fn test_only_invariant_violation_is_fatal() {
        assert!(EngineError::invariant("BTC-USD", "crossed book").is_fatal());
        assert!(!EngineError::invalid("zero quantity").is_fatal());
        assert!(!EngineError::NotFound {
            order_id: OrderId::new()
        }
        .is_fatal());
    }

    #[test]
    fn test_store_error_transience() {
        assert!(StoreError::Transient("reset".into()).is_transient());
        assert!(!StoreError::Rejected("schema".into()).is_transient());
    }
}
