//! Unified error type for the ledger core.
//!
//! Data-integrity errors (`InvalidAmount`, `LedgerState`, `InvalidTransaction`) are
//! returned before anything is written or abort the enclosing database transaction.
//! `ExternalPaymentFailure` is returned only after the failed attempt was persisted.

use crate::core::money::Money;
use thiserror::Error;

/// All errors produced by the ledger core.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or unsafe monetary input
    #[error("Invalid amount: {reason}")]
    InvalidAmount {
        /// Why the amount was rejected
        reason: String,
    },

    /// A required piece of state or configuration is missing (e.g. no active cycle)
    #[error("Insufficient configuration: {message}")]
    InsufficientConfiguration {
        /// Description of what is missing
        message: String,
    },

    /// The operation violates the ledger lifecycle (closed ledger, second active ledger)
    #[error("Ledger state error: {message}")]
    LedgerState {
        /// Description of the violated rule
        message: String,
    },

    /// The idempotency key was already used for a different payment request
    #[error("Idempotency key '{idempotency_key}' already used by payment {payment_id}")]
    DuplicatePaymentAttempt {
        /// The colliding key
        idempotency_key: String,
        /// The payment that owns the key
        payment_id: i64,
    },

    /// The payment processor declined or timed out
    #[error("Payment failed after {attempts} attempt(s): {reason}")]
    ExternalPaymentFailure {
        /// Processor-facing reason, safe to show to the user
        reason: String,
        /// Attempts made so far under this idempotency key
        attempts: i32,
    },

    /// A concurrent writer changed the row between read and write; retry the whole operation
    #[error("Concurrent update detected on {resource}")]
    ConcurrencyConflict {
        /// The contended resource
        resource: String,
    },

    /// The transaction request itself is malformed (no party, wrong direction)
    #[error("Invalid transaction: {message}")]
    InvalidTransaction {
        /// Description of the problem
        message: String,
    },

    /// Advancing would exceed the house's available allowance
    #[error("Advance of {requested} exceeds available allowance {available}")]
    AdvanceLimitExceeded {
        /// Allowance left for the house
        available: Money,
        /// Amount that was requested
        requested: Money,
    },

    /// A referenced row does not exist
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind (e.g. "charge")
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Settings file could not be read, parsed or validated
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },

    /// Database error from `SeaORM`
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// JSON (de)serialization of metadata columns failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Integer conversion error
    #[error("Integer conversion error: {0}")]
    IntConversion(#[from] std::num::TryFromIntError),
}

impl Error {
    /// Shorthand for [`Error::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the caller should retry the whole operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Returns true when the database rejected a write because of a unique index.
pub(crate) fn is_unique_violation(err: &sea_orm::DbErr) -> bool {
    matches!(
        err.sql_err(),
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
    )
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
