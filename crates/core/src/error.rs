//! Boundary error types
//!
//! One error enum covers the whole layer. Each variant maps to a canonical
//! code string via [`Error::code`]; the codes are frozen and must not
//! change:
//!
//! | Code | Meaning |
//! |------|---------|
//! | TRANSACTION_LOCKED | another transaction holds the write lock on the key |
//! | TRANSACTION_CORRUPT | undo log and stored versions disagree |
//! | CHUNK_NOT_FOUND | a storage page vanished mid-iteration |
//! | DUPLICATE_KEY_1 | uniqueness violated |
//! | CONCURRENT_UPDATE_1 | upsert raced a concurrent writer |
//! | COLUMN_CONTAINS_NULL_VALUES_1 | not-null constraint violated |
//! | CONSTRAINT_NOT_FOUND_1 | named constraint does not exist |
//! | COLUMN_COUNT_DOES_NOT_MATCH | row arity differs from the column list |
//!
//! Contention (`TRANSACTION_LOCKED`) is recoverable by retrying;
//! `TRANSACTION_CORRUPT` is fatal to the transaction but not to the engine.

use thiserror::Error;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced at the transaction-layer boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A foreign uncommitted transaction holds the write lock on the key.
    /// Recoverable: retry or back off; this layer never waits internally.
    #[error("key is write-locked by another transaction")]
    TransactionLocked,

    /// The undo log and the stored versions disagree.
    #[error("transaction state is corrupt: {reason}")]
    TransactionCorrupt {
        /// What was observed to be inconsistent.
        reason: String,
    },

    /// A storage page disappeared mid-iteration. Absorbed by iterators,
    /// which reseek; never surfaced to the statement layer.
    #[error("storage chunk not found during iteration")]
    ChunkNotFound,

    /// A uniqueness constraint was violated.
    #[error("duplicate key in index {index}")]
    DuplicateKey {
        /// Name of the violated index.
        index: String,
    },

    /// An upsert lost a race against a concurrent writer.
    #[error("concurrent update in table {table}")]
    ConcurrentUpdate {
        /// Table the statement was writing.
        table: String,
    },

    /// A not-null column received a null value.
    #[error("column {column} contains null values")]
    ColumnContainsNull {
        /// Offending column name.
        column: String,
    },

    /// A named constraint does not exist.
    #[error("constraint {name} not found")]
    ConstraintNotFound {
        /// The missing constraint name.
        name: String,
    },

    /// A row's arity differs from the statement's column list.
    #[error("column count does not match")]
    ColumnCountMismatch,

    /// Write attempted on a closed transaction. Programmer error; raised
    /// immediately, no rollback is attempted.
    #[error("transaction is closed")]
    TransactionClosed,

    /// The caller lacks a required right.
    #[error("not enough rights, {required} required")]
    NotEnoughRights {
        /// The rights the statement needs.
        required: &'static str,
    },

    /// A statement failed to parse.
    #[error("syntax error: {reason}")]
    Syntax {
        /// What the parser rejected.
        reason: String,
    },
}

impl Error {
    /// The canonical code string for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::TransactionLocked => "TRANSACTION_LOCKED",
            Error::TransactionCorrupt { .. } => "TRANSACTION_CORRUPT",
            Error::ChunkNotFound => "CHUNK_NOT_FOUND",
            Error::DuplicateKey { .. } => "DUPLICATE_KEY_1",
            Error::ConcurrentUpdate { .. } => "CONCURRENT_UPDATE_1",
            Error::ColumnContainsNull { .. } => "COLUMN_CONTAINS_NULL_VALUES_1",
            Error::ConstraintNotFound { .. } => "CONSTRAINT_NOT_FOUND_1",
            Error::ColumnCountMismatch => "COLUMN_COUNT_DOES_NOT_MATCH",
            Error::TransactionClosed => "TRANSACTION_CLOSED",
            Error::NotEnoughRights { .. } => "NOT_ENOUGH_RIGHTS",
            Error::Syntax { .. } => "SYNTAX_ERROR",
        }
    }

    /// Build a corruption error.
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Error::TransactionCorrupt {
            reason: reason.into(),
        }
    }
}
