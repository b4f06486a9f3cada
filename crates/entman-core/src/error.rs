//! Error types for entman operations.
//!
//! Lifecycle and identity violations are raised immediately at the call
//! that violates the invariant. Storage failures are wrapped in
//! [`StorageError`] and abort the enclosing transaction when they occur
//! during a flush.

use crate::entity::{LifecycleEvent, ManagedState};
use crate::value::Value;
use std::fmt;

/// The primary error type for all entman operations.
#[derive(Debug)]
pub enum Error {
    /// An invalid lifecycle event for the instance's current state.
    IllegalStateTransition {
        /// The state the instance was in.
        from: ManagedState,
        /// The event that was attempted.
        event: LifecycleEvent,
    },
    /// A lazy association was accessed after its owning session closed.
    LazyInitialization {
        /// Name of the association field.
        association: &'static str,
        /// Why resolution failed.
        reason: &'static str,
    },
    /// Any operation (except repeated `close`) on a closed session.
    SessionClosed,
    /// `persist` was called for an identity already managed by the session.
    EntityAlreadyManaged {
        /// Table of the offending entity.
        table: &'static str,
        /// The duplicate key.
        key: Value,
    },
    /// A different instance is already registered for the same identity.
    DuplicateKey {
        /// Table of the offending entity.
        table: &'static str,
        /// The duplicate key.
        key: Value,
    },
    /// Key generation failed (sequence fetch or identity read-back).
    KeyGeneration {
        /// Table whose key could not be generated.
        table: &'static str,
        /// Engine-provided detail.
        message: String,
    },
    /// A failure reported by the storage engine.
    Storage(StorageError),
    /// Type conversion errors
    Type(TypeError),
    /// Custom error with message
    Custom(String),
}

/// A failure reported by the external storage engine.
#[derive(Debug, Clone)]
pub struct StorageError {
    /// Classification of the failure.
    pub kind: StorageErrorKind,
    /// Human-readable message.
    pub message: String,
    /// The statement that failed, when known.
    pub sql: Option<String>,
}

/// Classification of storage engine failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The statement could not be parsed or is not supported.
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table, column, or row not found
    NotFound,
    /// Transaction state error (commit without begin, etc.)
    Transaction,
    /// The engine does not support the requested operation
    Unsupported,
    /// Other engine error
    Other,
}

impl StorageError {
    /// Create a new storage error.
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            sql: None,
        }
    }

    /// Attach the failing SQL statement.
    #[must_use]
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Shorthand for a syntax/unsupported-statement error.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Syntax, message)
    }

    /// Shorthand for a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::NotFound, message)
    }

    /// Shorthand for a transaction state error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Transaction, message)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "storage error ({:?}): {}", self.kind, self.message)?;
        if let Some(sql) = &self.sql {
            write!(f, " [sql: {sql}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for StorageError {}

/// Type conversion error.
#[derive(Debug, Clone)]
pub struct TypeError {
    /// The Rust type that was requested.
    pub expected: &'static str,
    /// What was actually found.
    pub actual: String,
    /// The column involved, when known.
    pub column: Option<String>,
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot convert {} to {}", self.actual, self.expected)?;
        if let Some(column) = &self.column {
            write!(f, " (column '{column}')")?;
        }
        Ok(())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IllegalStateTransition { from, event } => {
                write!(f, "illegal lifecycle event {event} for {from} instance")
            }
            Error::LazyInitialization {
                association,
                reason,
            } => {
                write!(
                    f,
                    "could not initialize association '{association}': {reason}"
                )
            }
            Error::SessionClosed => write!(f, "session is closed"),
            Error::EntityAlreadyManaged { table, key } => {
                write!(f, "entity '{table}' with key {key} is already managed")
            }
            Error::DuplicateKey { table, key } => {
                write!(
                    f,
                    "a different instance of '{table}' with key {key} is already managed"
                )
            }
            Error::KeyGeneration { table, message } => {
                write!(f, "key generation failed for '{table}': {message}")
            }
            Error::Storage(e) => write!(f, "{e}"),
            Error::Type(e) => write!(f, "{e}"),
            Error::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::Storage(e)
    }
}

/// Result alias used throughout entman.
pub type Result<T> = std::result::Result<T, Error>;
