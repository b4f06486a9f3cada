//! Storage engine contract.

use crate::error::StorageError;
use crate::row::Row;
use crate::value::Value;

/// A synchronous, parameterized SQL execution contract.
///
/// The runtime core delegates every read and write to an implementation
/// of this trait. Transactions are scoped by the caller: the session
/// issues `begin`/`commit`/`rollback` around its unit of work and the
/// engine's own isolation governs cross-session consistency.
///
/// All operations block; there is no cancellation and no timeout
/// handling at this layer.
pub trait SqlExecutor: Send + Sync {
    /// Execute a statement (INSERT, UPDATE, DELETE, DDL) and return the
    /// number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, StorageError>;

    /// Execute a query and return all matching rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StorageError>;

    /// Begin a transaction.
    fn begin(&mut self) -> Result<(), StorageError>;

    /// Commit the current transaction.
    fn commit(&mut self) -> Result<(), StorageError>;

    /// Roll back the current transaction.
    fn rollback(&mut self) -> Result<(), StorageError>;

    /// The key assigned by the engine for the most recent identity-style
    /// insert on this connection.
    fn last_insert_id(&mut self) -> Result<i64, StorageError>;

    /// Fetch and advance the named monotonic counter.
    fn next_sequence_value(&mut self, sequence: &str) -> Result<i64, StorageError>;

    /// Whether the engine can assign keys at insert time. Drives the
    /// `Auto` key strategy: identity when supported, sequence otherwise.
    fn supports_identity_keys(&self) -> bool {
        true
    }
}
