//! Storage backend trait definition.

use crate::error::StoreResult;
use crate::statement::{Select, Statement};
use crate::value::Row;

/// A relational storage backend for relmap.
///
/// Backends are **dumb statement executors**. The engine derives every
/// insert, update, and select from its own metadata; backends apply
/// them and report failures. Backends do not understand entities,
/// relationships, or units of work.
///
/// # Invariants
///
/// - `begin`/`commit`/`rollback` demarcate one store-level transaction;
///   after a `rollback`, the store is in the state of the last `commit`
/// - `reserve_key` values are unique per table and never reused
/// - `select` returns matching rows in insertion order
/// - A write rejected with a constraint error leaves the row unchanged
///
/// # Implementors
///
/// - [`super::MemoryStore`] - in-memory backend for tests
pub trait StoreBackend: Send {
    /// Opens a store-level transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is already open or the store
    /// is unreachable.
    fn begin(&mut self) -> StoreResult<()>;

    /// Commits the open transaction, making its writes durable.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is open or the commit fails;
    /// a failed commit leaves the store unchanged.
    fn commit(&mut self) -> StoreResult<()>;

    /// Rolls back the open transaction, discarding its writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    fn rollback(&mut self) -> StoreResult<()>;

    /// Allocates the next value of `table`'s key sequence.
    ///
    /// Allocation is not transactional: keys handed out before a
    /// rollback stay consumed, which keeps them unique.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    fn reserve_key(&mut self, table: &str) -> StoreResult<i64>;

    /// Applies a write statement.
    ///
    /// # Errors
    ///
    /// Returns a constraint error for duplicate or missing keys, or an
    /// unavailability error for connectivity failures.
    fn execute(&mut self, statement: &Statement) -> StoreResult<()>;

    /// Runs a read query and returns matching rows in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    fn select(&mut self, select: &Select) -> StoreResult<Vec<Row>>;
}
