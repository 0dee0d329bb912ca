//! # relmap store boundary
//!
//! The engine's only view of the relational store. This crate provides:
//! - Scalar values and ordered rows exchanged with the store
//! - The insert/update/select statement shapes the engine issues
//! - The [`StoreBackend`] trait implemented by drivers
//! - An in-memory relational backend for tests
//!
//! The engine owns all mapping logic; backends are dumb executors that
//! apply statements and report constraint violations or connectivity
//! failures through [`StoreError`].

mod backend;
mod error;
mod memory;
mod statement;
mod value;

pub use backend::StoreBackend;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use statement::{Insert, Predicate, Select, Statement, Update};
pub use value::{Row, SqlValue};
