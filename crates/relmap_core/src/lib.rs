//! # relmap core
//!
//! Unit-of-work entity engine. This crate provides:
//! - Entity registry: static descriptors of types, keys, relationships
//! - Identity map: one in-memory instance per (type, key) per unit of work
//! - Relationship synchronizer: bidirectional association consistency
//! - Unit of work: transaction lifecycle with atomic, ordered flushing
//! - Query translation and execution with eager fetching
//! - [`Session`]: the facade application code talks to
//!
//! Entities live in a session-owned arena and are addressed by
//! [`EntityRef`] handles, so cyclic object graphs stay acyclic at the
//! ownership level while both sides of every association remain
//! navigable.

mod config;
mod entity;
mod error;
mod identity;
mod query;
mod registry;
mod relation;
mod session;
mod transaction;
mod types;

pub use config::SessionConfig;
pub use entity::{EntityRecord, EntityStatus};
pub use error::{CoreError, CoreResult};
pub use query::{Criteria, Expr, Operand, Params, Query};
pub use registry::{
    Cardinality, DiscriminatorSpec, EntityDescriptor, EntityRegistry, FetchMode, FieldDescriptor,
    FieldKind, KeyPolicy, KeySpec, LinkTable, RelationshipDescriptor, TypeTarget,
    VariantDescriptor,
};
pub use session::Session;
pub use transaction::TxnState;
pub use types::{EntityKey, EntityRef, TypeId};

// The session API speaks in store values; re-export them so callers
// need not depend on the store crate directly.
pub use relmap_store::{Row, SqlValue};
