//! Entity records and the session arena.

mod arena;
mod record;

pub use arena::EntityArena;
pub use record::{EntityRecord, EntityStatus};
