//! Backing store implementations.
//!
//! [`SqlStore`](sql::SqlStore) binds a record type to a database table through sea-orm. [`MemoryStore`] keeps rows
//! in process memory; it understands only conjunctions of equality conditions as predicates and serves tests and
//! tools that need no database.

pub mod memory;
pub mod sql;

pub use memory::MemoryStore;
pub use sql::SqlStore;
