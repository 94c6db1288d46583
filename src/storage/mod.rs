//! Persistent backends.

pub mod sqlite;

pub use sqlite::SqliteBackend;
