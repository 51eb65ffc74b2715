//! Persistence layer: libSQL-backed storage for pull requests and notification mappings.

pub mod legacy;
pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
