//! Persistence layer: libSQL-backed storage behind the `Database` trait.

mod libsql_backend;
mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
