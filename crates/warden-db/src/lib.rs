//! Warden storage: SurrealDB connection management, schema migrations and
//! the repository implementations behind the `warden-core` traits.

mod connection;
mod error;
mod query;
mod repository;
mod schema;

pub use connection::{DbConfig, DbManager};
pub use error::DbError;
pub use repository::{SurrealGrantRepository, SurrealPermissionRepository};
pub use schema::{latest_version, run_migrations};
