//! SurrealDB repository implementations.

/// Run a SurrealQL statement with `(name, value)` bindings and take the
/// first statement's result. Errors convert through [`DbError`].
macro_rules! fetch_rows {
    ($db:expr, $sql:expr, $bindings:expr) => {{
        let mut query = $db.query($sql);
        for binding in $bindings {
            query = query.bind(binding);
        }
        let mut result = query
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;
        result.take(0).map_err(DbError::from)
    }};
}

mod grant;
mod permission;

pub use grant::SurrealGrantRepository;
pub use permission::SurrealPermissionRepository;
