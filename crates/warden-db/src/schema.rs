//! Schema definitions and migration runner for SurrealDB.
//!
//! Tables are SCHEMAFULL. UUIDs are stored as strings (record ids and
//! references alike). Permissions and grants are soft-deleted through
//! `is_deleted`; endpoint mappings are plain metadata and are removed.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::{debug, info};

use crate::error::DbError;

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "permission_tables",
        sql: SCHEMA_V1,
    },
    Migration {
        version: 2,
        name: "lookup_indexes",
        sql: SCHEMA_V2,
    },
];

// -----------------------------------------------------------------------
// v1: permissions, grants, endpoint mappings
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Permissions
-- =======================================================================
DEFINE TABLE permission SCHEMAFULL;
DEFINE FIELD name ON TABLE permission TYPE string;
DEFINE FIELD system_name ON TABLE permission TYPE string \
    ASSERT string::len($value) > 0;
DEFINE FIELD description ON TABLE permission TYPE option<string>;
DEFINE FIELD category ON TABLE permission TYPE option<string>;
DEFINE FIELD is_system_permission ON TABLE permission TYPE bool \
    DEFAULT false;
DEFINE FIELD required_claims ON TABLE permission TYPE option<string>;
DEFINE FIELD is_active ON TABLE permission TYPE bool DEFAULT true;
DEFINE FIELD is_deleted ON TABLE permission TYPE bool DEFAULT false;
DEFINE FIELD created_at ON TABLE permission TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD created_by ON TABLE permission TYPE option<string>;
DEFINE FIELD updated_at ON TABLE permission TYPE option<datetime>;
DEFINE FIELD updated_by ON TABLE permission TYPE option<string>;
DEFINE FIELD deleted_at ON TABLE permission TYPE option<datetime>;
DEFINE FIELD deleted_by ON TABLE permission TYPE option<string>;

-- =======================================================================
-- Grants: user -> permission, optionally restricted / time-bounded
-- =======================================================================
DEFINE TABLE permission_grant SCHEMAFULL;
DEFINE FIELD user_id ON TABLE permission_grant TYPE string;
DEFINE FIELD permission_id ON TABLE permission_grant TYPE string;
DEFINE FIELD restrictions ON TABLE permission_grant TYPE option<string>;
DEFINE FIELD valid_from ON TABLE permission_grant TYPE option<string>;
DEFINE FIELD valid_to ON TABLE permission_grant TYPE option<string>;
DEFINE FIELD is_active ON TABLE permission_grant TYPE bool DEFAULT true;
DEFINE FIELD is_deleted ON TABLE permission_grant TYPE bool \
    DEFAULT false;
DEFINE FIELD created_at ON TABLE permission_grant TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD created_by ON TABLE permission_grant TYPE option<string>;
DEFINE FIELD updated_at ON TABLE permission_grant TYPE option<datetime>;
DEFINE FIELD updated_by ON TABLE permission_grant TYPE option<string>;

-- =======================================================================
-- Endpoint mappings: operation -> required permission
-- =======================================================================
DEFINE TABLE permission_endpoint SCHEMAFULL;
DEFINE FIELD permission_id ON TABLE permission_endpoint TYPE string;
DEFINE FIELD controller ON TABLE permission_endpoint TYPE string;
DEFINE FIELD action ON TABLE permission_endpoint TYPE string;
DEFINE FIELD http_method ON TABLE permission_endpoint TYPE string;
DEFINE FIELD route ON TABLE permission_endpoint TYPE string;
DEFINE FIELD created_at ON TABLE permission_endpoint TYPE datetime \
    DEFAULT time::now();
";

// -----------------------------------------------------------------------
// v2: lookup indexes. System names are not UNIQUE at the storage level
// because soft-deleted permissions keep theirs.
// -----------------------------------------------------------------------

const SCHEMA_V2: &str = "\
DEFINE INDEX idx_permission_system_name ON TABLE permission \
    COLUMNS system_name;
DEFINE INDEX idx_grant_user_permission ON TABLE permission_grant \
    COLUMNS user_id, permission_id;
DEFINE INDEX idx_grant_permission ON TABLE permission_grant \
    COLUMNS permission_id;
DEFINE INDEX idx_endpoint_operation ON TABLE permission_endpoint \
    COLUMNS controller, action, http_method;
DEFINE INDEX idx_endpoint_permission ON TABLE permission_endpoint \
    COLUMNS permission_id;
";

/// Bring the Warden schema up to date and return how many migrations were
/// applied. Safe to call on every start-up: the `_migration` table records
/// each applied version, so a current schema applies nothing.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<usize, DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(format!("migration ledger unavailable: {e}")))?;

    let recorded = recorded_version(db).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > recorded).collect();
    if pending.is_empty() {
        debug!(version = recorded, "Warden schema is current");
        return Ok(0);
    }

    for migration in &pending {
        apply(db, migration).await?;
    }
    info!(
        from = recorded,
        to = latest_version(),
        applied = pending.len(),
        "Warden schema upgraded"
    );
    Ok(pending.len())
}

async fn recorded_version<C: Connection>(db: &Surreal<C>) -> Result<u32, DbError> {
    let mut result = db
        .query("SELECT version FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    Ok(records.first().map_or(0, |m| m.version))
}

/// Run one migration's DDL, then record it in the ledger.
async fn apply<C: Connection>(db: &Surreal<C>, migration: &Migration) -> Result<(), DbError> {
    debug!(
        version = migration.version,
        name = migration.name,
        "Applying schema migration"
    );
    db.query(migration.sql).await?.check().map_err(|e| {
        DbError::Migration(format!(
            "schema v{} ({}) rejected: {e}",
            migration.version, migration.name
        ))
    })?;

    db.query("CREATE _migration SET version = $version, name = $name")
        .bind(("version", migration.version))
        .bind(("name", migration.name))
        .await?
        .check()
        .map_err(|e| {
            DbError::Migration(format!(
                "schema v{} applied but not recorded: {e}",
                migration.version
            ))
        })?;
    Ok(())
}

/// Latest schema version known to this build.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(
                window[0].version < window[1].version,
                "Migrations must be in ascending version order"
            );
        }
        assert_eq!(latest_version(), 2);
    }

    #[test]
    fn soft_delete_columns_present() {
        for table in ["permission", "permission_grant"] {
            assert!(
                SCHEMA_V1.contains(&format!("DEFINE FIELD is_deleted ON TABLE {table}")),
                "{table} lacks is_deleted"
            );
        }
    }
}
