//! SurrealDB implementation of [`GrantRepository`].

use chrono::{DateTime, Utc};
use serde_json::Value;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;
use warden_core::error::WardenResult;
use warden_core::models::grant::PermissionGrant;
use warden_core::repository::{GrantRepository, PaginatedResult};
use warden_core::specification::{GrantCriterion, GrantInclude, GrantSortKey, GrantSpec};

use crate::error::DbError;
use crate::query::compile_grant_spec;

#[derive(Debug, SurrealValue)]
pub(super) struct GrantRow {
    record_id: String,
    user_id: String,
    permission_id: String,
    restrictions: Option<String>,
    valid_from: Option<String>,
    valid_to: Option<String>,
    is_active: bool,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    created_by: Option<String>,
    updated_at: Option<DateTime<Utc>>,
    updated_by: Option<String>,
}

impl GrantRow {
    pub(super) fn try_into_grant(self) -> Result<PermissionGrant, DbError> {
        let id = Uuid::parse_str(&self.record_id)
            .map_err(|e| DbError::InvalidRow(format!("invalid grant UUID: {e}")))?;
        let permission_id = Uuid::parse_str(&self.permission_id)
            .map_err(|e| DbError::InvalidRow(format!("invalid permission UUID: {e}")))?;

        let mut grant = PermissionGrant::restore(id, self.user_id, permission_id, self.created_at);
        grant.restrictions = self.restrictions;
        grant.valid_from = self.valid_from;
        grant.valid_to = self.valid_to;
        grant.is_active = self.is_active;
        grant.is_deleted = self.is_deleted;
        grant.created_by = self.created_by;
        grant.updated_at = self.updated_at;
        grant.updated_by = self.updated_by;
        Ok(grant)
    }
}

#[derive(Debug, SurrealValue)]
struct PermissionNameRow {
    record_id: String,
    system_name: String,
}

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

/// SurrealDB implementation of the grant repository.
#[derive(Clone)]
pub struct SurrealGrantRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealGrantRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn attach_permission_names(&self, grants: &mut [PermissionGrant]) -> WardenResult<()> {
        if grants.is_empty() {
            return Ok(());
        }
        let mut ids: Vec<String> = grants.iter().map(|g| g.permission_id.to_string()).collect();
        ids.sort();
        ids.dedup();

        let rows: Vec<PermissionNameRow> = fetch_rows!(
            self.db,
            "SELECT meta::id(id) AS record_id, system_name FROM permission \
             WHERE meta::id(id) IN $ids",
            [("ids", Value::from(ids))]
        )?;

        for grant in grants.iter_mut() {
            let key = grant.permission_id.to_string();
            grant.permission_system_name = rows
                .iter()
                .find(|r| r.record_id == key)
                .map(|r| r.system_name.clone());
        }
        Ok(())
    }

    fn listing(include_inactive: bool) -> GrantSpec {
        GrantSpec::new()
            .filter_if(!include_inactive, GrantCriterion::ActiveOnly)
            .order_by_descending(GrantSortKey::CreatedAt)
    }
}

impl<C: Connection> GrantRepository for SurrealGrantRepository<C> {
    async fn insert(&self, grant: &PermissionGrant) -> WardenResult<()> {
        let id_str = grant.id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('permission_grant', $id) SET \
                 user_id = $user_id, permission_id = $permission_id, \
                 restrictions = $restrictions, \
                 valid_from = $valid_from, valid_to = $valid_to, \
                 is_active = $is_active, is_deleted = $is_deleted, \
                 created_at = $created_at, created_by = $created_by",
            )
            .bind(("id", id_str))
            .bind(("user_id", grant.user_id.clone()))
            .bind(("permission_id", grant.permission_id.to_string()))
            .bind(("restrictions", grant.restrictions.clone()))
            .bind(("valid_from", grant.valid_from.clone()))
            .bind(("valid_to", grant.valid_to.clone()))
            .bind(("is_active", grant.is_active))
            .bind(("is_deleted", grant.is_deleted))
            .bind(("created_at", grant.created_at))
            .bind(("created_by", grant.created_by.clone()))
            .await
            .map_err(DbError::from)?;

        result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> WardenResult<PermissionGrant> {
        let id_str = id.to_string();

        let rows: Vec<GrantRow> = fetch_rows!(
            self.db,
            "SELECT meta::id(id) AS record_id, * FROM type::record('permission_grant', $id) \
             WHERE is_deleted = false",
            [("id", Value::from(id_str.clone()))]
        )?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "permission_grant".into(),
            id: id_str,
        })?;

        row.try_into_grant().map_err(Into::into)
    }

    async fn update(&self, grant: &PermissionGrant) -> WardenResult<()> {
        let id_str = grant.id.to_string();

        let mut result = self
            .db
            .query(
                "UPDATE type::record('permission_grant', $id) SET \
                 restrictions = $restrictions, \
                 valid_from = $valid_from, valid_to = $valid_to, \
                 is_active = $is_active, is_deleted = $is_deleted, \
                 updated_at = $updated_at, updated_by = $updated_by \
                 WHERE is_deleted = false",
            )
            .bind(("id", id_str.clone()))
            .bind(("restrictions", grant.restrictions.clone()))
            .bind(("valid_from", grant.valid_from.clone()))
            .bind(("valid_to", grant.valid_to.clone()))
            .bind(("is_active", grant.is_active))
            .bind(("is_deleted", grant.is_deleted))
            .bind(("updated_at", grant.updated_at))
            .bind(("updated_by", grant.updated_by.clone()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<surrealdb_types::Value> = result.take(0).map_err(DbError::from)?;
        if rows.is_empty() {
            return Err(DbError::NotFound {
                entity: "permission_grant".into(),
                id: id_str,
            }
            .into());
        }
        Ok(())
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        include_inactive: bool,
    ) -> WardenResult<Vec<PermissionGrant>> {
        let spec = Self::listing(include_inactive).filter(GrantCriterion::User(user_id.into()));
        Ok(self.query(&spec).await?.items)
    }

    async fn list_by_permission(
        &self,
        permission_id: Uuid,
        include_inactive: bool,
    ) -> WardenResult<Vec<PermissionGrant>> {
        let spec =
            Self::listing(include_inactive).filter(GrantCriterion::Permission(permission_id));
        Ok(self.query(&spec).await?.items)
    }

    async fn query(&self, spec: &GrantSpec) -> WardenResult<PaginatedResult<PermissionGrant>> {
        let compiled = compile_grant_spec(spec)?;

        let rows: Vec<GrantRow> = fetch_rows!(
            self.db,
            compiled.select("permission_grant"),
            compiled.bindings.clone()
        )?;
        let mut items = rows
            .into_iter()
            .map(GrantRow::try_into_grant)
            .collect::<Result<Vec<_>, DbError>>()?;

        let total = match compiled.limit {
            Some(_) => {
                let counts: Vec<CountRow> = fetch_rows!(
                    self.db,
                    compiled.count("permission_grant"),
                    compiled.bindings.clone()
                )?;
                counts.first().map(|r| r.total).unwrap_or(0)
            }
            None => items.len() as u64,
        };

        if spec.has_include(&GrantInclude::Permission) {
            self.attach_permission_names(&mut items).await?;
        }

        Ok(PaginatedResult {
            limit: compiled.limit.unwrap_or(total),
            offset: compiled.offset,
            total,
            items,
        })
    }

    async fn exists(&self, spec: &GrantSpec) -> WardenResult<bool> {
        let compiled = compile_grant_spec(spec)?;
        let counts: Vec<CountRow> = fetch_rows!(
            self.db,
            compiled.count("permission_grant"),
            compiled.bindings.clone()
        )?;
        Ok(counts.first().is_some_and(|r| r.total > 0))
    }
}
