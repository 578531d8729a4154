//! SurrealDB implementation of [`PermissionRepository`].

use chrono::{DateTime, Utc};
use serde_json::Value;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;
use warden_core::error::WardenResult;
use warden_core::models::endpoint::{PermissionEndpoint, normalize_method};
use warden_core::models::permission::Permission;
use warden_core::repository::{PaginatedResult, PermissionRepository};
use warden_core::specification::{
    PermissionCriterion, PermissionInclude, PermissionSortKey, PermissionSpec,
    permission_by_system_name,
};

use super::grant::GrantRow;
use crate::error::DbError;
use crate::query::compile_permission_spec;

#[derive(Debug, SurrealValue)]
struct PermissionRow {
    record_id: String,
    name: String,
    system_name: String,
    description: Option<String>,
    category: Option<String>,
    is_system_permission: bool,
    required_claims: Option<String>,
    is_active: bool,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    created_by: Option<String>,
    updated_at: Option<DateTime<Utc>>,
    updated_by: Option<String>,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<String>,
}

impl PermissionRow {
    fn try_into_permission(self) -> Result<Permission, DbError> {
        let id = Uuid::parse_str(&self.record_id)
            .map_err(|e| DbError::InvalidRow(format!("invalid permission UUID: {e}")))?;

        let mut permission = Permission::restore(id, self.name, self.system_name, self.created_at);
        permission.description = self.description;
        permission.category = self.category;
        permission.is_system_permission = self.is_system_permission;
        permission.required_claims = self.required_claims;
        permission.is_active = self.is_active;
        permission.is_deleted = self.is_deleted;
        permission.created_by = self.created_by;
        permission.updated_at = self.updated_at;
        permission.updated_by = self.updated_by;
        permission.deleted_at = self.deleted_at;
        permission.deleted_by = self.deleted_by;
        Ok(permission)
    }
}

#[derive(Debug, SurrealValue)]
struct EndpointRow {
    record_id: String,
    permission_id: String,
    controller: String,
    action: String,
    http_method: String,
    route: String,
    created_at: DateTime<Utc>,
}

impl EndpointRow {
    fn try_into_endpoint(self) -> Result<PermissionEndpoint, DbError> {
        let id = Uuid::parse_str(&self.record_id)
            .map_err(|e| DbError::InvalidRow(format!("invalid endpoint UUID: {e}")))?;
        let permission_id = Uuid::parse_str(&self.permission_id)
            .map_err(|e| DbError::InvalidRow(format!("invalid permission UUID: {e}")))?;
        Ok(PermissionEndpoint {
            id,
            permission_id,
            controller: self.controller,
            action: self.action,
            http_method: self.http_method,
            route: self.route,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

/// SurrealDB implementation of the permission repository.
#[derive(Clone)]
pub struct SurrealPermissionRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealPermissionRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn count(&self, spec: &PermissionSpec) -> WardenResult<u64> {
        let compiled = compile_permission_spec(spec)?;
        let counts: Vec<CountRow> = fetch_rows!(
            self.db,
            compiled.count("permission"),
            compiled.bindings.clone()
        )?;
        Ok(counts.first().map(|r| r.total).unwrap_or(0))
    }

    async fn attach_endpoints(&self, permissions: &mut [Permission]) -> WardenResult<()> {
        let ids: Vec<String> = permissions.iter().map(|p| p.id.to_string()).collect();
        let rows: Vec<EndpointRow> = fetch_rows!(
            self.db,
            "SELECT meta::id(id) AS record_id, * FROM permission_endpoint \
             WHERE permission_id IN $ids ORDER BY created_at ASC",
            [("ids", Value::from(ids))]
        )?;
        let endpoints = rows
            .into_iter()
            .map(EndpointRow::try_into_endpoint)
            .collect::<Result<Vec<_>, DbError>>()?;

        for permission in permissions.iter_mut() {
            permission.endpoints = endpoints
                .iter()
                .filter(|e| e.permission_id == permission.id)
                .cloned()
                .collect();
        }
        Ok(())
    }

    async fn attach_grants(&self, permissions: &mut [Permission]) -> WardenResult<()> {
        let ids: Vec<String> = permissions.iter().map(|p| p.id.to_string()).collect();
        let rows: Vec<GrantRow> = fetch_rows!(
            self.db,
            "SELECT meta::id(id) AS record_id, * FROM permission_grant \
             WHERE permission_id IN $ids AND is_deleted = false \
             ORDER BY created_at DESC",
            [("ids", Value::from(ids))]
        )?;
        let grants = rows
            .into_iter()
            .map(GrantRow::try_into_grant)
            .collect::<Result<Vec<_>, DbError>>()?;

        for permission in permissions.iter_mut() {
            permission.grants = grants
                .iter()
                .filter(|g| g.permission_id == permission.id)
                .cloned()
                .map(|mut g| {
                    g.permission_system_name = Some(permission.system_name.clone());
                    g
                })
                .collect();
        }
        Ok(())
    }
}

impl<C: Connection> PermissionRepository for SurrealPermissionRepository<C> {
    async fn insert(&self, permission: &Permission) -> WardenResult<()> {
        let id_str = permission.id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('permission', $id) SET \
                 name = $name, system_name = $system_name, \
                 description = $description, category = $category, \
                 is_system_permission = $is_system_permission, \
                 required_claims = $required_claims, \
                 is_active = $is_active, is_deleted = $is_deleted, \
                 created_at = $created_at, created_by = $created_by",
            )
            .bind(("id", id_str))
            .bind(("name", permission.name.clone()))
            .bind(("system_name", permission.system_name.clone()))
            .bind(("description", permission.description.clone()))
            .bind(("category", permission.category.clone()))
            .bind(("is_system_permission", permission.is_system_permission))
            .bind(("required_claims", permission.required_claims.clone()))
            .bind(("is_active", permission.is_active))
            .bind(("is_deleted", permission.is_deleted))
            .bind(("created_at", permission.created_at))
            .bind(("created_by", permission.created_by.clone()))
            .await
            .map_err(DbError::from)?;

        result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> WardenResult<Permission> {
        let id_str = id.to_string();

        let rows: Vec<PermissionRow> = fetch_rows!(
            self.db,
            "SELECT meta::id(id) AS record_id, * FROM type::record('permission', $id) \
             WHERE is_deleted = false",
            [("id", Value::from(id_str.clone()))]
        )?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "permission".into(),
            id: id_str,
        })?;

        row.try_into_permission().map_err(Into::into)
    }

    async fn find_by_system_name(&self, system_name: &str) -> WardenResult<Option<Permission>> {
        let result = self.query(&permission_by_system_name(system_name)).await?;
        Ok(result.items.into_iter().next())
    }

    async fn exists_by_system_name(
        &self,
        system_name: &str,
        exclude_id: Option<Uuid>,
    ) -> WardenResult<bool> {
        let mut spec = permission_by_system_name(system_name);
        if let Some(id) = exclude_id {
            spec = spec.filter(PermissionCriterion::IdNot(id));
        }
        Ok(self.count(&spec).await? > 0)
    }

    async fn update(&self, permission: &Permission) -> WardenResult<()> {
        let id_str = permission.id.to_string();

        let mut result = self
            .db
            .query(
                "UPDATE type::record('permission', $id) SET \
                 name = $name, system_name = $system_name, \
                 description = $description, category = $category, \
                 required_claims = $required_claims, \
                 is_active = $is_active, is_deleted = $is_deleted, \
                 updated_at = $updated_at, updated_by = $updated_by, \
                 deleted_at = $deleted_at, deleted_by = $deleted_by \
                 WHERE is_deleted = false",
            )
            .bind(("id", id_str.clone()))
            .bind(("name", permission.name.clone()))
            .bind(("system_name", permission.system_name.clone()))
            .bind(("description", permission.description.clone()))
            .bind(("category", permission.category.clone()))
            .bind(("required_claims", permission.required_claims.clone()))
            .bind(("is_active", permission.is_active))
            .bind(("is_deleted", permission.is_deleted))
            .bind(("updated_at", permission.updated_at))
            .bind(("updated_by", permission.updated_by.clone()))
            .bind(("deleted_at", permission.deleted_at))
            .bind(("deleted_by", permission.deleted_by.clone()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<surrealdb_types::Value> = result.take(0).map_err(DbError::from)?;
        if rows.is_empty() {
            return Err(DbError::NotFound {
                entity: "permission".into(),
                id: id_str,
            }
            .into());
        }
        Ok(())
    }

    async fn list(&self, include_inactive: bool) -> WardenResult<Vec<Permission>> {
        let spec = PermissionSpec::new()
            .filter_if(!include_inactive, PermissionCriterion::ActiveOnly)
            .order_by(PermissionSortKey::Name);
        Ok(self.query(&spec).await?.items)
    }

    async fn query(&self, spec: &PermissionSpec) -> WardenResult<PaginatedResult<Permission>> {
        let compiled = compile_permission_spec(spec)?;

        let rows: Vec<PermissionRow> = fetch_rows!(
            self.db,
            compiled.select("permission"),
            compiled.bindings.clone()
        )?;
        let mut items = rows
            .into_iter()
            .map(PermissionRow::try_into_permission)
            .collect::<Result<Vec<_>, DbError>>()?;

        let total = match compiled.limit {
            Some(_) => self.count(spec).await?,
            None => items.len() as u64,
        };

        if !items.is_empty() {
            if spec.has_include(&PermissionInclude::Endpoints) {
                self.attach_endpoints(&mut items).await?;
            }
            if spec.has_include(&PermissionInclude::Grants) {
                self.attach_grants(&mut items).await?;
            }
        }

        Ok(PaginatedResult {
            limit: compiled.limit.unwrap_or(total),
            offset: compiled.offset,
            total,
            items,
        })
    }

    async fn find_for_endpoint(
        &self,
        controller: &str,
        action: &str,
        http_method: &str,
    ) -> WardenResult<Vec<Permission>> {
        let rows: Vec<PermissionRow> = fetch_rows!(
            self.db,
            "SELECT meta::id(id) AS record_id, * FROM permission \
             WHERE is_active = true AND is_deleted = false \
             AND meta::id(id) IN (SELECT VALUE permission_id FROM permission_endpoint \
             WHERE controller = $controller AND action = $action \
             AND http_method = $method) \
             ORDER BY system_name ASC",
            [
                ("controller", Value::from(controller)),
                ("action", Value::from(action)),
                ("method", Value::from(normalize_method(http_method))),
            ]
        )?;

        rows.into_iter()
            .map(|r| r.try_into_permission().map_err(Into::into))
            .collect()
    }

    async fn insert_endpoint(&self, endpoint: &PermissionEndpoint) -> WardenResult<()> {
        // Fails with NotFound for unknown or deleted permissions.
        self.get_by_id(endpoint.permission_id).await?;

        let result = self
            .db
            .query(
                "CREATE type::record('permission_endpoint', $id) SET \
                 permission_id = $permission_id, controller = $controller, \
                 action = $action, http_method = $http_method, \
                 route = $route, created_at = $created_at",
            )
            .bind(("id", endpoint.id.to_string()))
            .bind(("permission_id", endpoint.permission_id.to_string()))
            .bind(("controller", endpoint.controller.clone()))
            .bind(("action", endpoint.action.clone()))
            .bind(("http_method", normalize_method(&endpoint.http_method)))
            .bind(("route", endpoint.route.clone()))
            .bind(("created_at", endpoint.created_at))
            .await
            .map_err(DbError::from)?;

        result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        Ok(())
    }

    async fn delete_endpoint(&self, id: Uuid) -> WardenResult<()> {
        let id_str = id.to_string();

        let rows: Vec<surrealdb_types::Value> = fetch_rows!(
            self.db,
            "DELETE type::record('permission_endpoint', $id) RETURN BEFORE",
            [("id", Value::from(id_str.clone()))]
        )?;

        if rows.is_empty() {
            return Err(DbError::NotFound {
                entity: "permission_endpoint".into(),
                id: id_str,
            }
            .into());
        }
        Ok(())
    }

    async fn list_endpoints(&self, permission_id: Uuid) -> WardenResult<Vec<PermissionEndpoint>> {
        let rows: Vec<EndpointRow> = fetch_rows!(
            self.db,
            "SELECT meta::id(id) AS record_id, * FROM permission_endpoint \
             WHERE permission_id = $permission_id ORDER BY created_at ASC",
            [("permission_id", Value::from(permission_id.to_string()))]
        )?;

        rows.into_iter()
            .map(|r| r.try_into_endpoint().map_err(Into::into))
            .collect()
    }
}
