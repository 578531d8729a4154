//! Storage repository traits.
//!
//! These describe the backing store only; caching and event publication
//! live one layer up. Every read applies the non-deleted predicate unless a
//! specification explicitly opts out with `with_deleted()`.

use uuid::Uuid;

use crate::error::WardenResult;
use crate::models::{endpoint::PermissionEndpoint, grant::PermissionGrant, permission::Permission};
use crate::specification::{GrantSpec, PermissionSpec};

/// A paginated result set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    /// Number of matches ignoring the page window.
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

impl<T> PaginatedResult<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PaginatedResult<U> {
        PaginatedResult {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            offset: self.offset,
            limit: self.limit,
        }
    }
}

pub trait PermissionRepository: Send + Sync {
    fn insert(&self, permission: &Permission) -> impl Future<Output = WardenResult<()>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = WardenResult<Permission>> + Send;
    fn find_by_system_name(
        &self,
        system_name: &str,
    ) -> impl Future<Output = WardenResult<Option<Permission>>> + Send;
    /// Whether a non-deleted permission other than `exclude_id` uses the name.
    fn exists_by_system_name(
        &self,
        system_name: &str,
        exclude_id: Option<Uuid>,
    ) -> impl Future<Output = WardenResult<bool>> + Send;
    /// Persist every mutable field, including the soft-delete markers.
    fn update(&self, permission: &Permission) -> impl Future<Output = WardenResult<()>> + Send;
    fn list(
        &self,
        include_inactive: bool,
    ) -> impl Future<Output = WardenResult<Vec<Permission>>> + Send;
    fn query(
        &self,
        spec: &PermissionSpec,
    ) -> impl Future<Output = WardenResult<PaginatedResult<Permission>>> + Send;

    /// Active permissions mapped to the given operation.
    fn find_for_endpoint(
        &self,
        controller: &str,
        action: &str,
        http_method: &str,
    ) -> impl Future<Output = WardenResult<Vec<Permission>>> + Send;
    fn insert_endpoint(
        &self,
        endpoint: &PermissionEndpoint,
    ) -> impl Future<Output = WardenResult<()>> + Send;
    fn delete_endpoint(&self, id: Uuid) -> impl Future<Output = WardenResult<()>> + Send;
    fn list_endpoints(
        &self,
        permission_id: Uuid,
    ) -> impl Future<Output = WardenResult<Vec<PermissionEndpoint>>> + Send;
}

pub trait GrantRepository: Send + Sync {
    fn insert(&self, grant: &PermissionGrant) -> impl Future<Output = WardenResult<()>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = WardenResult<PermissionGrant>> + Send;
    fn update(&self, grant: &PermissionGrant) -> impl Future<Output = WardenResult<()>> + Send;
    fn list_by_user(
        &self,
        user_id: &str,
        include_inactive: bool,
    ) -> impl Future<Output = WardenResult<Vec<PermissionGrant>>> + Send;
    fn list_by_permission(
        &self,
        permission_id: Uuid,
        include_inactive: bool,
    ) -> impl Future<Output = WardenResult<Vec<PermissionGrant>>> + Send;
    fn query(
        &self,
        spec: &GrantSpec,
    ) -> impl Future<Output = WardenResult<PaginatedResult<PermissionGrant>>> + Send;
    /// Whether any grant matches, ignoring paging.
    fn exists(&self, spec: &GrantSpec) -> impl Future<Output = WardenResult<bool>> + Send;
}
