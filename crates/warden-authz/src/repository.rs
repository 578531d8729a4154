//! Cache-aside authorization repository.
//!
//! Reads consult the cache first and populate it on a miss. Writes go to
//! storage, then invalidate the narrowest affected keys, then publish the
//! entity's queued domain events. Nothing here writes through the cache, and
//! no cache failure ever reaches the caller.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_core::access::{AccessDecision, AccessEvaluator};
use warden_core::cache::CacheStore;
use warden_core::error::WardenResult;
use warden_core::models::endpoint::PermissionEndpoint;
use warden_core::models::grant::{GrantWindow, PermissionGrant};
use warden_core::models::permission::Permission;
use warden_core::repository::{GrantRepository, PaginatedResult, PermissionRepository};
use warden_core::specification::{GrantSpec, PermissionSpec, valid_grants_for, valid_grants_of_user};

use crate::cache::{AuthzCache, keys};
use crate::config::AuthzConfig;
use crate::events::{DomainEventHandler, EventDispatcher};

pub struct AuthorizationRepository<P, G, C> {
    permissions: P,
    grants: G,
    cache: AuthzCache<C>,
    events: EventDispatcher,
    ttl: Duration,
}

impl<P, G, C> AuthorizationRepository<P, G, C>
where
    P: PermissionRepository,
    G: GrantRepository,
    C: CacheStore + 'static,
{
    pub fn new(permissions: P, grants: G, cache: Arc<C>, config: &AuthzConfig) -> Self {
        let cache = AuthzCache::new(cache);
        Self {
            events: EventDispatcher::with_cache_invalidation(cache.clone(), &config.policy_prefix),
            permissions,
            grants,
            cache,
            ttl: config.cache_ttl(),
        }
    }

    /// Add a handler that runs after the built-in invalidation handlers.
    pub fn register_handler(&mut self, handler: impl DomainEventHandler + 'static) {
        self.events.register(handler);
    }

    pub fn permission_store(&self) -> &P {
        &self.permissions
    }

    pub fn grant_store(&self) -> &G {
        &self.grants
    }

    pub fn cache(&self) -> &AuthzCache<C> {
        &self.cache
    }

    // -----------------------------------------------------------------------
    // Permissions
    // -----------------------------------------------------------------------

    pub async fn get_permission_by_id(&self, id: Uuid) -> WardenResult<Permission> {
        let key = keys::permission(id);
        if let Some(permission) = self.cache.get_json::<Permission>(&key).await {
            return Ok(permission);
        }
        let permission = self.permissions.get_by_id(id).await?;
        self.cache.put_json(&key, &permission, self.ttl).await;
        Ok(permission)
    }

    /// The permission with its endpoint mappings loaded. Always read from
    /// storage.
    pub async fn get_permission_with_endpoints(&self, id: Uuid) -> WardenResult<Permission> {
        let mut permission = self.permissions.get_by_id(id).await?;
        permission.endpoints = self.permissions.list_endpoints(id).await?;
        Ok(permission)
    }

    pub async fn get_permission_by_system_name(
        &self,
        system_name: &str,
    ) -> WardenResult<Option<Permission>> {
        self.permissions.find_by_system_name(system_name).await
    }

    pub async fn list_permissions(&self, include_inactive: bool) -> WardenResult<Vec<Permission>> {
        self.permissions.list(include_inactive).await
    }

    pub async fn permission_exists(
        &self,
        system_name: &str,
        exclude_id: Option<Uuid>,
    ) -> WardenResult<bool> {
        self.permissions
            .exists_by_system_name(system_name, exclude_id)
            .await
    }

    pub async fn query_permissions(
        &self,
        spec: &PermissionSpec,
    ) -> WardenResult<PaginatedResult<Permission>> {
        self.permissions.query(spec).await
    }

    pub async fn add_permission(&self, permission: &mut Permission) -> WardenResult<()> {
        self.permissions.insert(permission).await?;
        info!(
            permission_id = %permission.id,
            system_name = %permission.system_name,
            "Permission created"
        );
        self.events.publish_all(permission.take_events()).await;
        Ok(())
    }

    pub async fn update_permission(&self, permission: &mut Permission) -> WardenResult<()> {
        self.permissions.update(permission).await?;
        info!(
            permission_id = %permission.id,
            system_name = %permission.system_name,
            "Permission updated"
        );
        self.invalidate_by_permission(permission.id).await;
        self.events.publish_all(permission.take_events()).await;
        Ok(())
    }

    /// Soft delete. The permission's grants are left in place but stop
    /// counting because the permission is no longer active.
    pub async fn delete_permission(
        &self,
        permission: &mut Permission,
        actor: Option<&str>,
    ) -> WardenResult<()> {
        permission.mark_deleted(actor);
        self.permissions.update(permission).await?;
        info!(
            permission_id = %permission.id,
            system_name = %permission.system_name,
            "Permission deleted"
        );
        self.invalidate_by_permission(permission.id).await;
        self.events.publish_all(permission.take_events()).await;
        Ok(())
    }

    /// Persist an endpoint the aggregate has just recorded.
    pub async fn add_endpoint(
        &self,
        permission: &mut Permission,
        endpoint: &PermissionEndpoint,
    ) -> WardenResult<()> {
        self.permissions.insert_endpoint(endpoint).await?;
        self.events.publish_all(permission.take_events()).await;
        Ok(())
    }

    /// Delete an endpoint the aggregate has just released.
    pub async fn remove_endpoint(
        &self,
        permission: &mut Permission,
        endpoint: &PermissionEndpoint,
    ) -> WardenResult<()> {
        self.permissions.delete_endpoint(endpoint.id).await?;
        self.events.publish_all(permission.take_events()).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Grants
    // -----------------------------------------------------------------------

    pub async fn get_grant_by_id(&self, id: Uuid) -> WardenResult<PermissionGrant> {
        self.grants.get_by_id(id).await
    }

    pub async fn list_user_grants(
        &self,
        user_id: &str,
        include_inactive: bool,
    ) -> WardenResult<Vec<PermissionGrant>> {
        self.grants.list_by_user(user_id, include_inactive).await
    }

    pub async fn list_permission_grants(
        &self,
        permission_id: Uuid,
        include_inactive: bool,
    ) -> WardenResult<Vec<PermissionGrant>> {
        self.grants
            .list_by_permission(permission_id, include_inactive)
            .await
    }

    pub async fn query_grants(
        &self,
        spec: &GrantSpec,
    ) -> WardenResult<PaginatedResult<PermissionGrant>> {
        self.grants.query(spec).await
    }

    pub async fn add_grant(&self, grant: &mut PermissionGrant) -> WardenResult<()> {
        self.grants.insert(grant).await?;
        info!(
            grant_id = %grant.id,
            user_id = %grant.user_id,
            permission_id = %grant.permission_id,
            "Grant created"
        );
        self.events.publish_all(grant.take_events()).await;
        Ok(())
    }

    pub async fn update_grant(&self, grant: &mut PermissionGrant) -> WardenResult<()> {
        self.grants.update(grant).await?;
        info!(
            grant_id = %grant.id,
            user_id = %grant.user_id,
            is_active = grant.is_active,
            "Grant updated"
        );
        self.events.publish_all(grant.take_events()).await;
        Ok(())
    }

    /// Deactivate and soft-delete the row.
    pub async fn delete_grant(
        &self,
        grant: &mut PermissionGrant,
        actor: Option<&str>,
    ) -> WardenResult<()> {
        grant.mark_deleted(actor);
        self.grants.update(grant).await?;
        info!(grant_id = %grant.id, user_id = %grant.user_id, "Grant deleted");
        // A grant that was already inactive raises no event; its user may
        // still hold a stale cached answer from before the deactivation.
        self.invalidate_by_user(&grant.user_id).await;
        self.events.publish_all(grant.take_events()).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cached read-models
    // -----------------------------------------------------------------------

    pub async fn has_permission(&self, user_id: &str, system_name: &str) -> WardenResult<bool> {
        let key = keys::has_permission(user_id, system_name);
        if let Some(granted) = self.cache.get_json::<bool>(&key).await {
            return Ok(granted);
        }
        let now = Utc::now();
        let candidates = self.access_candidates(user_id, system_name).await?;
        let granted = decide_access(&candidates, now, user_id, system_name, None).granted;
        self.cache
            .put_json(&key, &granted, self.ttl_within_windows(&candidates, now))
            .await;
        Ok(granted)
    }

    /// System names of every permission the user currently holds, sorted.
    pub async fn get_user_permission_system_names(
        &self,
        user_id: &str,
    ) -> WardenResult<Vec<String>> {
        let key = keys::user_permissions(user_id);
        if let Some(names) = self.cache.get_json::<Vec<String>>(&key).await {
            return Ok(names);
        }

        let now = Utc::now();
        let grants = self.grants.query(&valid_grants_of_user(user_id)).await?.items;
        let ttl = self.ttl_within_windows(&grants, now);
        let names: Vec<String> = grants
            .into_iter()
            .filter(|g| g.is_valid_at(now))
            .filter_map(|g| g.permission_system_name)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        self.cache.put_json(&key, &names, ttl).await;
        Ok(names)
    }

    pub async fn get_permissions_for_endpoint(
        &self,
        controller: &str,
        action: &str,
        http_method: &str,
    ) -> WardenResult<Vec<Permission>> {
        let key = keys::endpoint(controller, action, http_method);
        if let Some(permissions) = self.cache.get_json::<Vec<Permission>>(&key).await {
            return Ok(permissions);
        }
        let permissions = self
            .permissions
            .find_for_endpoint(controller, action, http_method)
            .await?;
        self.cache.put_json(&key, &permissions, self.ttl).await;
        Ok(permissions)
    }

    /// Active grants of the user on the active permission with this name,
    /// whatever their validity window.
    async fn access_candidates(
        &self,
        user_id: &str,
        permission_system_name: &str,
    ) -> WardenResult<Vec<PermissionGrant>> {
        Ok(self
            .grants
            .query(&valid_grants_for(user_id, permission_system_name))
            .await?
            .items)
    }

    /// The configured TTL, shortened so an entry never outlives the next
    /// validity boundary of the grants it was computed from.
    fn ttl_within_windows(&self, grants: &[PermissionGrant], now: DateTime<Utc>) -> Duration {
        grants
            .iter()
            .filter_map(|g| g.next_boundary_after(now))
            .min()
            .and_then(|boundary| (boundary - now).to_std().ok())
            .map_or(self.ttl, |until| until.min(self.ttl))
    }

    // -----------------------------------------------------------------------
    // Invalidation primitives
    // -----------------------------------------------------------------------

    pub async fn invalidate_by_user(&self, user_id: &str) {
        self.cache.invalidate_user(user_id).await;
    }

    /// Drop the permission's own entry, the lookups of its mapped endpoints
    /// and every holder's per-user entries. Falls back to a broader sweep
    /// when the endpoints or holders cannot be listed.
    pub async fn invalidate_by_permission(&self, permission_id: Uuid) {
        self.cache.invalidate_permission_id(permission_id).await;

        match self.permissions.list_endpoints(permission_id).await {
            Ok(endpoints) => {
                for endpoint in &endpoints {
                    self.cache
                        .invalidate_endpoint(
                            &endpoint.controller,
                            &endpoint.action,
                            &endpoint.http_method,
                        )
                        .await;
                }
            }
            Err(e) => {
                warn!(
                    %permission_id,
                    error = %e,
                    "Could not list endpoints, sweeping endpoint lookups"
                );
                self.cache.invalidate_all_endpoints().await;
            }
        }

        let holders = match self.grants.list_by_permission(permission_id, true).await {
            Ok(grants) => grants,
            Err(e) => {
                warn!(%permission_id, error = %e, "Could not list grant holders, sweeping all");
                self.invalidate_all().await;
                return;
            }
        };
        let users: BTreeSet<String> = holders.into_iter().map(|g| g.user_id).collect();
        for user_id in &users {
            self.cache.invalidate_user(user_id).await;
        }
        debug!(%permission_id, users = users.len(), "Permission holders invalidated");
    }

    pub async fn invalidate_all(&self) {
        self.cache.invalidate_all_permission_caches().await;
    }
}

impl<P, G, C> AccessEvaluator for AuthorizationRepository<P, G, C>
where
    P: PermissionRepository,
    G: GrantRepository,
    C: CacheStore + 'static,
{
    async fn evaluate_access(
        &self,
        user_id: &str,
        permission_system_name: &str,
        context: Option<&serde_json::Value>,
    ) -> WardenResult<AccessDecision> {
        let candidates = self
            .access_candidates(user_id, permission_system_name)
            .await?;
        Ok(decide_access(
            &candidates,
            Utc::now(),
            user_id,
            permission_system_name,
            context,
        ))
    }
}

fn decide_access(
    candidates: &[PermissionGrant],
    now: DateTime<Utc>,
    user_id: &str,
    permission_system_name: &str,
    context: Option<&serde_json::Value>,
) -> AccessDecision {
    if candidates.is_empty() {
        return AccessDecision::denied(format!(
            "no active grant for '{permission_system_name}'"
        ));
    }

    let mut last_window = GrantWindow::Open;
    for grant in candidates {
        match grant.window_at(now) {
            GrantWindow::Open => {
                if let Some(restrictions) = grant.restrictions.as_deref() {
                    // Restrictions are recorded but not enforced yet.
                    debug!(
                        grant_id = %grant.id,
                        %user_id,
                        restrictions,
                        has_context = context.is_some(),
                        "Grant restrictions present, not evaluated"
                    );
                }
                return AccessDecision::granted();
            }
            GrantWindow::Malformed => {
                warn!(
                    grant_id = %grant.id,
                    valid_from = grant.valid_from.as_deref().unwrap_or(""),
                    valid_to = grant.valid_to.as_deref().unwrap_or(""),
                    "Unparsable grant validity bound"
                );
                last_window = GrantWindow::Malformed;
            }
            window => last_window = window,
        }
    }

    AccessDecision::denied(match last_window {
        GrantWindow::NotYetValid => "grant is not yet valid",
        GrantWindow::Expired => "grant has expired",
        _ => "grant has an invalid validity window",
    })
}
