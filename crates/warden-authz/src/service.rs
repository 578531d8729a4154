//! Authorization service: rule-guarded permission and grant management plus
//! the access queries the rest of the backend calls.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use warden_core::access::AccessEvaluator;
use warden_core::cache::CacheStore;
use warden_core::error::{WardenError, WardenResult};
use warden_core::models::endpoint::{CreateEndpoint, PermissionEndpoint};
use warden_core::models::grant::{CreateGrant, PermissionGrant, UpdateGrant};
use warden_core::models::permission::{CreatePermission, Permission, UpdatePermission};
use warden_core::repository::{GrantRepository, PaginatedResult, PermissionRepository};
use warden_core::rules::{
    GrantDatesMustBeValid, NoDuplicateActiveGrant, PermissionMustBeActive, PermissionOperation,
    RequiredClaimsPresent, RestrictionsMustBeWellFormed, SystemNameMustBeUnique,
    SystemPermissionIsImmutable, check_rule, validate_with,
};
use warden_core::specification::{Page, PermissionInclude, search_grants, search_permissions};

use crate::config::AuthzConfig;
use crate::context::OperationContext;
use crate::repository::AuthorizationRepository;

/// Filters for [`AuthorizationService::search_permissions`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionQuery {
    /// Case-insensitive match on name, system name or description.
    pub term: Option<String>,
    pub category: Option<String>,
    pub include_inactive: bool,
    /// Load endpoint mappings into each result.
    pub include_endpoints: bool,
    /// 1-based.
    pub page: u64,
    pub page_size: u64,
}

/// Filters for [`AuthorizationService::search_grants`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrantQuery {
    pub user_id: Option<String>,
    pub permission_id: Option<Uuid>,
    pub include_inactive: bool,
    /// 1-based.
    pub page: u64,
    pub page_size: u64,
}

fn require_non_blank(value: &str, field: &str) -> WardenResult<()> {
    if value.trim().is_empty() {
        return Err(WardenError::Validation {
            message: format!("{field} must not be empty"),
        });
    }
    Ok(())
}

/// Authorization service.
///
/// Generic over the storage and cache implementations so that this crate
/// has no dependency on the database crate. Every operation takes the
/// caller's [`OperationContext`].
pub struct AuthorizationService<P, G, C> {
    repo: Arc<AuthorizationRepository<P, G, C>>,
    config: AuthzConfig,
}

impl<P, G, C> AuthorizationService<P, G, C>
where
    P: PermissionRepository,
    G: GrantRepository,
    C: CacheStore + 'static,
{
    pub fn new(repo: Arc<AuthorizationRepository<P, G, C>>, config: AuthzConfig) -> Self {
        Self { repo, config }
    }

    pub fn repository(&self) -> &Arc<AuthorizationRepository<P, G, C>> {
        &self.repo
    }

    // -----------------------------------------------------------------------
    // Permissions
    // -----------------------------------------------------------------------

    pub async fn create_permission(
        &self,
        ctx: &OperationContext,
        input: CreatePermission,
    ) -> WardenResult<Permission> {
        require_non_blank(&input.name, "name")?;
        require_non_blank(&input.system_name, "system_name")?;

        ctx.cancellable(check_rule(SystemNameMustBeUnique {
            permissions: self.repo.permission_store(),
            system_name: &input.system_name,
            exclude_id: None,
        }))
        .await?;

        let mut permission = Permission::create(input, ctx.actor());
        ctx.ensure_not_cancelled()?;
        self.repo.add_permission(&mut permission).await?;
        Ok(permission)
    }

    pub async fn update_permission(
        &self,
        ctx: &OperationContext,
        id: Uuid,
        input: UpdatePermission,
    ) -> WardenResult<Permission> {
        let mut permission = ctx
            .cancellable(self.repo.permission_store().get_by_id(id))
            .await?;

        if let Some(name) = &input.name {
            require_non_blank(name, "name")?;
        }
        if let Some(system_name) = &input.system_name {
            require_non_blank(system_name, "system_name")?;
        }

        if input.edits_protected_fields(&permission) {
            let only_claims = input.name.is_none()
                && input.system_name.is_none()
                && input.description.is_none()
                && input.category.is_none();
            let operation = if only_claims {
                PermissionOperation::ChangeClaims
            } else {
                PermissionOperation::Edit
            };
            ctx.cancellable(check_rule(SystemPermissionIsImmutable {
                permission: &permission,
                operation,
            }))
            .await?;
        }

        let previous_system_name = permission.system_name.clone();
        if let Some(system_name) = input
            .system_name
            .as_deref()
            .filter(|s| s.trim() != previous_system_name)
        {
            ctx.cancellable(check_rule(SystemNameMustBeUnique {
                permissions: self.repo.permission_store(),
                system_name,
                exclude_id: Some(id),
            }))
            .await?;
        }

        let actor = ctx.actor();
        permission.update_details(
            input.name,
            input.system_name,
            input.description,
            input.category,
            actor,
        );
        if let Some(claims) = input.required_claims {
            permission.set_required_claims(claims, actor);
        }
        if let Some(active) = input.is_active {
            permission.set_active(active, actor);
        }

        if permission.pending_events().is_empty() {
            return Ok(permission);
        }

        ctx.ensure_not_cancelled()?;
        self.repo.update_permission(&mut permission).await?;
        if permission.system_name != previous_system_name {
            self.repo
                .cache()
                .invalidate_policy(&format!(
                    "{}{previous_system_name}",
                    self.config.policy_prefix
                ))
                .await;
        }
        Ok(permission)
    }

    pub async fn delete_permission(&self, ctx: &OperationContext, id: Uuid) -> WardenResult<()> {
        let mut permission = ctx
            .cancellable(self.repo.permission_store().get_by_id(id))
            .await?;
        ctx.cancellable(check_rule(SystemPermissionIsImmutable {
            permission: &permission,
            operation: PermissionOperation::Delete,
        }))
        .await?;

        ctx.ensure_not_cancelled()?;
        self.repo
            .delete_permission(&mut permission, ctx.actor())
            .await
    }

    pub async fn get_permission(&self, ctx: &OperationContext, id: Uuid) -> WardenResult<Permission> {
        ctx.cancellable(self.repo.get_permission_by_id(id)).await
    }

    pub async fn get_permission_with_endpoints(
        &self,
        ctx: &OperationContext,
        id: Uuid,
    ) -> WardenResult<Permission> {
        ctx.cancellable(self.repo.get_permission_with_endpoints(id)).await
    }

    pub async fn get_permission_by_system_name(
        &self,
        ctx: &OperationContext,
        system_name: &str,
    ) -> WardenResult<Option<Permission>> {
        ctx.cancellable(self.repo.get_permission_by_system_name(system_name)).await
    }

    pub async fn list_permissions(
        &self,
        ctx: &OperationContext,
        include_inactive: bool,
    ) -> WardenResult<Vec<Permission>> {
        ctx.cancellable(self.repo.list_permissions(include_inactive)).await
    }

    pub async fn search_permissions(
        &self,
        ctx: &OperationContext,
        query: PermissionQuery,
    ) -> WardenResult<PaginatedResult<Permission>> {
        let page = Page::number(query.page.max(1), self.config.clamp_page_size(query.page_size));
        let mut spec = search_permissions(
            query.term.as_deref(),
            query.include_inactive,
            query.category.as_deref(),
            page,
        );
        if query.include_endpoints {
            spec = spec.include(PermissionInclude::Endpoints);
        }
        ctx.cancellable(self.repo.query_permissions(&spec)).await
    }

    pub async fn add_endpoint(
        &self,
        ctx: &OperationContext,
        permission_id: Uuid,
        input: CreateEndpoint,
    ) -> WardenResult<PermissionEndpoint> {
        require_non_blank(&input.controller, "controller")?;
        require_non_blank(&input.action, "action")?;
        require_non_blank(&input.http_method, "http_method")?;

        let mut permission = ctx
            .cancellable(self.repo.permission_store().get_by_id(permission_id))
            .await?;
        let endpoint = permission.add_endpoint(input);

        ctx.ensure_not_cancelled()?;
        self.repo.add_endpoint(&mut permission, &endpoint).await?;
        info!(
            %permission_id,
            controller = %endpoint.controller,
            action = %endpoint.action,
            http_method = %endpoint.http_method,
            "Endpoint mapped"
        );
        Ok(endpoint)
    }

    pub async fn remove_endpoint(
        &self,
        ctx: &OperationContext,
        permission_id: Uuid,
        endpoint_id: Uuid,
    ) -> WardenResult<()> {
        let mut permission = ctx
            .cancellable(self.repo.get_permission_with_endpoints(permission_id))
            .await?;
        let endpoint = permission
            .remove_endpoint(endpoint_id)
            .ok_or_else(|| WardenError::not_found("permission_endpoint", endpoint_id))?;

        ctx.ensure_not_cancelled()?;
        self.repo.remove_endpoint(&mut permission, &endpoint).await
    }

    /// Idempotent seeding of a built-in permission. Returns the existing
    /// permission untouched if the system name is already taken.
    pub async fn ensure_system_permission(
        &self,
        ctx: &OperationContext,
        mut input: CreatePermission,
    ) -> WardenResult<Permission> {
        if let Some(existing) = self
            .get_permission_by_system_name(ctx, &input.system_name)
            .await?
        {
            return Ok(existing);
        }
        input.is_system_permission = true;
        self.create_permission(ctx, input).await
    }

    // -----------------------------------------------------------------------
    // Grants
    // -----------------------------------------------------------------------

    /// Rules run in order and stop at the first failure: restrictions
    /// format, permission active, date validity, duplicate grant, required
    /// claims.
    pub async fn grant_permission(
        &self,
        ctx: &OperationContext,
        input: CreateGrant,
    ) -> WardenResult<PermissionGrant> {
        require_non_blank(&input.user_id, "user_id")?;

        let permission = ctx
            .cancellable(self.repo.permission_store().get_by_id(input.permission_id))
            .await?;

        validate_with(RestrictionsMustBeWellFormed {
            restrictions: input.restrictions.as_deref(),
        })
        .await?;

        ctx.cancellable(async {
            check_rule(PermissionMustBeActive {
                permission: &permission,
            })
            .await?;
            check_rule(GrantDatesMustBeValid {
                valid_from: input.valid_from.as_deref(),
                valid_to: input.valid_to.as_deref(),
                now: Utc::now(),
            })
            .await?;
            check_rule(NoDuplicateActiveGrant {
                grants: self.repo.grant_store(),
                user_id: &input.user_id,
                permission_id: permission.id,
                exclude_grant_id: None,
            })
            .await?;
            check_rule(RequiredClaimsPresent {
                evaluator: self.repo.as_ref(),
                user_id: &input.user_id,
                required_claims: permission.required_claims.as_deref(),
            })
            .await
        })
        .await?;

        let mut grant = PermissionGrant::create(input, ctx.actor());
        ctx.ensure_not_cancelled()?;
        self.repo.add_grant(&mut grant).await?;
        grant.permission_system_name = Some(permission.system_name);
        Ok(grant)
    }

    pub async fn update_grant(
        &self,
        ctx: &OperationContext,
        grant_id: Uuid,
        input: UpdateGrant,
    ) -> WardenResult<PermissionGrant> {
        let mut grant = ctx.cancellable(self.repo.get_grant_by_id(grant_id)).await?;

        if let Some(restrictions) = &input.restrictions {
            validate_with(RestrictionsMustBeWellFormed {
                restrictions: restrictions.as_deref(),
            })
            .await?;
        }

        let dates_changed = input.valid_from.is_some() || input.valid_to.is_some();
        let valid_from = match &input.valid_from {
            Some(v) => v.clone(),
            None => grant.valid_from.clone(),
        };
        let valid_to = match &input.valid_to {
            Some(v) => v.clone(),
            None => grant.valid_to.clone(),
        };

        ctx.cancellable(async {
            if dates_changed {
                check_rule(GrantDatesMustBeValid {
                    valid_from: valid_from.as_deref(),
                    valid_to: valid_to.as_deref(),
                    now: Utc::now(),
                })
                .await?;
            }
            if grant.is_active {
                check_rule(NoDuplicateActiveGrant {
                    grants: self.repo.grant_store(),
                    user_id: &grant.user_id,
                    permission_id: grant.permission_id,
                    exclude_grant_id: Some(grant.id),
                })
                .await?;
            }
            Ok::<(), WardenError>(())
        })
        .await?;

        grant.update(input, ctx.actor());
        if grant.pending_events().is_empty() {
            return Ok(grant);
        }

        ctx.ensure_not_cancelled()?;
        self.repo.update_grant(&mut grant).await?;
        Ok(grant)
    }

    /// Deactivate a grant. Revoking an inactive grant is a no-op.
    pub async fn revoke_grant(
        &self,
        ctx: &OperationContext,
        grant_id: Uuid,
    ) -> WardenResult<PermissionGrant> {
        let mut grant = ctx.cancellable(self.repo.get_grant_by_id(grant_id)).await?;
        ctx.ensure_not_cancelled()?;
        if grant.deactivate(ctx.actor()) {
            self.repo.update_grant(&mut grant).await?;
        }
        Ok(grant)
    }

    pub async fn delete_grant(&self, ctx: &OperationContext, grant_id: Uuid) -> WardenResult<()> {
        let mut grant = ctx.cancellable(self.repo.get_grant_by_id(grant_id)).await?;
        ctx.ensure_not_cancelled()?;
        self.repo.delete_grant(&mut grant, ctx.actor()).await
    }

    pub async fn get_grant(
        &self,
        ctx: &OperationContext,
        grant_id: Uuid,
    ) -> WardenResult<PermissionGrant> {
        ctx.cancellable(self.repo.get_grant_by_id(grant_id)).await
    }

    pub async fn list_user_grants(
        &self,
        ctx: &OperationContext,
        user_id: &str,
        include_inactive: bool,
    ) -> WardenResult<Vec<PermissionGrant>> {
        ctx.cancellable(self.repo.list_user_grants(user_id, include_inactive)).await
    }

    pub async fn list_permission_grants(
        &self,
        ctx: &OperationContext,
        permission_id: Uuid,
        include_inactive: bool,
    ) -> WardenResult<Vec<PermissionGrant>> {
        ctx.cancellable(
            self.repo
                .list_permission_grants(permission_id, include_inactive),
        )
        .await
    }

    pub async fn search_grants(
        &self,
        ctx: &OperationContext,
        query: GrantQuery,
    ) -> WardenResult<PaginatedResult<PermissionGrant>> {
        let page = Page::number(query.page.max(1), self.config.clamp_page_size(query.page_size));
        let spec = search_grants(
            query.user_id.as_deref(),
            query.permission_id,
            query.include_inactive,
            page,
        );
        ctx.cancellable(self.repo.query_grants(&spec)).await
    }

    // -----------------------------------------------------------------------
    // Access queries
    // -----------------------------------------------------------------------

    pub async fn validate_access(
        &self,
        ctx: &OperationContext,
        user_id: &str,
        permission_system_name: &str,
        context: Option<&serde_json::Value>,
    ) -> WardenResult<bool> {
        let decision = ctx
            .cancellable(
                self.repo
                    .evaluate_access(user_id, permission_system_name, context),
            )
            .await?;
        Ok(decision.granted)
    }

    /// Like [`validate_access`](Self::validate_access) but a denial is a
    /// [`WardenError::Forbidden`].
    pub async fn require_access(
        &self,
        ctx: &OperationContext,
        user_id: &str,
        permission_system_name: &str,
        context: Option<&serde_json::Value>,
    ) -> WardenResult<()> {
        let decision = ctx
            .cancellable(
                self.repo
                    .evaluate_access(user_id, permission_system_name, context),
            )
            .await?;
        if decision.granted {
            return Ok(());
        }
        Err(WardenError::Forbidden {
            reason: format!(
                "user '{user_id}' lacks '{permission_system_name}': {}",
                decision.reason.unwrap_or_default()
            ),
        })
    }

    pub async fn has_permission(
        &self,
        ctx: &OperationContext,
        user_id: &str,
        permission_system_name: &str,
    ) -> WardenResult<bool> {
        ctx.cancellable(self.repo.has_permission(user_id, permission_system_name)).await
    }

    pub async fn get_user_permissions(
        &self,
        ctx: &OperationContext,
        user_id: &str,
    ) -> WardenResult<Vec<String>> {
        ctx.cancellable(self.repo.get_user_permission_system_names(user_id)).await
    }

    /// Probe the permission `"{resource}.{operation}"`.
    pub async fn check_resource_access(
        &self,
        ctx: &OperationContext,
        user_id: &str,
        resource: &str,
        operation: &str,
    ) -> WardenResult<bool> {
        self.validate_access(ctx, user_id, &format!("{resource}.{operation}"), None)
            .await
    }

    pub async fn get_permissions_for_endpoint(
        &self,
        ctx: &OperationContext,
        controller: &str,
        action: &str,
        http_method: &str,
    ) -> WardenResult<Vec<Permission>> {
        ctx.cancellable(
            self.repo
                .get_permissions_for_endpoint(controller, action, http_method),
        )
        .await
    }
}
