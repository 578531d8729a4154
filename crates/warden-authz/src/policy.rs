//! Dynamic policy resolution.
//!
//! Enforcement middleware names a policy such as `Permission_Orders.Cancel`.
//! The resolver turns that name into a requirement bound to the
//! permission's system name, once, and caches it. Permissions created at
//! runtime become enforceable without a restart.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use warden_core::cache::CacheStore;
use warden_core::error::WardenResult;
use warden_core::repository::{GrantRepository, PermissionRepository};

use crate::cache::keys;
use crate::config::AuthzConfig;
use crate::context::OperationContext;
use crate::repository::AuthorizationRepository;

/// The caller must hold this permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRequirement {
    pub system_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPolicy {
    pub name: String,
    pub requirement: PermissionRequirement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny { reason: String },
    /// Nothing is registered under the name; the framework applies its own
    /// default.
    NoPolicy,
}

pub struct DynamicPolicyResolver<P, G, C> {
    repo: Arc<AuthorizationRepository<P, G, C>>,
    prefix: String,
    ttl: Duration,
}

impl<P, G, C> DynamicPolicyResolver<P, G, C>
where
    P: PermissionRepository,
    G: GrantRepository,
    C: CacheStore + 'static,
{
    pub fn new(repo: Arc<AuthorizationRepository<P, G, C>>, config: &AuthzConfig) -> Self {
        Self {
            repo,
            prefix: config.policy_prefix.clone(),
            ttl: config.policy_cache_ttl(),
        }
    }

    /// Policy name for a permission system name.
    pub fn policy_name(&self, system_name: &str) -> String {
        format!("{}{system_name}", self.prefix)
    }

    /// `None` for names without the prefix and for permissions that do not
    /// exist. Only successful resolutions are cached.
    pub async fn resolve(&self, policy_name: &str) -> WardenResult<Option<PermissionPolicy>> {
        let Some(system_name) = policy_name
            .strip_prefix(self.prefix.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return Ok(None);
        };

        let key = keys::policy(policy_name);
        let cache = self.repo.cache();
        if let Some(policy) = cache.get_json::<PermissionPolicy>(&key).await {
            return Ok(Some(policy));
        }

        let Some(permission) = self.repo.get_permission_by_system_name(system_name).await? else {
            debug!(policy_name, "No permission behind policy");
            return Ok(None);
        };

        let policy = PermissionPolicy {
            name: policy_name.to_string(),
            requirement: PermissionRequirement {
                system_name: permission.system_name,
            },
        };
        cache.put_json(&key, &policy, self.ttl).await;
        debug!(policy_name, "Policy resolved");
        Ok(Some(policy))
    }

    pub async fn authorize(
        &self,
        ctx: &OperationContext,
        user_id: &str,
        policy_name: &str,
    ) -> WardenResult<PolicyDecision> {
        let Some(policy) = ctx.cancellable(self.resolve(policy_name)).await? else {
            return Ok(PolicyDecision::NoPolicy);
        };
        self.enforce(ctx, user_id, &policy).await
    }

    /// Policies for every active permission mapped to the route.
    pub async fn policies_for_endpoint(
        &self,
        ctx: &OperationContext,
        controller: &str,
        action: &str,
        http_method: &str,
    ) -> WardenResult<Vec<PermissionPolicy>> {
        let permissions = ctx
            .cancellable(
                self.repo
                    .get_permissions_for_endpoint(controller, action, http_method),
            )
            .await?;

        let mut policies = Vec::with_capacity(permissions.len());
        for permission in permissions {
            let name = self.policy_name(&permission.system_name);
            if let Some(policy) = ctx.cancellable(self.resolve(&name)).await? {
                policies.push(policy);
            }
        }
        Ok(policies)
    }

    /// Every policy mapped to the route must allow. No mapping means no
    /// policy.
    pub async fn authorize_endpoint(
        &self,
        ctx: &OperationContext,
        user_id: &str,
        controller: &str,
        action: &str,
        http_method: &str,
    ) -> WardenResult<PolicyDecision> {
        let policies = self
            .policies_for_endpoint(ctx, controller, action, http_method)
            .await?;
        if policies.is_empty() {
            return Ok(PolicyDecision::NoPolicy);
        }
        for policy in &policies {
            let decision = self.enforce(ctx, user_id, policy).await?;
            if decision != PolicyDecision::Allow {
                return Ok(decision);
            }
        }
        Ok(PolicyDecision::Allow)
    }

    async fn enforce(
        &self,
        ctx: &OperationContext,
        user_id: &str,
        policy: &PermissionPolicy,
    ) -> WardenResult<PolicyDecision> {
        let system_name = &policy.requirement.system_name;
        let granted = ctx
            .cancellable(self.repo.has_permission(user_id, system_name))
            .await?;
        Ok(if granted {
            PolicyDecision::Allow
        } else {
            PolicyDecision::Deny {
                reason: format!("user '{user_id}' lacks '{system_name}'"),
            }
        })
    }
}
