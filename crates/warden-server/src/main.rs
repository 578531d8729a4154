//! Warden server: connects storage, applies migrations, seeds the built-in
//! permissions and keeps the authorization engine warm until shutdown.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use warden_authz::{
    AuthorizationRepository, AuthorizationService, AuthzConfig, DynamicPolicyResolver,
    MemoryCache, OperationContext,
};
use warden_core::models::permission::CreatePermission;
use warden_db::{DbConfig, DbManager};

/// Permissions guarding the authorization engine's own management surface.
const SYSTEM_PERMISSIONS: &[(&str, &str, &str)] = &[
    ("Permissions.View", "View permissions", "List and inspect permissions"),
    ("Permissions.Manage", "Manage permissions", "Create, edit and delete permissions"),
    ("Grants.View", "View grants", "List and inspect permission grants"),
    ("Grants.Manage", "Manage grants", "Grant, revoke and delete permission grants"),
];

fn env_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| format!("{name} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}

fn db_config() -> DbConfig {
    let defaults = DbConfig::default();
    DbConfig {
        url: env_or("WARDEN_DB_URL", defaults.url),
        namespace: env_or("WARDEN_DB_NAMESPACE", defaults.namespace),
        database: env_or("WARDEN_DB_DATABASE", defaults.database),
        username: env_or("WARDEN_DB_USER", defaults.username),
        password: env_or("WARDEN_DB_PASSWORD", defaults.password),
    }
}

fn authz_config() -> Result<AuthzConfig, String> {
    let defaults = AuthzConfig::default();
    Ok(AuthzConfig {
        cache_ttl_secs: env_parse("WARDEN_CACHE_TTL_SECS", defaults.cache_ttl_secs)?,
        policy_cache_ttl_secs: env_parse(
            "WARDEN_POLICY_CACHE_TTL_SECS",
            defaults.policy_cache_ttl_secs,
        )?,
        policy_prefix: env_or("WARDEN_POLICY_PREFIX", defaults.policy_prefix),
        max_page_size: env_parse("WARDEN_MAX_PAGE_SIZE", defaults.max_page_size)?,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warden=info")),
        )
        .json()
        .init();

    tracing::info!("Starting Warden server...");

    let db_config = db_config();
    let config = authz_config()?;

    let db = DbManager::connect(&db_config).await?;
    db.migrate().await?;

    let repo = Arc::new(AuthorizationRepository::new(
        db.permissions(),
        db.grants(),
        Arc::new(MemoryCache::new()),
        &config,
    ));
    let resolver = DynamicPolicyResolver::new(Arc::clone(&repo), &config);
    let service = AuthorizationService::new(repo, config);

    let shutdown = CancellationToken::new();
    let ctx = OperationContext::system().with_cancellation(shutdown.clone());

    for (system_name, name, description) in SYSTEM_PERMISSIONS {
        let permission = service
            .ensure_system_permission(
                &ctx,
                CreatePermission {
                    name: (*name).into(),
                    system_name: (*system_name).into(),
                    description: Some((*description).into()),
                    category: Some("Authorization".into()),
                    is_system_permission: true,
                    required_claims: None,
                },
            )
            .await?;
        // Warm the policy cache for the management surface.
        resolver
            .resolve(&resolver.policy_name(&permission.system_name))
            .await?;
    }
    tracing::info!(
        permissions = SYSTEM_PERMISSIONS.len(),
        "System permissions ready"
    );

    tokio::signal::ctrl_c().await?;
    shutdown.cancel();

    tracing::info!("Warden server stopped.");
    Ok(())
}
