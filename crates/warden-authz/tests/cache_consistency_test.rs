//! Cached answers must follow committed writes, and a broken cache must
//! never change an answer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;
use warden_authz::cache::keys;
use warden_authz::{
    AuthorizationRepository, AuthorizationService, AuthzConfig, MemoryCache, OperationContext,
};
use warden_core::cache::{CacheError, CacheStore};
use warden_core::models::endpoint::CreateEndpoint;
use warden_core::models::grant::CreateGrant;
use warden_core::models::permission::{CreatePermission, UpdatePermission};
use warden_db::{SurrealGrantRepository, SurrealPermissionRepository};

type Service<C> = AuthorizationService<SurrealPermissionRepository<Db>, SurrealGrantRepository<Db>, C>;

/// Every call fails.
struct UnavailableCache;

impl CacheStore for UnavailableCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn remove(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn remove_matching(&self, _pattern: &str) -> Result<u64, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

async fn service_with<C: CacheStore + 'static>(cache: Arc<C>) -> Service<C> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    warden_db::run_migrations(&db).await.unwrap();

    let config = AuthzConfig::default();
    let repo = AuthorizationRepository::new(
        SurrealPermissionRepository::new(db.clone()),
        SurrealGrantRepository::new(db),
        cache,
        &config,
    );
    AuthorizationService::new(Arc::new(repo), config)
}

fn permission(system_name: &str) -> CreatePermission {
    CreatePermission {
        name: system_name.into(),
        system_name: system_name.into(),
        description: None,
        category: None,
        is_system_permission: false,
        required_claims: None,
    }
}

fn grant(user_id: &str, permission_id: Uuid) -> CreateGrant {
    CreateGrant {
        user_id: user_id.into(),
        permission_id,
        restrictions: None,
        valid_from: None,
        valid_to: None,
    }
}

#[tokio::test]
async fn new_grant_replaces_cached_snapshot() {
    let cache = MemoryCache::new();
    let service = service_with(Arc::new(cache.clone())).await;
    let ctx = OperationContext::for_user("admin");
    let p = service
        .create_permission(&ctx, permission("Reports.Export"))
        .await
        .unwrap();

    assert!(service.get_user_permissions(&ctx, "u-1").await.unwrap().is_empty());
    assert!(!service.has_permission(&ctx, "u-1", "Reports.Export").await.unwrap());
    assert!(cache.contains(&keys::user_permissions("u-1")));
    assert!(cache.contains(&keys::has_permission("u-1", "Reports.Export")));

    service.grant_permission(&ctx, grant("u-1", p.id)).await.unwrap();

    assert!(!cache.contains(&keys::user_permissions("u-1")));
    assert_eq!(
        service.get_user_permissions(&ctx, "u-1").await.unwrap(),
        ["Reports.Export"]
    );
    assert!(service.has_permission(&ctx, "u-1", "Reports.Export").await.unwrap());
}

#[tokio::test]
async fn revocation_is_visible_immediately() {
    let cache = MemoryCache::new();
    let service = service_with(Arc::new(cache.clone())).await;
    let ctx = OperationContext::for_user("admin");
    let p = service
        .create_permission(&ctx, permission("Reports.Export"))
        .await
        .unwrap();
    let g = service.grant_permission(&ctx, grant("u-1", p.id)).await.unwrap();
    service.grant_permission(&ctx, grant("u-2", p.id)).await.unwrap();

    assert!(service.has_permission(&ctx, "u-1", "Reports.Export").await.unwrap());
    assert!(service.has_permission(&ctx, "u-2", "Reports.Export").await.unwrap());

    service.revoke_grant(&ctx, g.id).await.unwrap();

    assert!(!service.has_permission(&ctx, "u-1", "Reports.Export").await.unwrap());
    // The other holder's cached answer survives and is still right.
    assert!(cache.contains(&keys::has_permission("u-2", "Reports.Export")));
    assert!(service.has_permission(&ctx, "u-2", "Reports.Export").await.unwrap());
}

#[tokio::test]
async fn deactivated_permission_reaches_every_holder() {
    let cache = MemoryCache::new();
    let service = service_with(Arc::new(cache.clone())).await;
    let ctx = OperationContext::for_user("admin");
    let export = service
        .create_permission(&ctx, permission("Reports.Export"))
        .await
        .unwrap();
    let view = service
        .create_permission(&ctx, permission("Reports.View"))
        .await
        .unwrap();
    for user in ["u-1", "u-2"] {
        service.grant_permission(&ctx, grant(user, export.id)).await.unwrap();
        service.grant_permission(&ctx, grant(user, view.id)).await.unwrap();
        assert_eq!(
            service.get_user_permissions(&ctx, user).await.unwrap(),
            ["Reports.Export", "Reports.View"]
        );
    }

    service
        .update_permission(
            &ctx,
            export.id,
            UpdatePermission {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    for user in ["u-1", "u-2"] {
        assert_eq!(
            service.get_user_permissions(&ctx, user).await.unwrap(),
            ["Reports.View"]
        );
        assert!(!service.has_permission(&ctx, user, "Reports.Export").await.unwrap());
    }
}

#[tokio::test]
async fn endpoint_cache_follows_mapping_changes() {
    let cache = MemoryCache::new();
    let service = service_with(Arc::new(cache.clone())).await;
    let ctx = OperationContext::for_user("admin");
    let p = service
        .create_permission(&ctx, permission("Orders.Cancel"))
        .await
        .unwrap();

    assert!(service
        .get_permissions_for_endpoint(&ctx, "OrdersController", "Cancel", "post")
        .await
        .unwrap()
        .is_empty());
    assert!(cache.contains(&keys::endpoint("OrdersController", "Cancel", "POST")));

    service
        .add_endpoint(
            &ctx,
            p.id,
            CreateEndpoint {
                controller: "OrdersController".into(),
                action: "Cancel".into(),
                http_method: "POST".into(),
                route: "/orders/{id}/cancel".into(),
            },
        )
        .await
        .unwrap();

    let found = service
        .get_permissions_for_endpoint(&ctx, "OrdersController", "Cancel", "post")
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].system_name, "Orders.Cancel");
}

fn cancel_endpoint() -> CreateEndpoint {
    CreateEndpoint {
        controller: "OrdersController".into(),
        action: "Cancel".into(),
        http_method: "POST".into(),
        route: "/orders/{id}/cancel".into(),
    }
}

#[tokio::test]
async fn deleted_permission_leaves_endpoint_lookup() {
    let cache = MemoryCache::new();
    let service = service_with(Arc::new(cache.clone())).await;
    let ctx = OperationContext::for_user("admin");
    let p = service
        .create_permission(&ctx, permission("Orders.Cancel"))
        .await
        .unwrap();
    service.add_endpoint(&ctx, p.id, cancel_endpoint()).await.unwrap();

    let before = service
        .get_permissions_for_endpoint(&ctx, "OrdersController", "Cancel", "POST")
        .await
        .unwrap();
    assert_eq!(before.len(), 1);
    assert!(cache.contains(&keys::endpoint("OrdersController", "Cancel", "POST")));

    service.delete_permission(&ctx, p.id).await.unwrap();

    assert!(!cache.contains(&keys::endpoint("OrdersController", "Cancel", "POST")));
    assert!(service
        .get_permissions_for_endpoint(&ctx, "OrdersController", "Cancel", "POST")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn deactivated_permission_leaves_endpoint_lookup() {
    let cache = MemoryCache::new();
    let service = service_with(Arc::new(cache.clone())).await;
    let ctx = OperationContext::for_user("admin");
    let p = service
        .create_permission(&ctx, permission("Orders.Cancel"))
        .await
        .unwrap();
    service.add_endpoint(&ctx, p.id, cancel_endpoint()).await.unwrap();
    assert_eq!(
        service
            .get_permissions_for_endpoint(&ctx, "OrdersController", "Cancel", "post")
            .await
            .unwrap()
            .len(),
        1
    );

    service
        .update_permission(
            &ctx,
            p.id,
            UpdatePermission {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(service
        .get_permissions_for_endpoint(&ctx, "OrdersController", "Cancel", "post")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn cached_answers_expire_at_validity_bounds() {
    let cache = MemoryCache::new();
    let service = service_with(Arc::new(cache.clone())).await;
    let ctx = OperationContext::for_user("admin");
    let expiring = service
        .create_permission(&ctx, permission("Reports.Export"))
        .await
        .unwrap();
    let starting = service
        .create_permission(&ctx, permission("Reports.View"))
        .await
        .unwrap();

    let bound = (Utc::now() + chrono::Duration::seconds(2)).to_rfc3339();
    service
        .grant_permission(
            &ctx,
            CreateGrant {
                valid_to: Some(bound.clone()),
                ..grant("u-1", expiring.id)
            },
        )
        .await
        .unwrap();
    service
        .grant_permission(
            &ctx,
            CreateGrant {
                valid_from: Some(bound),
                ..grant("u-1", starting.id)
            },
        )
        .await
        .unwrap();

    assert!(service.has_permission(&ctx, "u-1", "Reports.Export").await.unwrap());
    assert!(!service.has_permission(&ctx, "u-1", "Reports.View").await.unwrap());
    assert_eq!(
        service.get_user_permissions(&ctx, "u-1").await.unwrap(),
        ["Reports.Export"]
    );

    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(!service.has_permission(&ctx, "u-1", "Reports.Export").await.unwrap());
    assert!(service.has_permission(&ctx, "u-1", "Reports.View").await.unwrap());
    assert_eq!(
        service.get_user_permissions(&ctx, "u-1").await.unwrap(),
        ["Reports.View"]
    );
}

#[tokio::test]
async fn unavailable_cache_does_not_change_answers() {
    let service = service_with(Arc::new(UnavailableCache)).await;
    let ctx = OperationContext::for_user("admin");
    let p = service
        .create_permission(&ctx, permission("Reports.Export"))
        .await
        .unwrap();
    assert_eq!(
        service.get_permission(&ctx, p.id).await.unwrap().system_name,
        "Reports.Export"
    );

    let g = service.grant_permission(&ctx, grant("u-1", p.id)).await.unwrap();
    assert!(service.has_permission(&ctx, "u-1", "Reports.Export").await.unwrap());
    assert_eq!(
        service.get_user_permissions(&ctx, "u-1").await.unwrap(),
        ["Reports.Export"]
    );

    service.revoke_grant(&ctx, g.id).await.unwrap();
    assert!(!service.has_permission(&ctx, "u-1", "Reports.Export").await.unwrap());
    assert!(service.get_user_permissions(&ctx, "u-1").await.unwrap().is_empty());

    service.delete_permission(&ctx, p.id).await.unwrap();
    assert!(service
        .get_permission_by_system_name(&ctx, "Reports.Export")
        .await
        .unwrap()
        .is_none());
}
