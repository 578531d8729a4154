//! Permission repository against in-memory SurrealDB.

use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;
use warden_core::error::WardenError;
use warden_core::models::endpoint::{CreateEndpoint, PermissionEndpoint};
use warden_core::models::grant::{CreateGrant, PermissionGrant};
use warden_core::models::permission::{CreatePermission, Permission};
use warden_core::repository::{GrantRepository, PermissionRepository};
use warden_core::specification::{
    Page, PermissionInclude, PermissionSpec, search_permissions,
};
use warden_db::{SurrealGrantRepository, SurrealPermissionRepository};

async fn setup() -> Surreal<Db> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    warden_db::run_migrations(&db).await.unwrap();
    db
}

fn permission(name: &str, system_name: &str, category: Option<&str>) -> Permission {
    Permission::create(
        CreatePermission {
            name: name.into(),
            system_name: system_name.into(),
            description: Some(format!("Allows {name}")),
            category: category.map(str::to_string),
            is_system_permission: false,
            required_claims: None,
        },
        Some("admin"),
    )
}

fn endpoint(permission_id: Uuid, action: &str, method: &str) -> PermissionEndpoint {
    PermissionEndpoint::new(
        permission_id,
        CreateEndpoint {
            controller: "ReportsController".into(),
            action: action.into(),
            http_method: method.into(),
            route: format!("/reports/{}", action.to_lowercase()),
        },
    )
}

#[tokio::test]
async fn insert_and_get_round_trip() {
    let repo = SurrealPermissionRepository::new(setup().await);
    let p = permission("Export reports", "Reports.Export", Some("Reports"));
    repo.insert(&p).await.unwrap();

    let fetched = repo.get_by_id(p.id).await.unwrap();
    assert_eq!(fetched.id, p.id);
    assert_eq!(fetched.system_name, "Reports.Export");
    assert_eq!(fetched.category.as_deref(), Some("Reports"));
    assert_eq!(fetched.created_by.as_deref(), Some("admin"));
    assert!(fetched.is_active);
    assert!(fetched.pending_events().is_empty());
}

#[tokio::test]
async fn get_unknown_is_not_found() {
    let repo = SurrealPermissionRepository::new(setup().await);
    let err = repo.get_by_id(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, WardenError::NotFound { .. }));
}

#[tokio::test]
async fn soft_deleted_permission_is_hidden() {
    let db = setup().await;
    let repo = SurrealPermissionRepository::new(db.clone());
    let mut p = permission("Export reports", "Reports.Export", None);
    repo.insert(&p).await.unwrap();

    p.mark_deleted(Some("admin"));
    repo.update(&p).await.unwrap();

    assert!(matches!(
        repo.get_by_id(p.id).await,
        Err(WardenError::NotFound { .. })
    ));
    assert!(repo.find_by_system_name("Reports.Export").await.unwrap().is_none());
    assert!(!repo.exists_by_system_name("Reports.Export", None).await.unwrap());

    // Still present for audit reads.
    let audit = repo
        .query(&PermissionSpec::new().with_deleted())
        .await
        .unwrap();
    assert_eq!(audit.items.len(), 1);
    assert!(audit.items[0].is_deleted);
    assert!(audit.items[0].deleted_at.is_some());

    // A deleted record cannot be updated again.
    assert!(matches!(
        repo.update(&p).await,
        Err(WardenError::NotFound { .. })
    ));
}

#[tokio::test]
async fn exists_by_system_name_honours_exclusion() {
    let repo = SurrealPermissionRepository::new(setup().await);
    let p = permission("Export reports", "Reports.Export", None);
    repo.insert(&p).await.unwrap();

    assert!(repo.exists_by_system_name("Reports.Export", None).await.unwrap());
    assert!(!repo.exists_by_system_name("Reports.Export", Some(p.id)).await.unwrap());
    assert!(!repo.exists_by_system_name("Reports.Import", None).await.unwrap());
}

#[tokio::test]
async fn search_filters_and_pages() {
    let repo = SurrealPermissionRepository::new(setup().await);
    for (name, system_name, category) in [
        ("Export reports", "Reports.Export", "Reports"),
        ("View reports", "Reports.View", "Reports"),
        ("Archive reports", "Reports.Archive", "Reports"),
        ("View users", "Users.View", "Users"),
    ] {
        repo.insert(&permission(name, system_name, Some(category)))
            .await
            .unwrap();
    }
    let mut inactive = permission("Purge reports", "Reports.Purge", Some("Reports"));
    inactive.set_active(false, None);
    repo.insert(&inactive).await.unwrap();

    let page = repo
        .query(&search_permissions(Some("REPORTS"), false, Some("Reports"), Page::new(0, 2)))
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.limit, 2);
    let names: Vec<_> = page.items.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["Archive reports", "Export reports"]);

    let all = repo
        .query(&search_permissions(Some("reports"), true, None, Page::new(0, 10)))
        .await
        .unwrap();
    assert_eq!(all.total, 4);

    let active = repo.list(false).await.unwrap();
    assert_eq!(active.len(), 4);
    assert!(active.iter().all(|p| p.is_active));
}

#[tokio::test]
async fn endpoints_map_to_active_permissions() {
    let repo = SurrealPermissionRepository::new(setup().await);
    let export = permission("Export reports", "Reports.Export", None);
    let mut audit = permission("Audit reports", "Reports.Audit", None);
    repo.insert(&export).await.unwrap();
    repo.insert(&audit).await.unwrap();

    repo.insert_endpoint(&endpoint(export.id, "Export", "post")).await.unwrap();
    repo.insert_endpoint(&endpoint(audit.id, "Export", "POST")).await.unwrap();

    let found = repo
        .find_for_endpoint("ReportsController", "Export", "Post")
        .await
        .unwrap();
    let names: Vec<_> = found.iter().map(|p| p.system_name.as_str()).collect();
    assert_eq!(names, ["Reports.Audit", "Reports.Export"]);

    audit.set_active(false, None);
    repo.update(&audit).await.unwrap();
    let found = repo
        .find_for_endpoint("ReportsController", "Export", "POST")
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, export.id);

    assert!(repo
        .find_for_endpoint("ReportsController", "Export", "GET")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn endpoint_for_unknown_permission_is_rejected() {
    let repo = SurrealPermissionRepository::new(setup().await);
    let err = repo
        .insert_endpoint(&endpoint(Uuid::new_v4(), "Export", "POST"))
        .await
        .unwrap_err();
    assert!(matches!(err, WardenError::NotFound { .. }));
}

#[tokio::test]
async fn delete_endpoint_removes_mapping() {
    let repo = SurrealPermissionRepository::new(setup().await);
    let p = permission("Export reports", "Reports.Export", None);
    repo.insert(&p).await.unwrap();
    let e = endpoint(p.id, "Export", "POST");
    repo.insert_endpoint(&e).await.unwrap();
    let listed = repo.list_endpoints(p.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, e.id);
    assert_eq!(listed[0].http_method, "POST");

    repo.delete_endpoint(e.id).await.unwrap();
    assert!(repo.list_endpoints(p.id).await.unwrap().is_empty());
    assert!(matches!(
        repo.delete_endpoint(e.id).await,
        Err(WardenError::NotFound { .. })
    ));
}

#[tokio::test]
async fn include_hints_load_children() {
    let db = setup().await;
    let repo = SurrealPermissionRepository::new(db.clone());
    let grants = SurrealGrantRepository::new(db);

    let p = permission("Export reports", "Reports.Export", None);
    repo.insert(&p).await.unwrap();
    repo.insert_endpoint(&endpoint(p.id, "Export", "POST")).await.unwrap();
    let grant = PermissionGrant::create(
        CreateGrant {
            user_id: "u-1".into(),
            permission_id: p.id,
            restrictions: None,
            valid_from: None,
            valid_to: None,
        },
        None,
    );
    grants.insert(&grant).await.unwrap();

    let plain = repo.query(&PermissionSpec::new()).await.unwrap();
    assert!(plain.items[0].endpoints.is_empty());
    assert!(plain.items[0].grants.is_empty());

    let loaded = repo
        .query(
            &PermissionSpec::new()
                .include(PermissionInclude::Endpoints)
                .include(PermissionInclude::Grants),
        )
        .await
        .unwrap();
    let loaded = &loaded.items[0];
    assert_eq!(loaded.endpoints.len(), 1);
    assert_eq!(loaded.grants.len(), 1);
    assert_eq!(loaded.grants[0].id, grant.id);
    assert_eq!(
        loaded.grants[0].permission_system_name.as_deref(),
        Some("Reports.Export")
    );
}
