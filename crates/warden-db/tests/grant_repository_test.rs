//! Grant repository against in-memory SurrealDB.

use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;
use warden_core::error::WardenError;
use warden_core::models::grant::{CreateGrant, PermissionGrant, UpdateGrant};
use warden_core::models::permission::{CreatePermission, Permission};
use warden_core::repository::{GrantRepository, PermissionRepository};
use warden_core::specification::{
    Page, active_grants_for_pair, search_grants, valid_grants_for, valid_grants_of_user,
};
use warden_db::{SurrealGrantRepository, SurrealPermissionRepository};

struct Fixture {
    permissions: SurrealPermissionRepository<Db>,
    grants: SurrealGrantRepository<Db>,
}

async fn setup() -> Fixture {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    warden_db::run_migrations(&db).await.unwrap();
    Fixture {
        permissions: SurrealPermissionRepository::new(db.clone()),
        grants: SurrealGrantRepository::new(db),
    }
}

impl Fixture {
    async fn permission(&self, system_name: &str) -> Permission {
        let p = Permission::create(
            CreatePermission {
                name: system_name.replace('.', " "),
                system_name: system_name.into(),
                description: None,
                category: None,
                is_system_permission: false,
                required_claims: None,
            },
            None,
        );
        self.permissions.insert(&p).await.unwrap();
        p
    }

    async fn grant(&self, user_id: &str, permission_id: Uuid) -> PermissionGrant {
        let g = PermissionGrant::create(
            CreateGrant {
                user_id: user_id.into(),
                permission_id,
                restrictions: None,
                valid_from: None,
                valid_to: None,
            },
            Some("admin"),
        );
        self.grants.insert(&g).await.unwrap();
        g
    }
}

#[tokio::test]
async fn insert_update_and_deactivate() {
    let f = setup().await;
    let p = f.permission("Reports.Export").await;
    let mut g = f.grant("u-1", p.id).await;

    g.update(
        UpdateGrant {
            restrictions: Some(Some(r#"{"region":"EU"}"#.into())),
            valid_to: Some(Some("2099-01-01".into())),
            ..Default::default()
        },
        Some("admin"),
    );
    f.grants.update(&g).await.unwrap();

    let fetched = f.grants.get_by_id(g.id).await.unwrap();
    assert_eq!(fetched.restrictions.as_deref(), Some(r#"{"region":"EU"}"#));
    assert_eq!(fetched.valid_to.as_deref(), Some("2099-01-01"));
    assert_eq!(fetched.updated_by.as_deref(), Some("admin"));

    g.deactivate(Some("admin"));
    f.grants.update(&g).await.unwrap();
    assert!(!f.grants.get_by_id(g.id).await.unwrap().is_active);
    assert!(f.grants.list_by_user("u-1", false).await.unwrap().is_empty());
    assert_eq!(f.grants.list_by_user("u-1", true).await.unwrap().len(), 1);
}

#[tokio::test]
async fn deleted_grant_is_not_found() {
    let f = setup().await;
    let p = f.permission("Reports.Export").await;
    let mut g = f.grant("u-1", p.id).await;

    g.mark_deleted(None);
    f.grants.update(&g).await.unwrap();

    assert!(matches!(
        f.grants.get_by_id(g.id).await,
        Err(WardenError::NotFound { .. })
    ));
    assert!(f.grants.list_by_permission(p.id, true).await.unwrap().is_empty());
}

#[tokio::test]
async fn valid_grant_lookup_requires_active_permission() {
    let f = setup().await;
    let mut p = f.permission("Reports.Export").await;
    f.grant("u-1", p.id).await;

    let spec = valid_grants_for("u-1", "Reports.Export");
    assert_eq!(f.grants.query(&spec).await.unwrap().items.len(), 1);
    assert!(f.grants.query(&valid_grants_for("u-2", "Reports.Export")).await.unwrap().items.is_empty());

    p.set_active(false, None);
    f.permissions.update(&p).await.unwrap();
    assert!(f.grants.query(&spec).await.unwrap().items.is_empty());
}

#[tokio::test]
async fn user_grants_carry_permission_names() {
    let f = setup().await;
    let export = f.permission("Reports.Export").await;
    let view = f.permission("Reports.View").await;
    f.grant("u-1", export.id).await;
    f.grant("u-1", view.id).await;

    let grants = f.grants.query(&valid_grants_of_user("u-1")).await.unwrap().items;
    let mut names: Vec<_> = grants
        .iter()
        .filter_map(|g| g.permission_system_name.as_deref())
        .collect();
    names.sort();
    assert_eq!(names, ["Reports.Export", "Reports.View"]);
}

#[tokio::test]
async fn pair_lookup_and_exclusion() {
    let f = setup().await;
    let p = f.permission("Reports.Export").await;
    let g = f.grant("u-1", p.id).await;

    assert!(f.grants.exists(&active_grants_for_pair("u-1", p.id, None)).await.unwrap());
    assert!(!f.grants.exists(&active_grants_for_pair("u-1", p.id, Some(g.id))).await.unwrap());
    assert!(!f.grants.exists(&active_grants_for_pair("u-2", p.id, None)).await.unwrap());
}

#[tokio::test]
async fn search_pages_newest_first() {
    let f = setup().await;
    let p = f.permission("Reports.Export").await;
    let mut ids = Vec::new();
    for user in ["u-1", "u-2", "u-3"] {
        ids.push(f.grant(user, p.id).await.id);
    }

    let page = f
        .grants
        .query(&search_grants(None, Some(p.id), false, Page::new(0, 2)))
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].id, ids[2]);
}
