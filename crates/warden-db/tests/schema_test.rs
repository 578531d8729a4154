//! Schema initialization against in-memory SurrealDB.

use surrealdb::Surreal;
use surrealdb::engine::local::Mem;

#[tokio::test]
async fn schema_migration_applies_successfully() {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();

    warden_db::run_migrations(&db).await.unwrap();

    let mut result = db.query("INFO FOR DB").await.unwrap();
    let info: Option<surrealdb_types::Value> = result.take(0).unwrap();
    let info = info.expect("INFO FOR DB should return a value");
    let info_str = format!("{:?}", info);

    for table in ["permission", "permission_grant", "permission_endpoint", "_migration"] {
        assert!(info_str.contains(table), "missing {table} table");
    }
}

#[tokio::test]
async fn migration_is_idempotent() {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();

    let first = warden_db::run_migrations(&db).await.unwrap();
    let second = warden_db::run_migrations(&db).await.unwrap();
    assert_eq!(first as u32, warden_db::latest_version());
    assert_eq!(second, 0);

    let mut result = db.query("SELECT * FROM _migration").await.unwrap();
    let records: Vec<surrealdb_types::Value> = result.take(0).unwrap();
    assert_eq!(records.len() as u32, warden_db::latest_version());
}

#[tokio::test]
async fn empty_system_name_is_rejected() {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    warden_db::run_migrations(&db).await.unwrap();

    let result = db
        .query("CREATE permission SET name = 'Nameless', system_name = ''")
        .await
        .unwrap()
        .check();

    assert!(result.is_err(), "empty system_name should be rejected");
}
