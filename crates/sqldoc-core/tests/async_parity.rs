#![cfg(feature = "async")]

mod common;

use serde_json::json;
use sqldoc_core::db::{
    AsyncDb, AsyncSqliteAdapter, DeletePolicy, Marker, Query,
    query::{any, field, rel},
};

async fn open() -> AsyncDb<AsyncSqliteAdapter> {
    let db = AsyncDb::new(
        AsyncSqliteAdapter::in_memory().await.expect("sqlite"),
        common::registry(),
    );
    for table in common::TABLES {
        db.ensure_table(table).await.expect("table");
    }
    db.ensure_versioned_table("accounts").await.expect("versioned");

    db
}

fn sample_query() -> Query {
    Query::new("orders")
        .filter(any("items", field("qty").gt(3)))
        .filter(rel("customer").field("name").like("A%"))
        .exclude(field("archived").eq(true))
        .order_by(rel("customer").field("name"))
        .limit(5)
}

#[tokio::test]
async fn both_modes_compile_identical_sql() {
    let blocking = common::open();
    let cooperative = open().await;

    let left = blocking.bind(sample_query()).sql().expect("blocking sql");
    let right = cooperative.bind(sample_query()).sql().expect("async sql");

    assert_eq!(left, right);
}

#[tokio::test]
async fn async_terminals_match_blocking_behavior() {
    let db = open().await;
    db.insert("users", &json!({"name": "Ana", "age": 30}))
        .await
        .expect("insert");
    db.insert(
        "orders",
        &json!({"items": [{"sku": "A1", "qty": 2}, {"sku": "B2", "qty": 5}]}),
    )
    .await
    .expect("insert");

    let adults = db.query("users").filter(field("age").gte(18));
    assert_eq!(adults.count().await.expect("count"), 1);
    assert_eq!(
        db.query("orders")
            .filter(any("items", field("qty").gt(3)))
            .all()
            .await
            .expect("all")
            .len(),
        1
    );
    assert!(
        db.query("users")
            .filter(field("age").gt(99))
            .first()
            .await
            .expect("first")
            .is_none()
    );
    assert!(!adults.explain().await.expect("explain").is_empty());
}

#[tokio::test]
async fn async_hydration_and_delete_policies() {
    let db = open().await;
    let address = db
        .insert("addresses", &json!({"city": "Oslo"}))
        .await
        .expect("insert");
    let user = db
        .insert(
            "users",
            &json!({"name": "Ana", "address": Marker::new("addresses", address).to_json()}),
        )
        .await
        .expect("insert");

    let doc = db.find("users", user).await.expect("find").expect("present");
    assert_eq!(doc.data["address"]["city"], json!("Oslo"));

    let err = db
        .delete_with("addresses", address, DeletePolicy::Restrict)
        .await
        .expect_err("blocked");
    assert!(err.is_integrity_violation());

    let report = db
        .delete_with("addresses", address, DeletePolicy::SetNull)
        .await
        .expect("set null");
    assert_eq!(report.rewritten, vec![Marker::new("users", user)]);

    let statuses = db.validate_references("users", user).await.expect("validate");
    assert!(statuses.is_empty());
}

#[tokio::test]
async fn async_versioned_writes() {
    let db = open().await;
    let (id, v0) = db
        .upsert_with_version("accounts", None, &json!({"balance": 1}), 0)
        .await
        .expect("insert");
    let v1 = db
        .update_versioned("accounts", id, &json!({"balance": 2}), v0)
        .await
        .expect("update");

    let err = db
        .update_versioned("accounts", id, &json!({"balance": 3}), v0)
        .await
        .expect_err("stale");

    assert_eq!((v0, v1), (0, 1));
    assert!(err.is_stale_version());
    assert_eq!(db.refresh("accounts", id).await.expect("refresh").version, 1);
}

#[tokio::test]
async fn async_bulk_upsert_and_raw_sql() {
    let db = open().await;
    let ids = db
        .bulk_upsert("users", &[json!({"name": "Ana"}), json!({"name": "Bo"})])
        .await
        .expect("bulk");
    assert_eq!(ids.len(), 2);

    let docs = db
        .execute_sql("SELECT _id, data FROM users ORDER BY _id", &[])
        .await
        .expect("raw");
    assert_eq!(docs.len(), 2);
    assert!(db.delete_row("users", ids[0]).await.expect("delete"));
}
