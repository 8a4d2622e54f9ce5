mod common;

use serde::{Deserialize, Serialize};
use serde_json::json;
use sqldoc_core::{
    db::query::{any, element, field},
    value::Value,
};

#[derive(Debug, Deserialize, PartialEq, Serialize)]
struct User {
    #[serde(default, skip_serializing)]
    _id: i64,
    name: String,
    age: u32,
}

#[test]
fn adults_scenario_counts_one_row() {
    let db = common::open();
    db.insert("users", &json!({"name": "Ana", "age": 30}))
        .expect("insert");

    let adults = db.query("users").filter(field("age").gte(18));

    assert!(adults.sql().expect("sql").joins.is_empty());
    assert_eq!(adults.count().expect("count"), 1);
}

#[test]
fn any_matches_a_row_once_despite_many_elements() {
    let db = common::open();
    db.insert(
        "orders",
        &json!({"items": [{"sku": "A1", "qty": 2}, {"sku": "B2", "qty": 5}]}),
    )
    .expect("insert");

    let big = db
        .query("orders")
        .filter(any("items", field("qty").gt(3)));

    assert_eq!(big.all().expect("all").len(), 1);
    assert_eq!(big.count().expect("count"), 1);

    let none = db
        .query("orders")
        .filter(any("items", field("qty").gt(10)));
    assert!(none.all().expect("all").is_empty());
}

#[test]
fn contains_does_not_match_partial_values() {
    let db = common::open();
    db.insert("posts", &json!({"codes": ["10", "20"]}))
        .expect("insert");

    assert_eq!(
        db.query("posts")
            .filter(field("codes").contains("1"))
            .count()
            .expect("count"),
        0
    );
    assert_eq!(
        db.query("posts")
            .filter(field("codes").contains("10"))
            .count()
            .expect("count"),
        1
    );
}

#[test]
fn isin_and_element_predicates_scan_arrays() {
    let db = common::open();
    db.insert("posts", &json!({"scores": [40, 95]}))
        .expect("insert");
    db.insert("posts", &json!({"scores": [10]})).expect("insert");

    let high = db
        .query("posts")
        .filter(any("scores", element().gte(90)))
        .count()
        .expect("count");
    let listed = db
        .query("posts")
        .filter(field("scores").isin([10, 11]))
        .count()
        .expect("count");
    let empty = db
        .query("posts")
        .filter(field("scores").isin(Vec::<i64>::new()))
        .count()
        .expect("count");

    assert_eq!((high, listed, empty), (1, 1, 0));
}

#[test]
fn ordering_paging_and_first() {
    let db = common::open();
    for (name, age) in [("Cy", 41), ("Ana", 30), ("Bo", 25)] {
        db.insert("users", &json!({"name": name, "age": age}))
            .expect("insert");
    }

    let names: Vec<String> = db
        .query("users")
        .order_by("name")
        .all_as::<User>()
        .expect("all")
        .into_iter()
        .map(|u| u.name)
        .collect();
    assert_eq!(names, vec!["Ana", "Bo", "Cy"]);

    let page = db
        .query("users")
        .order_by_desc("age")
        .limit(1)
        .offset(1)
        .all()
        .expect("page");
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].get("name"), Some(&json!("Ana")));

    assert_eq!(db.query("users").limit(2).count().expect("count"), 2);

    let first = db
        .query("users")
        .filter(field("age").gt(100))
        .first()
        .expect("first");
    assert!(first.is_none());
}

#[test]
fn excludes_and_null_checks() {
    let db = common::open();
    db.insert("users", &json!({"name": "Ana", "email": "a@x"}))
        .expect("insert");
    db.insert("users", &json!({"name": "Bo", "email": null}))
        .expect("insert");
    db.insert("users", &json!({"name": "Cy"})).expect("insert");

    let with_email = db
        .query("users")
        .filter(field("email").is_not_null())
        .count()
        .expect("count");
    let not_ana = db
        .query("users")
        .exclude(field("name").eq("Ana"))
        .count()
        .expect("count");
    let null_email = db
        .query("users")
        .filter(field("email").eq(Value::Null))
        .count()
        .expect("count");

    assert_eq!((with_email, not_ana, null_email), (1, 2, 2));
}

#[test]
fn repeated_terminals_return_equal_results() {
    let db = common::open();
    db.insert("users", &json!({"name": "Ana", "age": 30}))
        .expect("insert");
    db.insert("users", &json!({"name": "Bo", "age": 12}))
        .expect("insert");

    let query = db.query("users").filter(field("age").gte(18));

    assert_eq!(query.all().expect("first"), query.all().expect("second"));
}

#[test]
fn upsert_replaces_and_find_decodes() {
    let db = common::open();
    let id = db
        .insert("users", &User { _id: 0, name: "Ana".into(), age: 30 })
        .expect("insert");

    let same = db
        .upsert("users", Some(id), &json!({"name": "Ana", "age": 31}))
        .expect("upsert");
    assert_eq!(same, id);

    let user: User = db.find_as("users", id).expect("find").expect("present");
    assert_eq!(user, User { _id: id, name: "Ana".into(), age: 31 });
    assert!(db.find("users", id + 100).expect("find").is_none());
}

#[test]
fn bulk_upsert_inserts_and_replaces_in_input_order() {
    let db = common::open();
    let existing = db.insert("users", &json!({"name": "Old"})).expect("insert");

    let ids = db
        .bulk_upsert(
            "users",
            &[
                json!({"name": "New"}),
                json!({"_id": existing, "name": "Renamed"}),
            ],
        )
        .expect("bulk");

    assert_eq!(ids.len(), 2);
    assert_eq!(ids[1], existing);
    let renamed = db.find("users", existing).expect("find").expect("present");
    assert_eq!(renamed.get("name"), Some(&json!("Renamed")));
    assert_eq!(renamed.get("_id"), None);
}

#[test]
fn delete_row_reports_existence() {
    let db = common::open();
    let id = db.insert("users", &json!({"name": "Ana"})).expect("insert");

    assert!(db.delete_row("users", id).expect("delete"));
    assert!(!db.delete_row("users", id).expect("second delete"));
}

#[test]
fn indexes_are_created_and_dropped() {
    let db = common::open();
    let name = db.create_index("users", "address.city", false).expect("index");
    assert_eq!(name, "idx_users_address_city");

    db.create_index_named("users", "_id", true, "users_id_unique")
        .expect("column index");
    db.drop_index(&name).expect("drop");
    db.drop_index("users_id_unique").expect("drop");
}

#[test]
fn raw_sql_and_explain_pass_through() {
    let db = common::open();
    db.insert("users", &json!({"name": "Ana", "age": 30}))
        .expect("insert");

    let docs = db
        .execute_sql(
            "SELECT _id, data FROM users WHERE json_extract(data, '$.age') > ?",
            &[Value::Int(18)],
        )
        .expect("raw");
    assert_eq!(docs.len(), 1);

    let plan = db
        .query("users")
        .filter(field("age").gte(18))
        .explain()
        .expect("explain");
    assert!(!plan.is_empty());
}

#[test]
fn compile_errors_surface_before_execution() {
    let db = common::open();
    let err = db
        .query("users")
        .filter(sqldoc_core::db::query::rel("manager").field("name").eq("x"))
        .all()
        .expect_err("undeclared relation");

    assert!(err.is_compile_error());
}

#[test]
fn relation_filters_join_the_target_table() {
    let db = common::open();
    let oslo = db.insert("addresses", &json!({"city": "Oslo"})).expect("insert");
    let rome = db.insert("addresses", &json!({"city": "Rome"})).expect("insert");
    db.insert(
        "users",
        &json!({"name": "Ana", "address": {"_table": "addresses", "_id": oslo}}),
    )
    .expect("insert");
    db.insert(
        "users",
        &json!({"name": "Bo", "address": {"_table": "addresses", "_id": rome}}),
    )
    .expect("insert");

    let in_oslo = db
        .query("users")
        .filter(sqldoc_core::db::query::rel("address").field("city").eq("Oslo"))
        .resolve(false)
        .all()
        .expect("all");

    assert_eq!(in_oslo.len(), 1);
    assert_eq!(in_oslo[0].get("name"), Some(&json!("Ana")));
}
