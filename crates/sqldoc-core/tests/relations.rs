mod common;

use common::RecordingSink;
use serde_json::{Value as JsonValue, json};
use sqldoc_core::{
    config::DbConfig,
    db::{DeletePolicy, Marker, Path, ReferenceState},
    error::ErrorClass,
};
use std::sync::atomic::Ordering;

fn marker(table: &str, id: i64) -> JsonValue {
    Marker::new(table, id).to_json()
}

// ----------------------------------------------------------------------
// Hydration
// ----------------------------------------------------------------------

#[test]
fn hydration_batches_one_lookup_per_target_table() {
    let sink = RecordingSink::leak();
    let db = common::open().metrics_sink(sink);
    let oslo = db.insert("addresses", &json!({"city": "Oslo"})).expect("insert");
    let rome = db.insert("addresses", &json!({"city": "Rome"})).expect("insert");
    for (name, address) in [("Ana", oslo), ("Bo", rome), ("Cy", oslo), ("Di", rome)] {
        db.insert("users", &json!({"name": name, "address": marker("addresses", address)}))
            .expect("insert");
    }

    let users = db.query("users").order_by("name").all().expect("all");

    assert_eq!(users.len(), 4);
    assert_eq!(sink.lookups(), 1);
    assert_eq!(sink.tables(), vec!["addresses".to_string()]);
    assert_eq!(users[0].data["address"]["city"], json!("Oslo"));
    assert_eq!(users[0].data["address"]["_id"], json!(oslo));
    assert_eq!(users[1].data["address"]["city"], json!("Rome"));
}

#[test]
fn hydration_terminates_on_cycles() {
    let sink = RecordingSink::leak();
    let db = common::open().metrics_sink(sink);
    let user = db.insert("users", &json!({"name": "Ana"})).expect("insert");
    let address = db
        .insert(
            "addresses",
            &json!({"city": "Oslo", "resident": marker("users", user)}),
        )
        .expect("insert");
    db.upsert(
        "users",
        Some(user),
        &json!({"name": "Ana", "address": marker("addresses", address)}),
    )
    .expect("link");

    let doc = db.find("users", user).expect("find").expect("present");

    assert_eq!(doc.data["address"]["city"], json!("Oslo"));
    assert_eq!(doc.data["address"]["resident"], marker("users", user));
    assert_eq!(sink.lookups(), 1);
}

#[test]
fn shared_nodes_expand_once_per_result() {
    const RUNGS: i64 = 24;

    // Every rung points at the next one twice, so a tree expansion would
    // double per level.
    let db = common::open();
    let mut below = db.insert("nodes", &json!({"rung": RUNGS})).expect("insert");
    for rung in (0..RUNGS).rev() {
        below = db
            .insert(
                "nodes",
                &json!({
                    "rung": rung,
                    "left": marker("nodes", below),
                    "right": marker("nodes", below),
                }),
            )
            .expect("insert");
    }

    let top = db.find("nodes", below).expect("find").expect("present");

    let mut node = &top.data;
    for rung in 0..RUNGS {
        assert_eq!(node["rung"], json!(rung));
        let next = &node["left"];
        assert_eq!(node["right"], marker("nodes", next["_id"].as_i64().expect("id")));
        node = next;
    }
    assert_eq!(node["rung"], json!(RUNGS));
    assert!(top.data.to_string().len() < 4_096);
}

#[test]
fn shared_node_is_a_marker_after_its_first_occurrence() {
    let db = common::open();
    let oslo = db.insert("addresses", &json!({"city": "Oslo"})).expect("insert");
    for name in ["Ana", "Bo"] {
        db.insert("users", &json!({"name": name, "address": marker("addresses", oslo)}))
            .expect("insert");
    }

    let users = db.query("users").order_by("name").all().expect("all");

    assert_eq!(users[0].data["address"]["city"], json!("Oslo"));
    assert_eq!(users[1].data["address"], marker("addresses", oslo));
}

#[test]
fn hydration_lookup_is_not_bounded_by_parameter_limits() {
    const TARGETS: usize = 33_000;

    let sink = RecordingSink::leak();
    let db = common::open().metrics_sink(sink);
    let cities: Vec<JsonValue> = (0..TARGETS).map(|n| json!({"city": n})).collect();
    let addresses = db.bulk_upsert("addresses", &cities).expect("targets");
    let residents: Vec<JsonValue> = addresses
        .iter()
        .map(|&id| json!({"address": marker("addresses", id)}))
        .collect();
    db.bulk_upsert("users", &residents).expect("referrers");

    let users = db.query("users").all().expect("all");

    assert_eq!(users.len(), TARGETS);
    assert_eq!(sink.lookups(), 1);
    assert!(users.iter().all(|u| u.data["address"].get("city").is_some()));
}

#[test]
fn resolve_false_keeps_markers() {
    let db = common::open();
    let address = db.insert("addresses", &json!({"city": "Oslo"})).expect("insert");
    db.insert("users", &json!({"address": marker("addresses", address)}))
        .expect("insert");

    let raw = db.query("users").resolve(false).all().expect("all");
    assert_eq!(raw[0].data["address"], marker("addresses", address));

    let lazy = common::open_with(DbConfig {
        resolve_by_default: false,
        ..DbConfig::default()
    });
    let address = lazy.insert("addresses", &json!({"city": "Oslo"})).expect("insert");
    lazy.insert("users", &json!({"address": marker("addresses", address)}))
        .expect("insert");
    let docs = lazy.query("users").all().expect("all");
    assert_eq!(docs[0].data["address"], marker("addresses", address));

    let resolved = lazy.query("users").resolve(true).all().expect("all");
    assert_eq!(resolved[0].data["address"]["city"], json!("Oslo"));
}

#[test]
fn depth_bound_limits_expansion() {
    let db = common::open_with(DbConfig {
        max_hydration_depth: Some(1),
        ..DbConfig::default()
    });
    let customer = db.insert("users", &json!({"name": "Ana"})).expect("insert");
    let address = db
        .insert("addresses", &json!({"city": "Oslo", "resident": marker("users", customer)}))
        .expect("insert");
    db.upsert(
        "users",
        Some(customer),
        &json!({"name": "Ana", "address": marker("addresses", address)}),
    )
    .expect("link");
    let order = db
        .insert("orders", &json!({"customer": marker("users", customer)}))
        .expect("insert");

    let doc = db.find("orders", order).expect("find").expect("present");

    assert_eq!(doc.data["customer"]["name"], json!("Ana"));
    assert_eq!(doc.data["customer"]["address"], marker("addresses", address));
}

#[test]
fn dangling_and_inline_lookalikes_are_left_alone() {
    let db = common::open();
    let inline = json!({"_table": "addresses", "_id": 1, "note": "inline"});
    let id = db
        .insert(
            "users",
            &json!({"address": marker("addresses", 404), "copy": inline}),
        )
        .expect("insert");

    let doc = db.find("users", id).expect("find").expect("present");

    assert_eq!(doc.data["address"], marker("addresses", 404));
    assert_eq!(doc.data["copy"], inline);
}

// ----------------------------------------------------------------------
// Delete policies
// ----------------------------------------------------------------------

#[test]
fn restrict_blocks_and_leaves_the_target() {
    let sink = RecordingSink::leak();
    let db = common::open().metrics_sink(sink);
    let tag = db.insert("tags", &json!({"name": "rust"})).expect("insert");
    let post = db
        .insert("posts", &json!({"tags": [marker("tags", tag)]}))
        .expect("insert");

    let err = db
        .delete_with("tags", tag, DeletePolicy::Restrict)
        .expect_err("blocked");

    assert!(err.is_integrity_violation());
    assert_eq!(err.class, ErrorClass::Conflict);
    let violation = err.as_integrity_violation().expect("violation");
    assert_eq!(violation.referrers.len(), 1);
    assert_eq!(violation.referrers[0].table, "posts");
    assert_eq!(violation.referrers[0].id, post);
    assert_eq!(violation.referrers[0].paths, vec![Path::parse("tags[0]")]);
    assert!(db.find("tags", tag).expect("find").is_some());
    assert_eq!(sink.delete_blocks.load(Ordering::SeqCst), 1);
}

#[test]
fn restrict_ignores_prefilter_collisions() {
    let db = common::open();
    let tag = db.insert("tags", &json!({"name": "one"})).expect("insert");
    // Same textual fragments, different marker (id 1 vs 12).
    db.insert("posts", &json!({"tags": [marker("tags", tag * 10 + 2)]}))
        .expect("insert");

    let report = db
        .delete_with("tags", tag, DeletePolicy::Restrict)
        .expect("unreferenced");

    assert_eq!(report.deleted.len(), 1);
    assert!(db.find("tags", tag).expect("find").is_none());
}

#[test]
fn default_policy_comes_from_config() {
    let db = common::open();
    let tag = db.insert("tags", &json!({})).expect("insert");
    db.insert("posts", &json!({"tags": [marker("tags", tag)]}))
        .expect("insert");

    assert!(db.delete("tags", tag).expect_err("restrict").is_integrity_violation());
}

#[test]
fn set_null_preserves_array_length() {
    let db = common::open();
    let keep = db.insert("tags", &json!({"name": "keep"})).expect("insert");
    let gone = db.insert("tags", &json!({"name": "gone"})).expect("insert");
    let post = db
        .insert(
            "posts",
            &json!({"tags": [marker("tags", gone), marker("tags", keep)], "main": marker("tags", gone)}),
        )
        .expect("insert");

    let report = db
        .delete_with("tags", gone, DeletePolicy::SetNull)
        .expect("set null");

    assert_eq!(report.deleted, vec![Marker::new("tags", gone)]);
    assert_eq!(report.rewritten, vec![Marker::new("posts", post)]);
    assert!(db.find("tags", gone).expect("find").is_none());

    let stored = db
        .query("posts")
        .resolve(false)
        .first()
        .expect("first")
        .expect("post");
    assert_eq!(
        stored.data["tags"],
        json!([JsonValue::Null, marker("tags", keep)])
    );
    assert_eq!(stored.data["main"], JsonValue::Null);
}

#[test]
fn cascade_follows_referrers_through_cycles() {
    let db = common::open();
    let author = db.insert("authors", &json!({"name": "Le Guin"})).expect("insert");
    let book = db
        .insert("books", &json!({"title": "Lathe", "author": marker("authors", author)}))
        .expect("insert");
    db.upsert(
        "authors",
        Some(author),
        &json!({"name": "Le Guin", "favorite": marker("books", book)}),
    )
    .expect("close the cycle");
    let review = db
        .insert("reviews", &json!({"book": marker("books", book)}))
        .expect("insert");
    let other = db.insert("books", &json!({"title": "Unrelated"})).expect("insert");

    let report = db
        .delete_with("authors", author, DeletePolicy::Cascade)
        .expect("cascade");

    assert_eq!(
        report.deleted,
        vec![
            Marker::new("authors", author),
            Marker::new("books", book),
            Marker::new("reviews", review),
        ]
    );
    assert!(db.find("authors", author).expect("find").is_none());
    assert!(db.find("books", book).expect("find").is_none());
    assert!(db.find("reviews", review).expect("find").is_none());
    assert!(db.find("books", other).expect("find").is_some());
}

#[test]
fn transactional_cascade_commits() {
    let db = common::open_with(DbConfig {
        transactional_deletes: true,
        default_delete_policy: DeletePolicy::Cascade,
        ..DbConfig::default()
    });
    let tag = db.insert("tags", &json!({})).expect("insert");
    let post = db
        .insert("posts", &json!({"tags": [marker("tags", tag)]}))
        .expect("insert");

    let report = db.delete("tags", tag).expect("cascade");

    assert_eq!(report.deleted.len(), 2);
    assert!(db.find("posts", post).expect("find").is_none());
}

#[test]
fn referrers_lists_every_path() {
    let db = common::open();
    let tag = db.insert("tags", &json!({})).expect("insert");
    let post = db
        .insert(
            "posts",
            &json!({"tags": [marker("tags", tag)], "meta": {"pinned": marker("tags", tag)}}),
        )
        .expect("insert");

    let referrers = db.referrers("tags", tag).expect("referrers");

    assert_eq!(referrers.len(), 1);
    assert_eq!(referrers[0].id, post);
    assert_eq!(referrers[0].paths.len(), 2);
}

// ----------------------------------------------------------------------
// Reference validation
// ----------------------------------------------------------------------

#[test]
fn validate_references_classifies_each_marker() {
    let db = common::open();
    let tag = db.insert("tags", &json!({})).expect("insert");
    let post = db
        .insert(
            "posts",
            &json!({"tags": [marker("tags", tag), marker("tags", tag + 50)], "ext": marker("elsewhere", 1)}),
        )
        .expect("insert");

    let statuses = db.validate_references("posts", post).expect("validate");
    let states: Vec<ReferenceState> = statuses.iter().map(|s| s.state).collect();

    assert_eq!(statuses.len(), 3);
    assert!(states.contains(&ReferenceState::Present));
    assert!(states.contains(&ReferenceState::Missing));
    assert!(states.contains(&ReferenceState::UnregisteredTable));
    assert_eq!(statuses.iter().filter(|s| s.is_broken()).count(), 2);

    assert!(
        db.validate_references("posts", post + 1)
            .expect_err("missing row")
            .is_not_found()
    );
}
