//! Attribute pipeline: formatting, mutators, accessors, routing and diffs.

#![cfg(feature = "sqlite")]
#![allow(missing_docs)]

mod common;

use common::{User, fixture, open};
use omnia_orm::{Attribute, Status, Value};

#[tokio::test]
async fn formats_values_for_the_column_type() {
    let db = fixture().await;
    let mut user = open::<User>(&db).await;

    assert!(user.set("age", "42").expect("numeric text"));
    assert_eq!(user.value("age"), Value::Int(42));

    user.set("age", 7.9).expect("float");
    assert_eq!(user.value("age"), Value::Int(7));

    let err = user.set("age", "forty").expect_err("not a number");
    assert!(format!("{err:#}").contains("age"));
    assert_eq!(user.value("age"), Value::Int(7));
}

#[tokio::test]
async fn routes_unknown_names_to_joined_data() {
    let db = fixture().await;
    let mut user = open::<User>(&db).await;

    let stored = user.set("nickname", "annie").expect("set");
    assert!(!stored);
    assert!(user.has("nickname"));
    assert!(!user.data().contains_key("nickname"));
    assert_eq!(user.value("nickname"), Value::from("annie"));

    user.unset("nickname");
    assert!(!user.has("nickname"));
    assert_eq!(user.value("nickname"), Value::Null);
}

#[tokio::test]
async fn applies_mutators_on_write() {
    let db = fixture().await;
    let mut user = open::<User>(&db).await;

    user.set("email", "  Ann@Example.COM ").expect("set");
    assert_eq!(user.value("email"), Value::from("ann@example.com"));

    user.set_with("email", "Raw@Example.com", false).expect("set without mutator");
    assert_eq!(user.value("email"), Value::from("Raw@Example.com"));
}

#[tokio::test]
async fn accessors_see_the_full_column_map() {
    let db = fixture().await;
    let mut user = open::<User>(&db).await;
    user.with_data([("name", Value::from("Ann")), ("age", Value::from(5))]).expect("data");

    assert_eq!(user.value("summary"), Value::from("Ann (5)"));
    let Attribute::Value(summary) = user.get("summary").await.expect("get") else {
        panic!("accessor should produce a value");
    };
    assert_eq!(summary, Value::from("Ann (5)"));

    // plain columns read back exactly what was formatted
    assert_eq!(user.get("age").await.expect("get").value(), Value::Int(5));
}

#[tokio::test]
async fn diff_tracks_changes_since_snapshot() {
    let db = fixture().await;
    let mut user = open::<User>(&db).await;
    user.with_data([("name", Value::from("Ann")), ("age", Value::from(5))]).expect("data");
    assert!(user.diff().is_empty());

    user.set("age", 5).expect("same value");
    assert!(user.diff().is_empty());

    user.set("age", 6).expect("new value");
    let diff = user.diff();
    assert_eq!(diff.len(), 1);
    assert_eq!(diff.get("age"), Some(&Value::Int(6)));

    user.snapshot();
    assert!(user.diff().is_empty());
}

#[tokio::test]
async fn increment_markers_are_always_in_the_diff() {
    let db = fixture().await;
    let mut user = open::<User>(&db).await;

    user.set("age", Value::inc(2)).expect("marker");
    user.snapshot();
    assert_eq!(user.diff().get("age"), Some(&Value::Increment(2)));

    user.set("age", Value::dec(1)).expect("marker");
    assert_eq!(user.diff().get("age"), Some(&Value::Increment(-1)));
}

#[tokio::test]
async fn loaded_records_become_dirty_on_change() {
    let db = fixture().await;
    db.seed("INSERT INTO users (id, name, age) VALUES (1, 'Ann', 5)");

    let mut users = open::<User>(&db).await;
    assert_eq!(users.status(), Status::New);

    let mut user = users.find(1).await.expect("find").expect("row");
    assert_eq!(user.status(), Status::Loaded);

    user.set("name", "Ann").expect("unchanged");
    assert_eq!(user.status(), Status::Loaded);

    user.set("name", "Bea").expect("changed");
    assert_eq!(user.status(), Status::Dirty);
}

#[tokio::test]
async fn serializes_columns_and_joined_data() {
    let db = fixture().await;
    let mut user = open::<User>(&db).await;
    user.with_data([("name", Value::from("Ann")), ("age", Value::from(5))]).expect("data");
    user.set("nickname", "annie").expect("joined");

    let json: serde_json::Value = serde_json::from_str(&user.to_json().expect("json")).expect("parse");
    assert_eq!(json["name"], "Ann");
    assert_eq!(json["age"], 5);
    assert_eq!(json["nickname"], "annie");

    user.set("email", Value::Null).expect("null");
    assert!(user.to_map(true).get("email").is_none());
    assert!(user.to_map(false).get("email").is_some());
}
