//! Relation resolution, single-record and batched.

#![cfg(feature = "sqlite")]
#![allow(missing_docs)]

mod common;

use common::{Post, Profile, User, assert_sql_contains, fixture, open, seed_users};
use omnia_orm::{Attribute, Definition, Error, Model, Record, Value, belongs_to};

/// Tags claiming an owner without any foreign key to find it by.
struct Orphan;

impl Model for Orphan {
    const TABLE: &'static str = "tags";

    fn define(def: &mut Definition) {
        def.relation("owner", belongs_to::<User>());
    }
}

fn ids(records: &[Record]) -> Vec<Value> {
    records.iter().map(|record| record.value("id")).collect()
}

fn titles(records: &[Record]) -> Vec<Value> {
    records.iter().map(|record| record.value("title")).collect()
}

#[tokio::test]
async fn batches_has_many_into_one_statement() {
    let db = fixture().await;
    db.seed(
        "INSERT INTO users (id, name) VALUES (1, 'a'), (2, 'b');
         INSERT INTO posts (id, user_id, title) VALUES (1, 1, 'p1'), (2, 1, 'p2'), (3, 2, 'p3');",
    );

    let mut users = open::<User>(&db).await;
    let loaded = users.order_by("id").with(["posts"]).all().await.expect("all");
    assert_eq!(db.count(), 2);

    let first = loaded[0].loaded("posts").expect("posts").many();
    assert_eq!(titles(first), vec![Value::from("p1"), Value::from("p2")]);
    let second = loaded[1].loaded("posts").expect("posts").many();
    assert_eq!(titles(second), vec![Value::from("p3")]);

    let statements = db.statements();
    assert_sql_contains(&statements[1], &["FROM posts", "WHERE", "user_id", "IN"]);
    assert_eq!(statements[1].matches('$').count(), 2);
}

#[tokio::test]
async fn repeated_relation_names_load_once() {
    let db = fixture().await;
    seed_users(&db, 3, 2);

    let mut users = open::<User>(&db).await;
    let loaded = users.with(["posts", "posts"]).with(["posts"]).all().await.expect("all");
    assert_eq!(db.count(), 2);
    assert!(loaded.iter().all(|user| user.loaded("posts").expect("posts").many().len() == 2));
}

#[tokio::test]
async fn batch_cost_does_not_grow_with_the_parent_count() {
    let db = fixture().await;
    seed_users(&db, 50, 2);

    let mut users = open::<User>(&db).await;
    let loaded = users.with(["posts"]).all().await.expect("all");
    assert_eq!(loaded.len(), 50);
    assert_eq!(db.count(), 2);
    assert!(loaded.iter().all(|user| user.loaded("posts").expect("posts").many().len() == 2));
    let user7 = loaded.iter().find(|user| user.value("id") == Value::Int(7)).expect("user 7");
    assert_eq!(
        titles(user7.loaded("posts").expect("posts").many()),
        vec![Value::from("post7-0"), Value::from("post7-1")]
    );
}

#[tokio::test]
async fn no_parents_means_no_relation_statement() {
    let db = fixture().await;

    let mut users = open::<User>(&db).await;
    let loaded = users.with(["posts", "profile"]).all().await.expect("all");
    assert!(loaded.is_empty());
    assert_eq!(db.count(), 1);
}

#[tokio::test]
async fn parents_without_children_get_empty_values() {
    let db = fixture().await;
    seed_users(&db, 2, 0);
    db.seed("INSERT INTO posts (user_id, title) VALUES (2, 'only')");

    let mut users = open::<User>(&db).await;
    let loaded = users.order_by("id").with(["posts", "profile"]).all().await.expect("all");
    assert_eq!(db.count(), 3);
    assert!(loaded[0].loaded("posts").expect("posts").many().is_empty());
    assert_eq!(loaded[1].loaded("posts").expect("posts").many().len(), 1);
    assert!(loaded.iter().all(|user| user.loaded("profile").expect("profile").one().is_none()));
}

#[tokio::test]
async fn has_one_keeps_the_first_match() {
    let db = fixture().await;
    seed_users(&db, 1, 0);
    db.seed("INSERT INTO profiles (id, user_id, bio) VALUES (1, 1, 'first'), (2, 1, 'second')");

    let mut users = open::<User>(&db).await;
    let loaded = users.with(["profile"]).all().await.expect("all");
    let profile = loaded[0].loaded("profile").expect("profile").one().expect("some profile");
    assert_eq!(profile.value("bio"), Value::from("first"));

    let mut users = open::<User>(&db).await;
    let mut user = users.find(1).await.expect("find").expect("row");
    let attr = user.relation("profile").await.expect("profile");
    assert_eq!(attr.one().expect("some profile").value("bio"), Value::from("first"));
}

#[tokio::test]
async fn single_record_relations_are_memoized() {
    let db = fixture().await;
    seed_users(&db, 1, 3);

    let mut users = open::<User>(&db).await;
    let mut user = users.find(1).await.expect("find").expect("row");
    db.reset();

    let posts = user.relation("posts").await.expect("posts");
    assert_eq!(posts.many().len(), 3);
    assert_eq!(db.count(), 1);
    assert_sql_contains(&db.statements()[0], &["FROM posts AS __rel", "JOIN users AS __owner", "WHERE"]);

    // reading through get goes through the same memo
    let Attribute::Many(again) = user.get("posts").await.expect("get") else {
        panic!("posts should be a list");
    };
    assert_eq!(again.len(), 3);
    assert_eq!(db.count(), 1);
}

#[tokio::test]
async fn belongs_to_discovers_the_join_key() {
    let db = fixture().await;
    seed_users(&db, 2, 0);
    db.seed("INSERT INTO profiles (id, user_id, bio) VALUES (1, 2, 'b'), (2, 1, 'a'), (3, 2, 'c')");

    let mut profiles = open::<Profile>(&db).await;
    let loaded = profiles.order_by("id").with(["user"]).all().await.expect("all");
    // foreign-key metadata is not a statement
    assert_eq!(db.count(), 2);
    let owners: Vec<Value> = loaded
        .iter()
        .map(|profile| profile.loaded("user").and_then(Attribute::one).expect("user").value("id"))
        .collect();
    assert_eq!(owners, vec![Value::Int(2), Value::Int(1), Value::Int(2)]);
    // duplicate parent keys are sent once
    assert_eq!(db.statements()[1].matches('$').count(), 2);

    let mut profiles = open::<Profile>(&db).await;
    let mut profile = profiles.find(2).await.expect("find").expect("row");
    db.reset();
    let user = profile.relation("user").await.expect("user");
    assert_eq!(user.one().expect("owner").value("name"), Value::from("user1"));
    let _ = profile.relation("user").await.expect("memoized");
    assert_eq!(db.count(), 1);
}

#[tokio::test]
async fn belongs_to_with_a_declared_key_skips_null_keys() {
    let db = fixture().await;
    seed_users(&db, 1, 1);
    db.seed("INSERT INTO posts (id, user_id, title) VALUES (10, NULL, 'stray')");

    let mut posts = open::<Post>(&db).await;
    let loaded = posts.order_by("id").with(["author"]).all().await.expect("all");
    assert_eq!(db.count(), 2);
    assert_eq!(loaded[0].loaded("author").and_then(Attribute::one).expect("author").value("id"), Value::Int(1));
    assert!(loaded[1].loaded("author").expect("author").one().is_none());

    // memoized from the batch
    let mut first = loaded[0].clone();
    db.reset();
    let _ = first.relation("author").await.expect("author");
    assert_eq!(db.count(), 0);

    let mut posts = open::<Post>(&db).await;
    let mut stray = posts.find(10).await.expect("find").expect("row");
    assert!(stray.relation("author").await.expect("author").one().is_none());
}

#[tokio::test]
async fn belongs_to_many_goes_through_the_pivot() {
    let db = fixture().await;
    db.seed(
        "INSERT INTO posts (id, title) VALUES (1, 'a'), (2, 'b'), (3, 'c');
         INSERT INTO tags (id, label) VALUES (1, 'x'), (2, 'y'), (3, 'z');
         INSERT INTO post_tag (post_id, tag_id) VALUES (1, 1), (1, 2), (2, 2);",
    );

    let mut posts = open::<Post>(&db).await;
    let loaded = posts.order_by("id").with(["tags"]).all().await.expect("all");
    assert_eq!(db.count(), 2);
    assert_sql_contains(
        &db.statements()[1],
        &["FROM tags AS __rel", "JOIN post_tag", "tag_id", "WHERE", "post_id", "IN"],
    );

    let mut first = ids(loaded[0].loaded("tags").expect("tags").many());
    first.sort_by_key(|value| value.as_i64());
    assert_eq!(first, vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(ids(loaded[1].loaded("tags").expect("tags").many()), vec![Value::Int(2)]);
    assert!(loaded[2].loaded("tags").expect("tags").many().is_empty());
    // the grouping column is dropped
    assert!(!loaded[0].loaded("tags").expect("tags").many()[0].has("__parent_key"));

    let mut posts = open::<Post>(&db).await;
    let mut post = posts.find(2).await.expect("find").expect("row");
    let tags = post.relation("tags").await.expect("tags");
    assert_eq!(tags.many().len(), 1);
    assert_eq!(tags.many()[0].value("label"), Value::from("y"));
    assert!(!tags.many()[0].has("__parent_key"));
}

#[tokio::test]
async fn condition_closures_load_per_record() {
    let db = fixture().await;
    seed_users(&db, 2, 3);

    let mut users = open::<User>(&db).await;
    let loaded = users.order_by("id").with(["recent_posts"]).all().await.expect("all");
    assert_eq!(db.count(), 3);
    assert_eq!(
        titles(loaded[1].loaded("recent_posts").expect("recent_posts").many()),
        vec![Value::from("post2-2"), Value::from("post2-1"), Value::from("post2-0")]
    );
}

#[tokio::test]
async fn missing_foreign_key_resolves_to_nothing() {
    let db = fixture().await;
    seed_users(&db, 1, 0);
    db.seed("INSERT INTO tags (id, label) VALUES (1, 'x'), (2, 'y')");

    let mut orphans = open::<Orphan>(&db).await;
    let loaded = orphans.with(["owner"]).all().await.expect("all");
    assert_eq!(db.count(), 1);
    assert!(loaded.iter().all(|tag| tag.loaded("owner").expect("owner").one().is_none()));

    let mut orphans = open::<Orphan>(&db).await;
    let mut tag = orphans.find(1).await.expect("find").expect("row");
    assert!(tag.relation("owner").await.expect("owner").one().is_none());
}

#[tokio::test]
async fn unknown_relations_are_errors() {
    let db = fixture().await;
    seed_users(&db, 1, 0);

    let mut users = open::<User>(&db).await;
    let mut user = users.find(1).await.expect("find").expect("row");
    let err = user.relation("nope").await.expect_err("unknown");
    assert!(Error::is(&err, |kind| matches!(kind, Error::Relation(_))));

    let mut users = open::<User>(&db).await;
    let err = users.with(["nope"]).all().await.expect_err("unknown");
    assert!(Error::is(&err, |kind| matches!(kind, Error::Relation(_))));
}

#[tokio::test]
async fn get_one_loads_relations_on_its_record() {
    let db = fixture().await;
    seed_users(&db, 2, 2);

    let mut users = open::<User>(&db).await;
    let user = users.with(["posts"]).find(2).await.expect("find").expect("row");
    assert_eq!(db.count(), 2);
    assert_eq!(
        titles(user.loaded("posts").expect("posts").many()),
        vec![Value::from("post2-0"), Value::from("post2-1")]
    );
    assert!(users.state().is_empty());
}
