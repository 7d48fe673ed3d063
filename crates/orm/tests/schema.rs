//! Schema introspection through the shared cache.

#![cfg(feature = "sqlite")]
#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use common::fixture;
use futures::future::join_all;
use omnia_orm::{Connection, Error, Record, model};

model! {
    table = "ghosts",
    pub struct Ghost;
}

// only opened by the concurrency test, so its schema starts uncached
model! {
    table = "post_tag",
    pub struct PostTag;
}

#[tokio::test]
async fn missing_tables_are_schema_errors() {
    let db = fixture().await;
    let conn: Arc<dyn Connection> = Arc::clone(&db) as Arc<dyn Connection>;

    let err = Record::invoke::<Ghost>(Arc::clone(&conn)).await.expect_err("no table");
    assert!(Error::is(&err, |kind| matches!(kind, Error::Schema(_))));
    assert!(format!("{err:#}").contains("ghosts"));

    // a failed load is not cached
    let err = Record::invoke::<Ghost>(conn).await.expect_err("still no table");
    assert!(Error::is(&err, |kind| matches!(kind, Error::Schema(_))));
    assert_eq!(db.describes(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_loads_introspect_once() {
    let db = fixture().await;

    let opens = (0..8).map(|_| {
        let conn: Arc<dyn Connection> = Arc::clone(&db) as Arc<dyn Connection>;
        Record::invoke::<PostTag>(conn)
    });
    let records = join_all(opens).await;

    assert_eq!(db.describes(), 1);
    let first = records[0].as_ref().expect("open record").schema();
    for record in &records {
        let schema = record.as_ref().expect("open record").schema();
        assert!(std::ptr::eq(first, schema));
        assert!(schema.has_column("post_id"));
    }
}
