//! Common test helpers shared across integration tests.
#![cfg(feature = "sqlite")]
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};

use omnia_orm::{
    Columns, Connection, DataType, Definition, Executed, FutureResult, Model, Record, Row, Sqlite,
    TableSchema, Timestamps, Value, belongs_to, belongs_to_many, has_many, has_one, model,
};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

pub const SCHEMA: &str = "
    CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        name TEXT,
        age INTEGER,
        email TEXT UNIQUE
    );
    CREATE TABLE profiles (
        id INTEGER PRIMARY KEY,
        user_id INTEGER REFERENCES users(id),
        bio TEXT
    );
    CREATE TABLE posts (
        id INTEGER PRIMARY KEY,
        user_id INTEGER REFERENCES users(id),
        title TEXT
    );
    CREATE TABLE tags (id INTEGER PRIMARY KEY, label TEXT);
    CREATE TABLE post_tag (post_id INTEGER, tag_id INTEGER);
    CREATE TABLE notes (
        id INTEGER PRIMARY KEY,
        body TEXT,
        create_time INTEGER,
        update_time INTEGER
    );
    CREATE TABLE logs (message TEXT);
    CREATE TABLE scratch (id INTEGER PRIMARY KEY);
";

// Models

pub struct User;

impl Model for User {
    const TABLE: &'static str = "users";

    fn define(def: &mut Definition) {
        def.accessor("summary", |_, columns| {
            let name = columns.get("name").and_then(Value::as_str).unwrap_or("?");
            let age = columns.get("age").and_then(Value::as_i64).unwrap_or(0);
            Value::from(format!("{name} ({age})"))
        })
        .mutator("email", |value, _| match value.as_str() {
            Some(email) => Value::from(email.trim().to_lowercase()),
            None => value,
        })
        .relation("posts", has_many::<Post>().foreign_key("user_id"))
        .relation("profile", has_one::<Profile>().foreign_key("user_id"))
        .relation(
            "recent_posts",
            has_many::<Post>().condition(|user, select| {
                select.r#where(omnia_orm::Filter::eq("user_id", user.value("id"))).order_by_desc("id")
            }),
        );
    }
}

pub struct Profile;

impl Model for Profile {
    const TABLE: &'static str = "profiles";

    fn define(def: &mut Definition) {
        // join key discovered from the REFERENCES clause
        def.relation("user", belongs_to::<User>());
    }
}

pub struct Post;

impl Model for Post {
    const TABLE: &'static str = "posts";

    fn define(def: &mut Definition) {
        def.relation("author", belongs_to::<User>().join_key("user_id"))
            .relation("tags", belongs_to_many::<Tag>("post_tag").local_key("post_id").child_key("tag_id"));
    }
}

model! {
    table = "tags",
    pub struct Tag;
}

/// Insert and update events seen by the [`Note`] hooks: body and success.
pub static NOTE_EVENTS: LazyLock<Mutex<Vec<(String, bool)>>> = LazyLock::new(Mutex::default);

pub struct Note;

impl Model for Note {
    const TABLE: &'static str = "notes";
    const TIMESTAMPS: Timestamps = Timestamps::Int;

    fn before_insert(record: &Record) -> bool {
        record.value("body") != Value::from("veto")
    }

    fn after_insert(record: &Record, success: bool) {
        let body = record.value("body").as_str().unwrap_or_default().to_owned();
        NOTE_EVENTS.lock().push((body, success));
    }

    fn before_update(record: &Record) -> bool {
        record.value("body") != Value::from("frozen")
    }
}

model! {
    table = "logs",
    pub struct Log;
}

model! {
    table = "logs",
    connection = "audit",
    pub struct Audit;
}

model! {
    table = "scratch",
    pub struct Scratch;
}

// Database

/// In-memory `SQLite` database that counts the statements it runs.
///
/// Schema introspection is not counted as a statement; [`Counting::describes`]
/// tracks it separately.
#[derive(Debug)]
pub struct Counting {
    inner: Sqlite,
    statements: AtomicUsize,
    describes: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl Counting {
    /// Statements run since the last [`Counting::reset`].
    pub fn count(&self) -> usize {
        self.statements.load(Ordering::SeqCst)
    }

    /// SQL of the statements run since the last [`Counting::reset`].
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Tables introspected since the database was opened.
    pub fn describes(&self) -> usize {
        self.describes.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.statements.store(0, Ordering::SeqCst);
        self.log.lock().clear();
    }

    /// Runs setup SQL without counting it.
    pub fn seed(&self, sql: &str) {
        self.inner.execute_batch(sql).expect("seed");
    }

    fn record(&self, sql: &str) {
        self.statements.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(sql.to_owned());
    }
}

impl Connection for Counting {
    fn query(&self, query: String, params: Vec<DataType>) -> FutureResult<Vec<Row>> {
        self.record(&query);
        self.inner.query(query, params)
    }

    fn exec(&self, query: String, params: Vec<DataType>) -> FutureResult<Executed> {
        self.record(&query);
        self.inner.exec(query, params)
    }

    fn begin(&self) -> FutureResult<()> {
        self.inner.begin()
    }

    fn commit(&self) -> FutureResult<()> {
        self.inner.commit()
    }

    fn rollback(&self) -> FutureResult<()> {
        self.inner.rollback()
    }

    fn database(&self) -> String {
        self.inner.database()
    }

    fn describe(&self, table: String) -> FutureResult<Option<TableSchema>> {
        self.describes.fetch_add(1, Ordering::SeqCst);
        self.inner.describe(table)
    }

    fn foreign_keys(&self, table: String, referenced: String) -> FutureResult<Vec<String>> {
        self.inner.foreign_keys(table, referenced)
    }
}

/// A fresh database with [`SCHEMA`] applied.
pub async fn fixture() -> Arc<Counting> {
    init_tracing();
    let inner = Sqlite::memory().await.expect("open database");
    inner.execute_batch(SCHEMA).expect("apply schema");
    Arc::new(Counting {
        inner,
        statements: AtomicUsize::new(0),
        describes: AtomicUsize::new(0),
        log: Mutex::new(Vec::new()),
    })
}

/// A record of `M` bound to `db`.
pub async fn open<M: Model>(db: &Arc<Counting>) -> Record {
    let conn: Arc<dyn Connection> = Arc::clone(db) as Arc<dyn Connection>;
    Record::invoke::<M>(conn).await.expect("open record")
}

/// Inserts `count` users named `user{n}`, each with `posts` posts.
pub fn seed_users(db: &Counting, count: usize, posts: usize) {
    let mut sql = String::new();
    for id in 1..=count {
        sql.push_str(&format!("INSERT INTO users (id, name, age) VALUES ({id}, 'user{id}', {id});"));
        for n in 0..posts {
            sql.push_str(&format!("INSERT INTO posts (user_id, title) VALUES ({id}, 'post{id}-{n}');"));
        }
    }
    if !sql.is_empty() {
        db.seed(&sql);
    }
}

/// Builds a column map.
pub fn columns<const N: usize>(entries: [(&str, Value); N]) -> Columns {
    entries.into_iter().map(|(name, value)| (name.to_owned(), value)).collect()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// SQL assertions

/// Collapses whitespace.
fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drops identifier quotes, keeping quotes inside string literals, and
/// normalizes whitespace.
fn canonicalize_sql(sql: &str) -> String {
    let mut cleaned = String::with_capacity(sql.len());
    let mut in_literal = false;

    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_literal = !in_literal;
                cleaned.push(ch);
            }
            '"' if !in_literal => {}
            _ => cleaned.push(ch),
        }
    }

    normalize_sql(&cleaned)
}

/// Asserts that `actual` contains every fragment, in order, ignoring
/// identifier quotes and whitespace differences.
#[allow(clippy::missing_panics_doc)]
pub fn assert_sql_contains(actual: &str, fragments: &[&str]) {
    let actual_canonical = canonicalize_sql(actual);
    let mut search_start = 0usize;

    for fragment in fragments {
        let fragment_canonical = canonicalize_sql(fragment);
        if fragment_canonical.is_empty() {
            continue;
        }

        match actual_canonical[search_start..].find(&fragment_canonical) {
            Some(pos) => search_start += pos + fragment_canonical.len(),
            None => panic!(
                "expected SQL fragment `{fragment_canonical}` not found in `{actual_canonical}`"
            ),
        }
    }
}
