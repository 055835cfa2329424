#![allow(dead_code)]

use rowgraph::{MemoryConnection, Oid, Schema, Session, SessionConfig, Value};

pub fn schema() -> Schema {
    rowgraph::load_schema(include_str!("../fixtures/schema.json")).expect("fixture schema is valid")
}

pub fn session() -> Session<MemoryConnection> {
    rowgraph::memory_session(&schema()).expect("open memory session")
}

pub fn session_with(config: SessionConfig) -> Session<MemoryConnection> {
    rowgraph::memory_session_with(&schema(), config).expect("open memory session")
}

/// Statements that changed data, in execution order.
pub fn writes(session: &Session<MemoryConnection>) -> Vec<String> {
    session
        .connection()
        .executed()
        .into_iter()
        .filter(|sql| !sql.starts_with("SELECT"))
        .map(str::to_string)
        .collect()
}

pub fn column(session: &Session<MemoryConnection>, table: &str, row: usize, name: &str) -> Value {
    let rows = session.connection().rows(table).expect("table exists");
    rows[row].get_by_name(name).cloned().unwrap_or_default()
}

pub fn new_user(session: &mut Session<MemoryConnection>, username: &str) -> Oid {
    session
        .create_record("user", [("username", username), ("password", "secret")])
        .expect("create user")
}

/// New author owned by `user`.
pub fn new_author(session: &mut Session<MemoryConnection>, user: Oid, lastname: &str) -> Oid {
    let author = session
        .create_record(
            "author",
            [
                ("firstname", "Jane"),
                ("lastname", lastname),
                ("email", "jane@example.com"),
            ],
        )
        .expect("create author");
    session.link(author, "User", Some(user)).expect("link user");
    author
}

pub fn new_article(session: &mut Session<MemoryConnection>, author: Oid, title: &str) -> Oid {
    let article = session
        .create_record(
            "article",
            [("title", title), ("teaser", "teaser"), ("text", "text")],
        )
        .expect("create article");
    session.link(article, "Author", Some(author)).expect("link author");
    article
}

pub fn seed_user(conn: &mut MemoryConnection, id: i64, username: &str) {
    conn.seed(
        "user",
        [
            ("id", Value::Int(id)),
            ("username", Value::from(username)),
            ("password", Value::from("secret")),
        ],
    )
    .expect("seed user");
}

pub fn seed_author(conn: &mut MemoryConnection, id: i64, user_id: i64, editor_id: Option<i64>) {
    conn.seed(
        "author",
        [
            ("id", Value::Int(id)),
            ("firstname", Value::from("Author")),
            ("lastname", Value::from(format!("No. {id}"))),
            ("email", Value::from("author@example.com")),
            ("user_id", Value::Int(user_id)),
            ("editor_id", editor_id.map_or(Value::Null, Value::Int)),
        ],
    )
    .expect("seed author");
}

pub fn seed_article(conn: &mut MemoryConnection, id: i64, author_id: i64) {
    conn.seed(
        "article",
        [
            ("id", Value::Int(id)),
            ("author_id", Value::Int(author_id)),
            ("title", Value::from(format!("Article {id}"))),
            ("teaser", Value::from("teaser")),
            ("text", Value::from("text")),
        ],
    )
    .expect("seed article");
}

pub fn seed_comment(conn: &mut MemoryConnection, id: i64, user_id: i64, article_id: i64) {
    conn.seed(
        "comment",
        [
            ("id", Value::Int(id)),
            ("user_id", Value::Int(user_id)),
            ("article_id", Value::Int(article_id)),
            ("title", Value::from("Re")),
            ("text", Value::from("comment")),
            ("datetime", Value::from("2013-01-01 12:00:00")),
        ],
    )
    .expect("seed comment");
}

pub fn find(session: &mut Session<MemoryConnection>, table: &str, id: i64) -> Oid {
    session
        .find_by_pk(table, &[Value::Int(id)])
        .expect("query")
        .expect("row exists")
}
