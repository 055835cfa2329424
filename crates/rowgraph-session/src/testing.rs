//! Test support: a recording connection and the reference schema.

use std::collections::{HashMap, VecDeque};

use rowgraph_core::{
    Connection, Error, FieldDef, FieldType, IndexDef, ReferentialAction, RelationDef, Result, Row,
    StorageError, StorageErrorKind, TransactionError, TransactionErrorKind, Value,
};
use rowgraph_schema::Schema;

/// Connection that records statements and answers queries from a queue.
#[derive(Debug, Default)]
pub(crate) struct MockConnection {
    pub statements: Vec<(String, Vec<Value>)>,
    pub query_results: VecDeque<Vec<Row>>,
    pub fail_on: Option<String>,
    pub commits: usize,
    pub rollbacks: usize,
    in_transaction: bool,
    next_ids: HashMap<String, i64>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> Vec<&str> {
        self.statements.iter().map(|(sql, _)| sql.as_str()).collect()
    }

    fn check(&self, sql: &str) -> Result<()> {
        match &self.fail_on {
            Some(pattern) if sql.contains(pattern.as_str()) => Err(Error::Storage(
                StorageError::new(StorageErrorKind::Injected, "injected failure")
                    .with_statement(sql),
            )),
            _ => Ok(()),
        }
    }
}

impl Connection for MockConnection {
    fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NestedNotSupported,
                message: "already in a transaction".to_string(),
            }));
        }
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.in_transaction = false;
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.in_transaction = false;
        self.rollbacks += 1;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.check(sql)?;
        self.statements.push((sql.to_string(), params.to_vec()));
        Ok(1)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.check(sql)?;
        self.statements.push((sql.to_string(), params.to_vec()));
        Ok(self.query_results.pop_front().unwrap_or_default())
    }

    fn last_insert_id(&mut self, table: &str) -> Result<Value> {
        let next = self.next_ids.entry(table.to_string()).or_insert(0);
        *next += 1;
        Ok(Value::Int(*next))
    }
}

fn id() -> FieldDef {
    FieldDef::new("id", FieldType::Integer)
        .length(10)
        .unsigned()
        .primary()
        .auto_increment()
}

fn int(name: &str) -> FieldDef {
    FieldDef::new(name, FieldType::Integer).length(10).unsigned()
}

fn string(name: &str, length: u32) -> FieldDef {
    FieldDef::new(name, FieldType::String).length(length)
}

/// The user / author / article / comment / tag schema used across tests.
pub(crate) fn fixture_schema() -> Schema {
    Schema::builder()
        .table(
            "author",
            vec![
                id(),
                string("firstname", 64).nullable(),
                string("lastname", 64),
                string("email", 255).nullable(),
                int("user_id").foreign("user.id").nullable(),
                int("editor_id").foreign("author.id").nullable(),
            ],
            vec![IndexDef::unique("UQ_user_id", ["user_id"])],
        )
        .table(
            "user",
            vec![id(), string("username", 64), string("password", 32).nullable()],
            vec![IndexDef::unique("UNIQUE", ["username"])],
        )
        .table(
            "article",
            vec![
                id(),
                int("author_id").foreign("author.id").nullable(),
                FieldDef::new("is_published", FieldType::Integer)
                    .length(1)
                    .unsigned()
                    .default_value(0),
                string("title", 64).nullable(),
                FieldDef::new("created_on", FieldType::Datetime).nullable(),
                FieldDef::new("changed_on", FieldType::Datetime).nullable(),
            ],
            vec![],
        )
        .table(
            "comment",
            vec![
                id(),
                int("article_id").foreign("article.id").nullable(),
                string("text", 2000).nullable(),
            ],
            vec![],
        )
        .table("tag", vec![id(), string("name", 64)], vec![])
        .table(
            "article2tag",
            vec![
                int("article_id").primary().foreign("article.id"),
                int("tag_id").primary().foreign("tag.id"),
            ],
            vec![],
        )
        .relation(
            RelationDef::new("article", "author_id", "author", "id")
                .aliases("Article", "Author")
                .on_delete(ReferentialAction::Restrict)
                .on_update(ReferentialAction::Cascade),
        )
        .relation(
            RelationDef::new("author", "user_id", "user", "id")
                .aliases("Author", "User")
                .one_to_one()
                .on_delete(ReferentialAction::Cascade)
                .on_update(ReferentialAction::Cascade),
        )
        .relation(
            RelationDef::new("author", "editor_id", "author", "id")
                .aliases("Author", "Editor")
                .on_delete(ReferentialAction::SetNull)
                .on_update(ReferentialAction::Cascade),
        )
        .relation(
            RelationDef::new("comment", "article_id", "article", "id")
                .aliases("Comment", "Article")
                .on_delete(ReferentialAction::Cascade)
                .on_update(ReferentialAction::Cascade),
        )
        .relation(
            RelationDef::new("article2tag", "article_id", "article", "id")
                .aliases("Article2tagHasMany", "Article")
                .on_delete(ReferentialAction::Cascade)
                .on_update(ReferentialAction::Cascade),
        )
        .relation(
            RelationDef::new("article2tag", "tag_id", "tag", "id")
                .aliases("Article2tagHasMany", "Tag")
                .on_delete(ReferentialAction::Cascade)
                .on_update(ReferentialAction::Cascade),
        )
        .build()
        .expect("fixture schema is valid")
}

/// A row as returned by `SELECT *`.
pub(crate) fn row(values: &[(&str, Value)]) -> Row {
    Row::new(
        values.iter().map(|(name, _)| (*name).to_string()).collect(),
        values.iter().map(|(_, value)| value.clone()).collect(),
    )
}
