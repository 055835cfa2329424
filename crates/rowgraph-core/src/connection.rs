//! Storage boundary and schema provider traits.

use crate::Result;
use crate::field::{FieldDef, IndexDef};
use crate::relationship::RelationDef;
use crate::row::Row;
use crate::value::Value;

/// A storage backend capable of executing statements.
///
/// All calls are synchronous and blocking. The session opens exactly one
/// transaction per commit; implementations must refuse a nested `begin`.
///
/// Statements use `$n` positional placeholders and double-quoted identifiers:
///
/// ```text
/// INSERT INTO "user" ("username", "password") VALUES ($1, $2)
/// UPDATE "user" SET "password" = $1 WHERE "id" = $2
/// DELETE FROM "user" WHERE "id" = $1
/// SELECT * FROM "user" WHERE "username" = $1 AND "password" IS NULL
/// ```
pub trait Connection {
    /// Begin a transaction.
    fn begin_transaction(&mut self) -> Result<()>;

    /// Commit the open transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction.
    fn rollback(&mut self) -> Result<()>;

    /// Whether a transaction is currently open.
    fn in_transaction(&self) -> bool;

    /// Execute a statement (INSERT, UPDATE, DELETE) and return rows affected.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a query and return all rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Identifier generated by the last INSERT into `table`.
    fn last_insert_id(&mut self, table: &str) -> Result<Value>;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn begin_transaction(&mut self) -> Result<()> {
        (**self).begin_transaction()
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<()> {
        (**self).rollback()
    }

    fn in_transaction(&self) -> bool {
        (**self).in_transaction()
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        (**self).execute(sql, params)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        (**self).query(sql, params)
    }

    fn last_insert_id(&mut self, table: &str) -> Result<Value> {
        (**self).last_insert_id(table)
    }
}

/// Source of table metadata.
///
/// Field and index lists are returned in declaration order; the order of
/// fields is the order values are written in INSERT statements.
pub trait SchemaProvider {
    /// Names of all tables, in declaration order.
    fn table_names(&self) -> Vec<String>;

    /// Field definitions of `table`.
    fn fields(&self, table: &str) -> Result<Vec<FieldDef>>;

    /// Relations in which `table` is the owning or the referenced side.
    fn relations(&self, table: &str) -> Result<Vec<RelationDef>>;

    /// Index definitions of `table`.
    fn indexes(&self, table: &str) -> Result<Vec<IndexDef>>;
}
