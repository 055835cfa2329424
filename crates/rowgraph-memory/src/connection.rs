//! The [`Connection`] implementation.

use std::collections::HashMap;

use rowgraph_core::{
    Connection, Error, Result, Row, SchemaProvider, StorageError, StorageErrorKind,
    TransactionError, TransactionErrorKind, Value,
};

use crate::statement::{self, Condition, Statement};
use crate::store::{RowData, Store};

/// Configuration for a [`MemoryConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Check foreign keys and apply their update/delete actions.
    pub enforce_foreign_keys: bool,
    /// Keep every executed statement in the log.
    pub log_statements: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enforce_foreign_keys: true,
            log_statements: true,
        }
    }
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_foreign_keys(mut self, enforce: bool) -> Self {
        self.enforce_foreign_keys = enforce;
        self
    }

    #[must_use]
    pub fn with_statement_log(mut self, log: bool) -> Self {
        self.log_statements = log;
        self
    }
}

/// A statement the connection executed successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Makes matching statements fail.
#[derive(Debug, Clone)]
struct FailurePoint {
    pattern: String,
    /// Matching statements to let through before failing.
    skip: usize,
}

/// In-memory storage speaking the session's statement dialect.
///
/// Rows live in per-table vectors. `begin_transaction` snapshots the whole
/// store and `rollback` puts the snapshot back.
#[derive(Debug)]
pub struct MemoryConnection {
    config: MemoryConfig,
    store: Store,
    snapshot: Option<Store>,
    log: Vec<ExecutedStatement>,
    failures: Vec<FailurePoint>,
    last_insert_ids: HashMap<String, Value>,
    commits: usize,
    rollbacks: usize,
}

impl MemoryConnection {
    /// Create empty tables for every table of `schema`.
    pub fn new(schema: &dyn SchemaProvider) -> Result<Self> {
        Self::with_config(schema, MemoryConfig::default())
    }

    pub fn with_config(schema: &dyn SchemaProvider, config: MemoryConfig) -> Result<Self> {
        let mut store = Store::load(schema)?;
        store.enforce_foreign_keys = config.enforce_foreign_keys;
        tracing::debug!(tables = schema.table_names().len(), "memory store created");
        Ok(Self {
            config,
            store,
            snapshot: None,
            log: Vec::new(),
            failures: Vec::new(),
            last_insert_ids: HashMap::new(),
            commits: 0,
            rollbacks: 0,
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Insert a row directly, bypassing the statement log. Returns the
    /// generated identifier, if any.
    pub fn seed<I, K, V>(&mut self, table: &str, values: I) -> Result<Option<Value>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let row: RowData = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.store.insert(table, row)
    }

    /// Rows of `table` in insertion order, columns in declaration order.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        let data = self.store.table(table)?;
        let names: Vec<String> = data.fields.iter().map(|f| f.name.clone()).collect();
        Ok(data
            .rows
            .iter()
            .map(|row| {
                let values = names
                    .iter()
                    .map(|n| row.get(n).cloned().unwrap_or_default())
                    .collect();
                Row::new(names.clone(), values)
            })
            .collect())
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        Ok(self.store.table(table)?.rows.len())
    }

    pub fn statements(&self) -> &[ExecutedStatement] {
        &self.log
    }

    /// SQL text of every logged statement.
    pub fn executed(&self) -> Vec<&str> {
        self.log.iter().map(|s| s.sql.as_str()).collect()
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Fail every statement containing `pattern`.
    pub fn fail_on(&mut self, pattern: impl Into<String>) {
        self.fail_on_nth(pattern, 0);
    }

    /// Let `skip` statements containing `pattern` through, then fail.
    pub fn fail_on_nth(&mut self, pattern: impl Into<String>, skip: usize) {
        self.failures.push(FailurePoint {
            pattern: pattern.into(),
            skip,
        });
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks
    }

    fn check_failure(&mut self, sql: &str) -> Result<()> {
        for point in &mut self.failures {
            if !sql.contains(point.pattern.as_str()) {
                continue;
            }
            if point.skip > 0 {
                point.skip -= 1;
                continue;
            }
            tracing::debug!(sql = %sql, "injected failure");
            return Err(Error::Storage(
                StorageError::new(StorageErrorKind::Injected, "injected failure").with_statement(sql),
            ));
        }
        Ok(())
    }

    fn record(&mut self, sql: &str, params: &[Value]) {
        if self.config.log_statements {
            self.log.push(ExecutedStatement {
                sql: sql.to_string(),
                params: params.to_vec(),
            });
        }
    }

    fn bind_conditions(sql: &str, params: &[Value], conditions: &[Condition]) -> Result<Vec<(String, Value)>> {
        conditions
            .iter()
            .map(|c| {
                let value = match c.param {
                    Some(n) => statement::bind(sql, params, n)?.clone(),
                    None => Value::Null,
                };
                Ok((c.column.clone(), value))
            })
            .collect()
    }

    fn run(&mut self, sql: &str, params: &[Value], stmt: Statement) -> Result<u64> {
        match stmt {
            Statement::Insert {
                table,
                columns,
                params: indexes,
            } => {
                let mut row = RowData::new();
                for (column, n) in columns.into_iter().zip(indexes) {
                    row.insert(column, statement::bind(sql, params, n)?.clone());
                }
                let generated = self.store.insert(&table, row)?;
                if let Some(id) = generated {
                    self.last_insert_ids.insert(table, id);
                }
                Ok(1)
            }
            Statement::Update {
                table,
                assignments,
                conditions,
            } => {
                let conditions = Self::bind_conditions(sql, params, &conditions)?;
                let mut changes = RowData::new();
                for (column, n) in assignments {
                    changes.insert(column, statement::bind(sql, params, n)?.clone());
                }
                let matched = self.store.matching(&table, &conditions)?;
                self.store.update(&table, &matched, &changes)?;
                Ok(matched.len() as u64)
            }
            Statement::Delete { table, conditions } => {
                let conditions = Self::bind_conditions(sql, params, &conditions)?;
                let matched = self.store.matching(&table, &conditions)?;
                self.store.delete(&table, &matched)?;
                Ok(matched.len() as u64)
            }
            Statement::Select { .. } => Err(Error::Storage(
                StorageError::new(StorageErrorKind::Statement, "use query() for SELECT")
                    .with_statement(sql),
            )),
        }
    }

    /// Run a statement outside a transaction as its own unit.
    fn autocommit<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.snapshot.is_some() {
            return f(self);
        }
        let before = self.store.clone();
        f(self).inspect_err(|_| {
            self.store = before;
        })
    }
}

fn with_statement(err: Error, sql: &str) -> Error {
    match err {
        Error::Storage(e) if e.statement.is_none() => Error::Storage(e.with_statement(sql)),
        other => other,
    }
}

impl Connection for MemoryConnection {
    fn begin_transaction(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NestedNotSupported,
                message: "a transaction is already open".to_string(),
            }));
        }
        self.snapshot = Some(self.store.clone());
        tracing::trace!("begin");
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.snapshot.take().is_none() {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NotActive,
                message: "commit without an open transaction".to_string(),
            }));
        }
        self.commits += 1;
        tracing::trace!("commit");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let Some(snapshot) = self.snapshot.take() else {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NotActive,
                message: "rollback without an open transaction".to_string(),
            }));
        };
        self.store = snapshot;
        self.rollbacks += 1;
        tracing::debug!("rolled back");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    #[tracing::instrument(level = "debug", skip(self, params))]
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.check_failure(sql)?;
        let stmt = statement::parse(sql)?;
        let affected = self
            .autocommit(|conn| conn.run(sql, params, stmt))
            .map_err(|e| with_statement(e, sql))?;
        self.record(sql, params);
        tracing::trace!(affected, "executed");
        Ok(affected)
    }

    #[tracing::instrument(level = "debug", skip(self, params))]
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.check_failure(sql)?;
        let Statement::Select {
            table,
            count,
            conditions,
        } = statement::parse(sql)?
        else {
            return Err(Error::Storage(
                StorageError::new(StorageErrorKind::Statement, "query() only runs SELECT")
                    .with_statement(sql),
            ));
        };
        let conditions = Self::bind_conditions(sql, params, &conditions)?;
        let matched = self
            .store
            .matching(&table, &conditions)
            .map_err(|e| with_statement(e, sql))?;
        self.record(sql, params);

        if count {
            return Ok(vec![Row::new(
                vec!["COUNT(*)".to_string()],
                vec![Value::Int(i64::try_from(matched.len()).unwrap_or(i64::MAX))],
            )]);
        }
        let all = self.rows(&table)?;
        Ok(matched.into_iter().filter_map(|i| all.get(i).cloned()).collect())
    }

    fn last_insert_id(&mut self, table: &str) -> Result<Value> {
        self.last_insert_ids.get(table).cloned().ok_or_else(|| {
            Error::Storage(StorageError::new(
                StorageErrorKind::Statement,
                format!("no identifier was generated for {table}"),
            ))
        })
    }
}
