//! Parser for the statement subset the session emits.
//!
//! ```text
//! INSERT INTO "t" ("a", "b") VALUES ($1, $2)
//! UPDATE "t" SET "a" = $1, "b" = $2 WHERE "id" = $3
//! DELETE FROM "t" WHERE "id" = $1
//! SELECT * FROM "t" WHERE "a" = $1 AND "b" IS NULL
//! SELECT COUNT(*) FROM "t"
//! ```

use std::sync::OnceLock;

use regex::{Captures, Regex};
use rowgraph_core::{Error, Result, StorageError, StorageErrorKind, Value, unquote_ident};

/// `"column" = $n` or `"column" IS NULL`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub column: String,
    /// 1-based parameter index; `None` for `IS NULL`
    pub param: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Insert {
        table: String,
        columns: Vec<String>,
        params: Vec<usize>,
    },
    Update {
        table: String,
        assignments: Vec<(String, usize)>,
        conditions: Vec<Condition>,
    },
    Delete {
        table: String,
        conditions: Vec<Condition>,
    },
    Select {
        table: String,
        count: bool,
        conditions: Vec<Condition>,
    },
}

impl Statement {
    pub fn table(&self) -> &str {
        match self {
            Statement::Insert { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. }
            | Statement::Select { table, .. } => table,
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(self, Statement::Select { .. })
    }
}

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!(pattern = pattern, error = %e, "invalid statement pattern");
            None
        }
    })
    .as_ref()
}

fn captures<'s>(pattern: Option<&'static Regex>, text: &'s str) -> Option<Captures<'s>> {
    pattern.and_then(|regex| regex.captures(text))
}

fn insert_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(
        &CELL,
        r#"^INSERT INTO ("(?:[^"]|"")+") \((.*)\) VALUES \((.*)\)$"#,
    )
}

fn update_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, r#"^UPDATE ("(?:[^"]|"")+") SET (.+?) WHERE (.+)$"#)
}

fn delete_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, r#"^DELETE FROM ("(?:[^"]|"")+")(?: WHERE (.+))?$"#)
}

fn select_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(
        &CELL,
        r#"^SELECT (\*|COUNT\(\*\)) FROM ("(?:[^"]|"")+")(?: WHERE (.+))?$"#,
    )
}

fn identifier_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, r#""(?:[^"]|"")+""#)
}

fn placeholder_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, r"\$(\d+)")
}

fn condition_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, r#"^("(?:[^"]|"")+") (?:= \$(\d+)|(IS NULL))$"#)
}

fn assignment_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, r#"^("(?:[^"]|"")+") = \$(\d+)$"#)
}

fn unsupported(sql: &str, message: impl Into<String>) -> Error {
    Error::Storage(StorageError::new(StorageErrorKind::Statement, message).with_statement(sql))
}

fn identifier(sql: &str, quoted: &str) -> Result<String> {
    unquote_ident(quoted).ok_or_else(|| unsupported(sql, format!("expected quoted identifier, got {quoted}")))
}

fn index(sql: &str, digits: &str) -> Result<usize> {
    digits
        .parse()
        .map_err(|_| unsupported(sql, format!("invalid placeholder ${digits}")))
}

fn conditions(sql: &str, clause: Option<&str>) -> Result<Vec<Condition>> {
    let Some(clause) = clause else {
        return Ok(Vec::new());
    };
    clause
        .split(" AND ")
        .map(|part| {
            let caps = captures(condition_pattern(), part.trim())
                .ok_or_else(|| unsupported(sql, format!("unsupported condition '{part}'")))?;
            let column = identifier(sql, &caps[1])?;
            let param = match caps.get(2) {
                Some(digits) => Some(index(sql, digits.as_str())?),
                None => None,
            };
            Ok(Condition { column, param })
        })
        .collect()
}

/// Parse one statement.
pub fn parse(sql: &str) -> Result<Statement> {
    let sql_trimmed = sql.trim();

    if let Some(caps) = captures(insert_pattern(), sql_trimmed) {
        let columns = identifier_pattern()
            .into_iter()
            .flat_map(|regex| regex.find_iter(&caps[2]))
            .map(|m| identifier(sql, m.as_str()))
            .collect::<Result<Vec<_>>>()?;
        let params = placeholder_pattern()
            .into_iter()
            .flat_map(|regex| regex.captures_iter(&caps[3]))
            .map(|c| index(sql, &c[1]))
            .collect::<Result<Vec<_>>>()?;
        if columns.len() != params.len() {
            return Err(unsupported(sql, "column and value counts differ"));
        }
        return Ok(Statement::Insert {
            table: identifier(sql, &caps[1])?,
            columns,
            params,
        });
    }

    if let Some(caps) = captures(update_pattern(), sql_trimmed) {
        let assignments = caps[2]
            .split(", ")
            .map(|part| {
                let a = captures(assignment_pattern(), part.trim())
                    .ok_or_else(|| unsupported(sql, format!("unsupported assignment '{part}'")))?;
                Ok((identifier(sql, &a[1])?, index(sql, &a[2])?))
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(Statement::Update {
            table: identifier(sql, &caps[1])?,
            assignments,
            conditions: conditions(sql, caps.get(3).map(|m| m.as_str()))?,
        });
    }

    if let Some(caps) = captures(delete_pattern(), sql_trimmed) {
        return Ok(Statement::Delete {
            table: identifier(sql, &caps[1])?,
            conditions: conditions(sql, caps.get(2).map(|m| m.as_str()))?,
        });
    }

    if let Some(caps) = captures(select_pattern(), sql_trimmed) {
        return Ok(Statement::Select {
            table: identifier(sql, &caps[2])?,
            count: &caps[1] != "*",
            conditions: conditions(sql, caps.get(3).map(|m| m.as_str()))?,
        });
    }

    Err(unsupported(sql, "statement is not supported by the memory driver"))
}

/// Parameter `n` (1-based).
pub fn bind<'p>(sql: &str, params: &'p [Value], n: usize) -> Result<&'p Value> {
    n.checked_sub(1)
        .and_then(|i| params.get(i))
        .ok_or_else(|| unsupported(sql, format!("missing value for ${n}")))
}
