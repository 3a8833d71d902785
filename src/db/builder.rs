//! Structured query builder.
//!
//! Turns ordered column/value maps into parameterized SQL fragments:
//! equality-only AND-joined WHERE conditions, SET lists, and full INSERT
//! statements. Fragment order follows map insertion order, so the generated
//! SQL and parameter sequences are deterministic.
//!
//! The two engines want different placeholder syntax (`?` for MySQL,
//! `$1..$n` for PostgreSQL), so a builder is created per statement with the
//! engine's style and keeps a running placeholder index - composing a SET
//! fragment followed by a WHERE fragment numbers the parameters correctly.
//!
//! The builder performs no identifier sanitization: table and column names
//! are trusted input from the calling layer.

use crate::config::EngineKind;
use crate::models::{SqlValue, ValueMap};

/// Placeholder syntax used by an engine's driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `?` - MySQL
    QuestionMark,
    /// `$1`, `$2`, ... - PostgreSQL
    Numbered,
}

impl ParamStyle {
    pub fn for_engine(engine: EngineKind) -> Self {
        match engine {
            EngineKind::MySql => Self::QuestionMark,
            EngineKind::Postgres => Self::Numbered,
        }
    }
}

/// Builds parameterized SQL fragments for one statement.
#[derive(Debug)]
pub struct QueryBuilder {
    style: ParamStyle,
    next_index: usize,
}

impl QueryBuilder {
    pub fn new(engine: EngineKind) -> Self {
        Self::with_style(ParamStyle::for_engine(engine))
    }

    pub fn with_style(style: ParamStyle) -> Self {
        Self {
            style,
            next_index: 1,
        }
    }

    /// Produce the next placeholder and advance the index.
    pub fn placeholder(&mut self) -> String {
        let ph = match self.style {
            ParamStyle::QuestionMark => "?".to_string(),
            ParamStyle::Numbered => format!("${}", self.next_index),
        };
        self.next_index += 1;
        ph
    }

    /// Build an equality WHERE condition (`col1 = ? AND col2 = ?`) plus the
    /// parameter sequence, in map order. An empty filter yields an empty
    /// fragment - i.e. unrestricted - so callers performing bulk mutation
    /// must gate on that explicitly before building.
    pub fn where_fragment(&mut self, filter: &ValueMap) -> (String, Vec<SqlValue>) {
        if filter.is_empty() {
            return (String::new(), Vec::new());
        }

        let mut conditions = Vec::with_capacity(filter.len());
        let mut params = Vec::with_capacity(filter.len());
        for (column, value) in filter.iter() {
            conditions.push(format!("{} = {}", column, self.placeholder()));
            params.push(value.clone());
        }
        (conditions.join(" AND "), params)
    }

    /// Build a SET list (`col1 = ?, col2 = ?`) plus the parameter sequence,
    /// in map order.
    pub fn set_fragment(&mut self, data: &ValueMap) -> (String, Vec<SqlValue>) {
        let mut assignments = Vec::with_capacity(data.len());
        let mut params = Vec::with_capacity(data.len());
        for (column, value) in data.iter() {
            assignments.push(format!("{} = {}", column, self.placeholder()));
            params.push(value.clone());
        }
        (assignments.join(", "), params)
    }

    /// Build a full single-row INSERT statement with the data map's column
    /// order.
    pub fn insert_statement(&mut self, table: &str, data: &ValueMap) -> (String, Vec<SqlValue>) {
        let columns: Vec<&str> = data.columns().collect();
        let placeholders: Vec<String> = (0..data.len()).map(|_| self.placeholder()).collect();
        let params: Vec<SqlValue> = data.values().cloned().collect();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        );
        (sql, params)
    }
}
