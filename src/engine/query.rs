//! Query - predicate filter over one table
//!
//! A query is plain data: a table name plus a conjunction of column
//! predicates. It owns no transaction state, so it can be cloned freely and
//! moved between threads inside a handover.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::database::Row;
use super::errors::{EngineError, EngineResult};
use super::session::Session;
use super::table_view::TableView;

/// Comparison applied by a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

/// One column predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Column index
    pub column: usize,
    pub op: FilterOp,
    pub value: Value,
}

impl Predicate {
    pub fn matches(&self, row: &[Value]) -> bool {
        let Some(field) = row.get(self.column) else {
            return false;
        };

        match self.op {
            FilterOp::Eq => field == &self.value,
            FilterOp::Neq => field != &self.value,
            FilterOp::Gt => ordered(field, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                ordered(field, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => ordered(field, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                ordered(field, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::In => self
                .value
                .as_array()
                .map(|candidates| candidates.contains(field))
                .unwrap_or(false),
        }
    }
}

/// Ordering between two values of the same kind; numbers and strings only
fn ordered(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order used for sorting: null < bool < number < string < others.
/// Arrays and objects compare equal among themselves.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_)) => {
            ordered(a, b).unwrap_or(Ordering::Equal)
        }
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

/// A filter over one table; every predicate must match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    table: String,
    predicates: Vec<Predicate>,
}

impl Query {
    /// Match every row of `table`
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            table: name.into(),
            predicates: Vec::new(),
        }
    }

    /// Add a predicate on column `column`
    pub fn filter(mut self, column: usize, op: FilterOp, value: Value) -> Self {
        self.predicates.push(Predicate { column, op, value });
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn matches(&self, row: &[Value]) -> bool {
        self.predicates.iter().all(|p| p.matches(row))
    }

    /// Rows matching this query at the session's current version, in
    /// table order
    pub fn select(&self, session: &Session) -> EngineResult<Vec<Row>> {
        session.read_table(&self.table, |table| {
            let width = table.schema().columns.len();
            if let Some(bad) = self.predicates.iter().find(|p| p.column >= width) {
                return Err(EngineError::NoSuchColumn {
                    table: self.table.clone(),
                    column: bad.column,
                });
            }
            Ok(table
                .rows()
                .iter()
                .filter(|row| self.matches(row))
                .cloned()
                .collect())
        })?
    }

    /// Evaluate into a live view bound to the session's current version
    pub fn find_all(&self, session: &Session) -> EngineResult<TableView> {
        TableView::evaluate(self.clone(), session)
    }
}

/// Sort keys applied to a view's rows, most significant first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    pub column_indices: Vec<usize>,
    pub ascending: Vec<bool>,
}

impl SortOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sort key
    pub fn by(mut self, column: usize, ascending: bool) -> Self {
        self.column_indices.push(column);
        self.ascending.push(ascending);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.column_indices.is_empty()
    }

    pub(crate) fn compare(&self, a: &[Value], b: &[Value]) -> Ordering {
        for (i, &column) in self.column_indices.iter().enumerate() {
            let ascending = self.ascending.get(i).copied().unwrap_or(true);
            let ord = match (a.get(column), b.get(column)) {
                (Some(x), Some(y)) => compare_values(x, y),
                _ => Ordering::Equal,
            };
            let ord = if ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}
