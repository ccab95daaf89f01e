//! Schema definitions
//!
//! A schema is a list of tables, each with an ordered list of typed columns.
//! Rows are positional, so a column's index is its position here.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{EngineError, EngineResult};

/// Kind of value a column holds. `null` is accepted by every kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Bool,
    Integer,
    Float,
    String,
    Any,
}

impl ColumnKind {
    /// Whether `value` may be stored in a column of this kind
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        match self {
            ColumnKind::Bool => value.is_boolean(),
            ColumnKind::Integer => value.is_i64() || value.is_u64(),
            ColumnKind::Float => value.is_number(),
            ColumnKind::String => value.is_string(),
            ColumnKind::Any => true,
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnKind::Bool => "a bool",
            ColumnKind::Integer => "an integer",
            ColumnKind::Float => "a number",
            ColumnKind::String => "a string",
            ColumnKind::Any => "any value",
        };
        f.write_str(name)
    }
}

/// One column of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// One table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Append a column
    pub fn column(mut self, name: impl Into<String>, kind: ColumnKind) -> Self {
        self.columns.push(ColumnSchema::new(name, kind));
        self
    }

    /// Check a row's arity and value kinds against this table
    pub fn validate_row(&self, row: &[Value]) -> EngineResult<()> {
        if row.len() != self.columns.len() {
            return Err(EngineError::ArityMismatch {
                table: self.name.clone(),
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        for (column, value) in self.columns.iter().zip(row) {
            if !column.kind.accepts(value) {
                return Err(EngineError::TypeMismatch {
                    table: self.name.clone(),
                    column: column.name.clone(),
                    expected: column.kind,
                });
            }
        }
        Ok(())
    }
}

/// A set of tables, unique by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    tables: Vec<TableSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table, replacing any table of the same name
    pub fn table(mut self, table: TableSchema) -> Self {
        self.tables.retain(|t| t.name != table.name);
        self.tables.push(table);
        self
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Fold `other` into this schema.
    ///
    /// Tables present in both must be identical; on the first that differs
    /// its name is returned and nothing is merged. Tables only in `other`
    /// are appended and returned.
    pub fn merge(&mut self, other: &Schema) -> Result<Vec<TableSchema>, String> {
        let mut added = Vec::new();
        for table in &other.tables {
            match self.get(&table.name) {
                Some(existing) if existing != table => return Err(table.name.clone()),
                Some(_) => {}
                None => added.push(table.clone()),
            }
        }
        self.tables.extend(added.iter().cloned());
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dogs() -> TableSchema {
        TableSchema::new("dogs")
            .column("name", ColumnKind::String)
            .column("age", ColumnKind::Integer)
    }

    #[test]
    fn test_validate_row() {
        let table = dogs();
        assert!(table.validate_row(&[json!("rex"), json!(3)]).is_ok());
        assert!(table.validate_row(&[json!("rex"), Value::Null]).is_ok());
        assert!(matches!(
            table.validate_row(&[json!("rex")]),
            Err(EngineError::ArityMismatch { expected: 2, actual: 1, .. })
        ));
        assert!(matches!(
            table.validate_row(&[json!("rex"), json!("three")]),
            Err(EngineError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_float_column_accepts_integers() {
        assert!(ColumnKind::Float.accepts(&json!(1)));
        assert!(ColumnKind::Float.accepts(&json!(1.5)));
        assert!(!ColumnKind::Integer.accepts(&json!(1.5)));
    }

    #[test]
    fn test_merge_appends_new_tables() {
        let mut base = Schema::new().table(dogs());
        let other = Schema::new()
            .table(dogs())
            .table(TableSchema::new("cats").column("name", ColumnKind::String));

        let added = base.merge(&other).unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].name, "cats");
        assert!(base.get("cats").is_some());
        assert_eq!(base.tables().len(), 2);
    }

    #[test]
    fn test_merge_rejects_differing_table() {
        let mut base = Schema::new().table(dogs());
        let other = Schema::new().table(TableSchema::new("dogs").column("name", ColumnKind::Any));

        assert_eq!(base.merge(&other), Err("dogs".to_string()));
        assert_eq!(base.get("dogs"), Some(&dogs()));
    }

    #[test]
    fn test_schema_json_shape() {
        let schema = Schema::new().table(dogs());
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["tables"][0]["columns"][1]["kind"], "integer");
    }
}
