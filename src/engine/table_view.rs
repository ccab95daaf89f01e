//! TableView - materialized query results bound to one version
//!
//! A view remembers the query that produced it and the version it was
//! evaluated at. `sync_if_needed` re-evaluates against a session only when
//! that session has moved to another version.

use serde::{Deserialize, Serialize};

use super::database::Row;
use super::errors::EngineResult;
use super::query::{Query, SortOrder};
use super::session::Session;
use crate::mvcc::VersionId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableView {
    query: Query,
    sort: SortOrder,
    rows: Vec<Row>,
    version: Option<VersionId>,
}

impl TableView {
    pub(crate) fn evaluate(query: Query, session: &Session) -> EngineResult<Self> {
        let version = session.snapshot()?.version();
        let rows = query.select(session)?;
        Ok(Self {
            query,
            sort: SortOrder::default(),
            rows,
            version: Some(version),
        })
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    /// Version the rows were evaluated at
    pub fn version(&self) -> Option<VersionId> {
        self.version
    }

    /// Whether the view has ever been evaluated
    pub fn is_attached(&self) -> bool {
        self.version.is_some()
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Apply `sort` now and on every later re-evaluation
    pub fn sort(&mut self, sort: &SortOrder) {
        self.sort = sort.clone();
        self.apply_sort();
    }

    fn apply_sort(&mut self) {
        if !self.sort.is_empty() {
            let sort = &self.sort;
            self.rows.sort_by(|a, b| sort.compare(a, b));
        }
    }

    /// Re-evaluate if `session` is at a different version than the view.
    ///
    /// Returns `true` only when the visible rows changed.
    pub fn sync_if_needed(&mut self, session: &Session) -> EngineResult<bool> {
        let current = session.snapshot()?.version();
        if self.version == Some(current) {
            return Ok(false);
        }

        let mut rows = self.query.select(session)?;
        if !self.sort.is_empty() {
            let sort = &self.sort;
            rows.sort_by(|a, b| sort.compare(a, b));
        }
        self.version = Some(current);
        if rows == self.rows {
            return Ok(false);
        }
        self.rows = rows;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::database::Database;
    use crate::engine::errors::EngineError;
    use crate::engine::query::FilterOp;
    use crate::engine::schema::{ColumnKind, TableSchema};
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;

    fn session_with_dogs() -> (Arc<Database>, Session) {
        let db = Database::open(Path::new("view-test"), true).unwrap();
        db.ensure_tables(&[TableSchema::new("dogs")
            .column("name", ColumnKind::String)
            .column("age", ColumnKind::Integer)])
            .unwrap();
        let writer = Session::new(Arc::clone(&db), false);
        writer.begin_write().unwrap();
        writer.insert("dogs", vec![json!("rex"), json!(4)]).unwrap();
        writer.insert("dogs", vec![json!("fido"), json!(2)]).unwrap();
        writer.commit().unwrap();

        let session = Session::new(Arc::clone(&db), false);
        session.begin_read().unwrap();
        (db, session)
    }

    fn commit_dog(db: &Arc<Database>, name: &str, age: i64) {
        let writer = Session::new(Arc::clone(db), false);
        writer.begin_write().unwrap();
        writer.insert("dogs", vec![json!(name), json!(age)]).unwrap();
        writer.commit().unwrap();
    }

    #[test]
    fn test_find_all_and_sort() {
        let (_db, session) = session_with_dogs();
        let mut view = Query::table("dogs").find_all(&session).unwrap();
        assert_eq!(view.len(), 2);
        assert_eq!(view.version(), Some(VersionId::new(2)));

        view.sort(&SortOrder::new().by(1, true));
        assert_eq!(view.get(0).unwrap()[0], json!("fido"));
    }

    #[test]
    fn test_sync_only_reports_visible_changes() {
        let (db, session) = session_with_dogs();
        let mut view = Query::table("dogs")
            .filter(1, FilterOp::Gt, json!(3))
            .find_all(&session)
            .unwrap();
        assert!(!view.sync_if_needed(&session).unwrap());

        commit_dog(&db, "pup", 1);
        session.advance_read().unwrap();
        assert!(!view.sync_if_needed(&session).unwrap());
        assert_eq!(view.version(), Some(VersionId::new(3)));

        commit_dog(&db, "old", 12);
        session.advance_read().unwrap();
        assert!(view.sync_if_needed(&session).unwrap());
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn test_bad_column_is_an_error() {
        let (_db, session) = session_with_dogs();
        let result = Query::table("dogs")
            .filter(7, FilterOp::Eq, json!(1))
            .find_all(&session);
        assert!(matches!(
            result,
            Err(EngineError::NoSuchColumn { column: 7, .. })
        ));
    }

    #[test]
    fn test_missing_table_is_an_error() {
        let (_db, session) = session_with_dogs();
        assert!(matches!(
            Query::table("cats").find_all(&session),
            Err(EngineError::NoSuchTable(_))
        ));
    }
}
