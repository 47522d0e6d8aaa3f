//! Scripted in-memory backend for tests and embedding without a database.
//!
//! `execute` records every statement and answers from a queue of scripted
//! results; an empty queue yields no rows. Collections and their validators
//! are tracked for real.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use docsql_codec::tjson::Schema;
use docsql_query::SqlParam;

use crate::backend::{Backend, BackendError, Row};

/// A statement passed to [`Backend::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

#[derive(Debug, Default)]
struct State {
    responses: VecDeque<Result<Vec<Row>, BackendError>>,
    executed: Vec<Executed>,
    databases: BTreeMap<String, BTreeMap<String, Option<Schema>>>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues rows for the next `execute`.
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.lock().responses.push_back(Ok(rows));
    }

    /// Queues an error for the next `execute`.
    pub fn push_error(&self, err: BackendError) {
        self.lock().responses.push_back(Err(err));
    }

    /// Statements executed so far, oldest first.
    pub fn executed(&self) -> Vec<Executed> {
        self.lock().executed.clone()
    }

    pub fn add_collection(&self, db: &str, collection: &str) {
        self.lock()
            .databases
            .entry(db.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_insert(None);
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, BackendError> {
        let mut state = self.lock();
        state.executed.push(Executed {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        state.responses.pop_front().unwrap_or(Ok(Vec::new()))
    }

    async fn tables(&self, db: &str) -> Result<Vec<String>, BackendError> {
        Ok(self
            .lock()
            .databases
            .get(db)
            .map(|colls| colls.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_collection(
        &self,
        db: &str,
        collection: &str,
        schema: Option<&Schema>,
    ) -> Result<bool, BackendError> {
        let mut state = self.lock();
        let colls = state.databases.entry(db.to_string()).or_default();
        if colls.contains_key(collection) {
            return Ok(false);
        }
        colls.insert(collection.to_string(), schema.cloned());
        Ok(true)
    }

    async fn drop_collection(&self, db: &str, collection: &str) -> Result<bool, BackendError> {
        let mut state = self.lock();
        Ok(state
            .databases
            .get_mut(db)
            .and_then(|colls| colls.remove(collection))
            .is_some())
    }

    async fn drop_database(&self, db: &str) -> Result<bool, BackendError> {
        Ok(self.lock().databases.remove(db).is_some())
    }

    async fn schema(&self, db: &str, collection: &str) -> Result<Option<Schema>, BackendError> {
        Ok(self
            .lock()
            .databases
            .get(db)
            .and_then(|colls| colls.get(collection))
            .cloned()
            .flatten())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn replays_scripted_results_in_order() {
        let backend = MemoryBackend::new();
        backend.push_rows(vec![vec![json!(1)]]);
        backend.push_error(BackendError::native("42P01", "missing"));

        let first = backend.execute("SELECT 1", &[]).await;
        assert_eq!(first, Ok(vec![vec![json!(1)]]));
        let second = backend.execute("SELECT 2", &[SqlParam::Text("x".into())]).await;
        assert!(matches!(second, Err(BackendError::Native { .. })));
        assert_eq!(backend.execute("SELECT 3", &[]).await, Ok(Vec::new()));

        let sql: Vec<String> = backend.executed().into_iter().map(|e| e.sql).collect();
        assert_eq!(sql, ["SELECT 1", "SELECT 2", "SELECT 3"]);
    }

    #[tokio::test]
    async fn tracks_collections() {
        let backend = MemoryBackend::new();
        assert!(backend.create_collection("db", "b", None).await.unwrap());
        assert!(backend.create_collection("db", "a", None).await.unwrap());
        assert!(!backend.create_collection("db", "a", None).await.unwrap());
        assert_eq!(backend.tables("db").await.unwrap(), ["a", "b"]);

        assert!(backend.drop_collection("db", "a").await.unwrap());
        assert!(!backend.drop_collection("db", "a").await.unwrap());
        assert!(backend.drop_database("db").await.unwrap());
        assert!(backend.tables("db").await.unwrap().is_empty());
    }
}
