//! The storage backend seam and the per-command execution context.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use docsql_codec::tjson::Schema;
use docsql_query::SqlParam;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One result row, one JSON value per selected column.
pub type Row = Vec<serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Error raised by the database, carrying its SQLSTATE.
    #[error("{message} (SQLSTATE {code})")]
    Native { code: String, message: String },
    #[error("connection error: {0}")]
    Connection(String),
    #[error("operation was canceled")]
    Canceled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    pub fn native(code: impl Into<String>, message: impl Into<String>) -> Self {
        BackendError::Native {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A SQL database storing each collection as a table with a single `_jsonb`
/// column, one table per collection, one schema per database.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Runs `sql` with positional parameters and returns every row.
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, BackendError>;

    /// Collection names in `db`, sorted.
    async fn tables(&self, db: &str) -> Result<Vec<String>, BackendError>;

    /// Creates the collection table, storing `schema` as its validator.
    /// Returns `false` if it already exists.
    async fn create_collection(
        &self,
        db: &str,
        collection: &str,
        schema: Option<&Schema>,
    ) -> Result<bool, BackendError>;

    /// Returns `false` if the collection did not exist.
    async fn drop_collection(&self, db: &str, collection: &str) -> Result<bool, BackendError>;

    /// Returns `false` if the database did not exist.
    async fn drop_database(&self, db: &str) -> Result<bool, BackendError>;

    /// Validator stored for the collection, if any.
    async fn schema(&self, db: &str, collection: &str) -> Result<Option<Schema>, BackendError>;
}

/// Cancellation and deadline for one command.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    pub fn new(token: CancellationToken) -> Self {
        Context {
            token,
            deadline: None,
        }
    }

    /// A child context that also expires after `ms` milliseconds, or at the
    /// current deadline if that comes first.
    pub fn with_max_time(&self, ms: u64) -> Context {
        let deadline = Instant::now() + Duration::from_millis(ms);
        Context {
            token: self.token.child_token(),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drives a backend call, aborting it on cancellation or deadline.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .unwrap_or(Err(BackendError::DeadlineExceeded)),
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(BackendError::Canceled),
            result = bounded => result,
        }
    }
}
