//! PostgreSQL backend: one schema per database, one `_jsonb` table per
//! collection, validators kept as table comments.

use async_trait::async_trait;
use docsql_codec::tjson::Schema;
use docsql_query::SqlParam;
use docsql_query::path::{quote_ident, quote_literal};
use serde_json::Value;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls};
use tracing::error;

use crate::backend::{Backend, BackendError, Row};

const DUPLICATE_TABLE: &str = "42P07";
const UNDEFINED_TABLE: &str = "42P01";
const INVALID_SCHEMA_NAME: &str = "3F000";

impl From<tokio_postgres::Error> for BackendError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db) = err.as_db_error() {
            return BackendError::native(db.code().code(), db.message());
        }
        if err.is_closed() {
            return BackendError::Connection(err.to_string());
        }
        BackendError::Other(err.to_string())
    }
}

fn native_code(err: &BackendError) -> Option<&str> {
    match err {
        BackendError::Native { code, .. } => Some(code),
        _ => None,
    }
}

pub struct PostgresBackend {
    client: Client,
}

impl PostgresBackend {
    /// Connects and drives the connection on a spawned task.
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(%err, "postgres connection error");
            }
        });
        Ok(PostgresBackend { client })
    }

    fn table(db: &str, collection: &str) -> String {
        format!("{}.{}", quote_ident(db), quote_ident(collection))
    }
}

fn column_value(row: &tokio_postgres::Row, i: usize) -> Result<Value, BackendError> {
    let ty = row.columns()[i].type_();
    let value = if *ty == Type::JSONB || *ty == Type::JSON {
        row.try_get::<_, Option<Value>>(i)?.unwrap_or(Value::Null)
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(i)?.map_or(Value::Null, Value::from)
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(i)?.map_or(Value::Null, Value::from)
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(i)?.map_or(Value::Null, Value::from)
    } else if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(i)?.map_or(Value::Null, Value::from)
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::NAME {
        row.try_get::<_, Option<String>>(i)?.map_or(Value::Null, Value::from)
    } else {
        return Err(BackendError::Other(format!("unsupported column type {ty}")));
    };
    Ok(value)
}

#[async_trait]
impl Backend for PostgresBackend {
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, BackendError> {
        let params: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| match p {
                SqlParam::Text(s) => s as &(dyn ToSql + Sync),
                SqlParam::Json(v) => v as &(dyn ToSql + Sync),
            })
            .collect();

        let rows = self.client.query(sql, &params).await?;
        rows.iter()
            .map(|row| (0..row.len()).map(|i| column_value(row, i)).collect())
            .collect()
    }

    async fn tables(&self, db: &str) -> Result<Vec<String>, BackendError> {
        let rows = self
            .client
            .query(
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema = $1 ORDER BY table_name",
                &[&db],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn create_collection(
        &self,
        db: &str,
        collection: &str,
        schema: Option<&Schema>,
    ) -> Result<bool, BackendError> {
        let table = Self::table(db, collection);
        self.client
            .batch_execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(db)))
            .await?;

        match self
            .client
            .batch_execute(&format!("CREATE TABLE {table} (_jsonb jsonb)"))
            .await
        {
            Ok(()) => {}
            Err(e) => {
                let err = BackendError::from(e);
                if native_code(&err) == Some(DUPLICATE_TABLE) {
                    return Ok(false);
                }
                return Err(err);
            }
        }

        self.client
            .batch_execute(&format!(
                "CREATE UNIQUE INDEX ON {table} ((_jsonb->'_id'))"
            ))
            .await?;

        if let Some(schema) = schema {
            let json = schema
                .to_json()
                .map_err(|e| BackendError::Other(e.to_string()))?;
            self.client
                .batch_execute(&format!(
                    "COMMENT ON TABLE {table} IS {}",
                    quote_literal(&json)
                ))
                .await?;
        }
        Ok(true)
    }

    async fn drop_collection(&self, db: &str, collection: &str) -> Result<bool, BackendError> {
        let sql = format!("DROP TABLE {}", Self::table(db, collection));
        match self.client.batch_execute(&sql).await {
            Ok(()) => Ok(true),
            Err(e) => {
                let err = BackendError::from(e);
                match native_code(&err) {
                    Some(UNDEFINED_TABLE | INVALID_SCHEMA_NAME) => Ok(false),
                    _ => Err(err),
                }
            }
        }
    }

    async fn drop_database(&self, db: &str) -> Result<bool, BackendError> {
        let sql = format!("DROP SCHEMA {} CASCADE", quote_ident(db));
        match self.client.batch_execute(&sql).await {
            Ok(()) => Ok(true),
            Err(e) => {
                let err = BackendError::from(e);
                match native_code(&err) {
                    Some(INVALID_SCHEMA_NAME) => Ok(false),
                    _ => Err(err),
                }
            }
        }
    }

    async fn schema(&self, db: &str, collection: &str) -> Result<Option<Schema>, BackendError> {
        let table = Self::table(db, collection);
        let row = self
            .client
            .query_one(
                "SELECT obj_description(to_regclass($1), 'pg_class')",
                &[&table],
            )
            .await?;
        let Some(comment) = row.get::<_, Option<String>>(0) else {
            return Ok(None);
        };
        Schema::from_json(comment.as_bytes())
            .map(Some)
            .map_err(|e| BackendError::Other(format!("stored schema of {table}: {e}")))
    }
}
