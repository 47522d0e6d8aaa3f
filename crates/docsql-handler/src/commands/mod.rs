//! Command implementations and their shared plumbing.

mod aggregate;
mod collections;
mod count;
mod delete;
mod find;
mod insert;
mod misc;
mod update;

use std::future::Future;

use bson::{Bson, Document, doc};
use docsql_codec::fjson;
use docsql_proto::{CommandError, ErrorCode};
use docsql_query::{Query, quote_ident};

use crate::backend::{Backend, BackendError, Context};
use crate::config::HandlerConfig;
use crate::error::HandlerError;
use crate::native::map_backend_error;

type Reply = Result<Document, HandlerError>;

/// Everything a command needs to run.
pub(crate) struct Exec<'a> {
    pub backend: &'a dyn Backend,
    pub config: &'a HandlerConfig,
    pub ctx: Context,
    pub db: &'a str,
}

impl Exec<'_> {
    /// Awaits a backend call under the command's context, mapping failures.
    pub async fn run<T>(
        &self,
        arg: &str,
        fut: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, CommandError> {
        self.ctx
            .run(fut)
            .await
            .map_err(|e| map_backend_error(&e, arg, self.config.dev_build))
    }

    /// Quoted `schema.table` of a collection.
    pub fn table(&self, collection: &str) -> String {
        format!("{}.{}", quote_ident(self.db), quote_ident(collection))
    }

    pub fn namespace(&self, collection: &str) -> String {
        format!("{}.{collection}", self.db)
    }

    /// Runs a query returning `_jsonb` rows. A missing collection reads as
    /// empty.
    pub async fn fetch(&self, arg: &str, query: &Query) -> Result<Vec<Document>, HandlerError> {
        let rows = match self
            .run(arg, self.backend.execute(&query.sql, &query.params))
            .await
        {
            Ok(rows) => rows,
            Err(e) if e.code() == ErrorCode::NamespaceNotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(value) = row.first() else {
                return Err(CommandError::internal(format!("{arg}: query returned no columns")).into());
            };
            docs.push(fjson::document_from_json(value)?);
        }
        Ok(docs)
    }
}

/// `{cursor: {firstBatch, id: 0, ns}, ok: 1}`. Every result fits one batch.
fn cursor_reply(ns: String, docs: Vec<Document>) -> Document {
    let batch: Vec<Bson> = docs.into_iter().map(Bson::Document).collect();
    doc! {
        "cursor": {
            "firstBatch": batch,
            "id": 0i64,
            "ns": ns,
        },
        "ok": 1.0,
    }
}

/// Command names in dispatch order, as reported by `listCommands`.
pub(crate) const COMMANDS: &[(&str, &str)] = &[
    ("aggregate", "Returns aggregated data."),
    ("count", "Returns the count of documents that's matched by the query."),
    ("create", "Creates the collection."),
    ("delete", "Deletes documents matched by the query."),
    ("drop", "Drops the collection."),
    ("dropDatabase", "Drops the database."),
    ("find", "Returns documents matched by the query."),
    ("insert", "Inserts documents into the database."),
    ("listCollections", "Returns the information of the collections and views in the database."),
    ("listCommands", "Returns a list of currently supported commands."),
    ("ping", "Returns a pong response."),
    ("update", "Updates documents that are matched by the query."),
];

/// Runs `command` named `name`.
pub(crate) async fn dispatch(exec: &Exec<'_>, name: &str, command: &Document) -> Reply {
    match name {
        "aggregate" => aggregate::aggregate(exec, command).await,
        "count" => count::count(exec, command).await,
        "create" => collections::create(exec, command).await,
        "delete" => delete::delete(exec, command).await,
        "drop" => collections::drop_collection(exec, command).await,
        "dropDatabase" => collections::drop_database(exec, command).await,
        "find" => find::find(exec, command).await,
        "insert" => insert::insert(exec, command).await,
        "listCollections" => collections::list_collections(exec, command).await,
        "listCommands" => misc::list_commands(command),
        "ping" => misc::ping(command),
        "update" => update::update(exec, command).await,
        _ => Err(CommandError::new(
            ErrorCode::CommandNotFound,
            format!("no such command: '{name}'"),
        )
        .into()),
    }
}
