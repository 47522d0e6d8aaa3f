use bson::oid::ObjectId;
use bson::{Bson, Document, doc};
use docsql_codec::fjson;
use docsql_codec::tjson::{self, Schema};
use docsql_proto::{CommandError, ErrorCode, WriteErrors, alias_from_value};
use docsql_query::SqlParam;
use tracing::debug;

use super::{Exec, Reply};
use crate::error::HandlerError;
use crate::params::{Field, Kind, Modifier, extract_params};

const INSERT: &[Field] = &[
    Field::new("insert", Kind::String).with(&[Modifier::Collection]),
    Field::new("documents", Kind::Array),
    Field::new("ordered", Kind::Bool).with(&[Modifier::Optional]),
    Field::new("maxTimeMS", Kind::Int).with(&[Modifier::Optional, Modifier::WholePositiveNumber]),
    Field::new("writeConcern", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("comment", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("bypassDocumentValidation", Kind::Bool)
        .with(&[Modifier::UnimplementedNonDefault]),
];

/// `doc` with `_id` moved to the front, or a new ObjectId there if it has
/// none.
pub(super) fn with_id(doc: &Document) -> Document {
    let id = doc
        .get("_id")
        .cloned()
        .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));
    let mut out = doc! { "_id": id };
    for (k, v) in doc {
        if k != "_id" {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

/// Creates the collection if needed and returns its validator when running
/// against a schema backend. A new validator is derived from `sample`.
pub(super) async fn prepare_collection(
    exec: &Exec<'_>,
    arg: &str,
    collection: &str,
    sample: Option<&Document>,
) -> Result<Option<Schema>, HandlerError> {
    if !exec.config.schema_backend {
        exec.run(arg, exec.backend.create_collection(exec.db, collection, None))
            .await?;
        return Ok(None);
    }

    if let Some(schema) = exec
        .run(arg, exec.backend.schema(exec.db, collection))
        .await?
    {
        return Ok(Some(schema));
    }

    let mut schema = match sample {
        Some(doc) => tjson::document_schema(doc)?,
        None => tjson::empty_schema(collection)?,
    };
    schema.title = collection.to_string();
    exec.run(
        arg,
        exec.backend
            .create_collection(exec.db, collection, Some(&schema)),
    )
    .await?;
    debug!(collection, "created collection with derived schema");
    Ok(Some(schema))
}

/// Checks that `doc` encodes under the collection validator.
pub(super) fn validate(schema: Option<&Schema>, doc: &Document, arg: &str) -> Result<(), CommandError> {
    let Some(schema) = schema else {
        return Ok(());
    };
    match tjson::marshal(&Bson::Document(doc.clone()), schema) {
        Ok(_) => Ok(()),
        Err(e) => Err(CommandError::with_argument(
            ErrorCode::DocumentValidationFailure,
            format!("Document failed validation: {e}"),
            arg,
        )),
    }
}

/// Writes one document, validating it against `schema` first.
pub(super) async fn insert_document(
    exec: &Exec<'_>,
    arg: &str,
    table: &str,
    schema: Option<&Schema>,
    doc: &Document,
) -> Result<(), HandlerError> {
    validate(schema, doc, arg)?;

    let sql = format!("INSERT INTO {table} (_jsonb) VALUES ($1::jsonb)");
    let params = [SqlParam::Json(fjson::document_to_json(doc)?)];
    exec.run(arg, exec.backend.execute(&sql, &params)).await?;
    Ok(())
}

pub(super) async fn insert(exec: &Exec<'_>, command: &Document) -> Reply {
    let params = extract_params(command, "insert", INSERT)?;
    let collection = params.string("insert").unwrap_or_default();
    let ordered = params.bool("ordered").unwrap_or(true);

    let mut docs = Vec::new();
    for (i, value) in params.array("documents").unwrap_or_default().iter().enumerate() {
        let Bson::Document(doc) = value else {
            return Err(CommandError::with_argument(
                ErrorCode::TypeMismatch,
                format!(
                    "BSON field 'insert.documents.{i}' is the wrong type '{}', expected type 'object'",
                    alias_from_value(value)
                ),
                "insert",
            )
            .into());
        };
        docs.push(with_id(doc));
    }

    let schema = prepare_collection(exec, "insert", collection, docs.first()).await?;
    let table = exec.table(collection);

    let mut inserted = 0;
    let mut write_errors = WriteErrors::new();
    for (i, doc) in docs.iter().enumerate() {
        match insert_document(exec, "insert", &table, schema.as_ref(), doc).await {
            Ok(()) => inserted += 1,
            Err(e) => {
                write_errors.append(&e, i as i32);
                if ordered {
                    break;
                }
            }
        }
    }

    let mut reply = doc! { "n": inserted };
    if !write_errors.is_empty() {
        reply.insert("writeErrors", write_errors.to_array());
    }
    reply.insert("ok", 1.0);
    Ok(reply)
}
