use bson::{Bson, Document, doc};
use docsql_codec::fjson;
use docsql_codec::tjson::Schema;
use docsql_proto::{CommandError, ErrorCode, WriteErrors, documents_equal};
use docsql_query::{SqlParam, Update, compile_find};

use super::insert::{insert_document, prepare_collection, validate, with_id};
use super::{Exec, Reply};
use crate::error::HandlerError;
use crate::params::{Field, Kind, Modifier, Params, extract_params};

const UPDATES: &[Field] = &[
    Field::new("q", Kind::Document),
    Field::new("u", Kind::Any),
    Field::new("multi", Kind::Bool).with(&[Modifier::Optional]),
    Field::new("upsert", Kind::Bool).with(&[Modifier::Optional]),
    Field::new("collation", Kind::Any).with(&[Modifier::Unimplemented]),
    Field::new("arrayFilters", Kind::Any).with(&[Modifier::Unimplemented]),
    Field::new("hint", Kind::Any).with(&[Modifier::Unimplemented]),
    Field::new("c", Kind::Any).with(&[Modifier::Unimplemented]),
];

const UPDATE: &[Field] = &[
    Field::new("update", Kind::String).with(&[Modifier::Collection]),
    Field::new("updates", Kind::Documents(UPDATES)),
    Field::new("ordered", Kind::Bool).with(&[Modifier::Optional]),
    Field::new("maxTimeMS", Kind::Int).with(&[Modifier::Optional, Modifier::WholePositiveNumber]),
    Field::new("writeConcern", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("comment", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("let", Kind::Any).with(&[Modifier::Unimplemented]),
    Field::new("bypassDocumentValidation", Kind::Bool)
        .with(&[Modifier::UnimplementedNonDefault]),
];

#[derive(Debug, Default)]
struct Outcome {
    matched: i32,
    modified: i32,
    upserted: Option<Bson>,
}

pub(super) async fn update(exec: &Exec<'_>, command: &Document) -> Reply {
    let params = extract_params(command, "update", UPDATE)?;
    let collection = params.string("update").unwrap_or_default();
    let ordered = params.bool("ordered").unwrap_or(true);

    let schema = if exec.config.schema_backend {
        exec.run("update", exec.backend.schema(exec.db, collection))
            .await?
    } else {
        None
    };

    let mut matched = 0;
    let mut modified = 0;
    let mut upserted = Vec::new();
    let mut write_errors = WriteErrors::new();

    for (i, statement) in params.documents("updates").iter().enumerate() {
        match update_one(exec, collection, schema.as_ref(), statement).await {
            Ok(outcome) => {
                matched += outcome.matched;
                modified += outcome.modified;
                if let Some(id) = outcome.upserted {
                    upserted.push(Bson::Document(doc! { "index": i as i32, "_id": id }));
                }
            }
            Err(e) => {
                write_errors.append(&e, i as i32);
                if ordered {
                    break;
                }
            }
        }
    }

    let n = matched + upserted.len() as i32;
    let mut reply = doc! { "n": n, "nModified": modified };
    if !upserted.is_empty() {
        reply.insert("upserted", upserted);
    }
    if !write_errors.is_empty() {
        reply.insert("writeErrors", write_errors.to_array());
    }
    reply.insert("ok", 1.0);
    Ok(reply)
}

async fn update_one(
    exec: &Exec<'_>,
    collection: &str,
    schema: Option<&Schema>,
    statement: &Params,
) -> Result<Outcome, HandlerError> {
    let empty = Document::new();
    let filter = statement.document("q").unwrap_or(&empty);
    let multi = statement.bool("multi").unwrap_or(false);
    let upsert = statement.bool("upsert").unwrap_or(false);

    let update = match statement.any("u") {
        Some(Bson::Document(u)) => Update::new(u)?,
        Some(Bson::Array(_)) => {
            return Err(CommandError::with_argument(
                ErrorCode::NotImplemented,
                "update: support for aggregation pipeline updates is not implemented yet",
                "u",
            )
            .into());
        }
        _ => {
            return Err(CommandError::with_argument(
                ErrorCode::FailedToParse,
                "Update argument must be either an object or an array",
                "u",
            )
            .into());
        }
    };
    if multi && matches!(update, Update::Replace(_)) {
        return Err(CommandError::with_argument(
            ErrorCode::FailedToParse,
            "multi update is not supported for replacement-style update",
            "multi",
        )
        .into());
    }

    let table = exec.table(collection);
    let limit = if multi { None } else { Some(1) };
    let query = compile_find(&table, filter, &empty, None, limit)?;
    let docs = exec.fetch("update", &query).await?;

    let mut outcome = Outcome::default();
    if docs.is_empty() {
        if upsert {
            let doc = with_id(&update.upsert_document(filter)?);
            let schema = prepare_collection(exec, "update", collection, Some(&doc)).await?;
            insert_document(exec, "update", &table, schema.as_ref(), &doc).await?;
            outcome.upserted = doc.get("_id").cloned();
        }
        return Ok(outcome);
    }

    let sql = format!("UPDATE {table} SET _jsonb = $1::jsonb WHERE _jsonb->'_id' = $2::jsonb");
    for doc in &docs {
        outcome.matched += 1;
        let updated = update.apply(doc)?;
        if documents_equal(doc, &updated) {
            continue;
        }
        validate(schema, &updated, "update")?;

        let id = updated.get("_id").cloned().unwrap_or(Bson::Null);
        let params = [
            SqlParam::Json(fjson::document_to_json(&updated)?),
            SqlParam::Json(fjson::to_json(&id)?),
        ];
        exec.run("update", exec.backend.execute(&sql, &params)).await?;
        outcome.modified += 1;
    }
    Ok(outcome)
}
