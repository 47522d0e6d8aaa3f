use bson::{Bson, Document, doc};
use docsql_codec::fjson;
use docsql_proto::{ErrorCode, WriteErrors};
use docsql_query::{SqlParam, compile_find};

use super::{Exec, Reply};
use crate::error::HandlerError;
use crate::params::{Field, Kind, Modifier, Params, extract_params};

const DELETES: &[Field] = &[
    Field::new("q", Kind::Document),
    Field::new("limit", Kind::Bool).with(&[Modifier::ZeroOrOneAsBool]),
    Field::new("collation", Kind::Any).with(&[Modifier::Unimplemented]),
    Field::new("hint", Kind::Any).with(&[Modifier::Unimplemented]),
];

const DELETE: &[Field] = &[
    Field::new("delete", Kind::String).with(&[Modifier::Collection]),
    Field::new("deletes", Kind::Documents(DELETES)),
    Field::new("ordered", Kind::Bool).with(&[Modifier::Optional]),
    Field::new("maxTimeMS", Kind::Int).with(&[Modifier::Optional, Modifier::WholePositiveNumber]),
    Field::new("writeConcern", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("comment", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("let", Kind::Any).with(&[Modifier::Unimplemented]),
];

pub(super) async fn delete(exec: &Exec<'_>, command: &Document) -> Reply {
    let params = extract_params(command, "delete", DELETE)?;
    let collection = params.string("delete").unwrap_or_default();
    let ordered = params.bool("ordered").unwrap_or(true);

    let mut deleted = 0;
    let mut write_errors = WriteErrors::new();
    for (i, statement) in params.documents("deletes").iter().enumerate() {
        match delete_one(exec, collection, statement).await {
            Ok(n) => deleted += n,
            Err(e) => {
                write_errors.append(&e, i as i32);
                if ordered {
                    break;
                }
            }
        }
    }

    let mut reply = doc! { "n": deleted };
    if !write_errors.is_empty() {
        reply.insert("writeErrors", write_errors.to_array());
    }
    reply.insert("ok", 1.0);
    Ok(reply)
}

/// Deletes the documents `statement` matches, or the first one with `limit: 1`.
async fn delete_one(exec: &Exec<'_>, collection: &str, statement: &Params) -> Result<i32, HandlerError> {
    let empty = Document::new();
    let filter = statement.document("q").unwrap_or(&empty);
    let limit = statement.bool("limit").unwrap_or(false).then_some(1);

    let table = exec.table(collection);
    let query = compile_find(&table, filter, &empty, None, limit)?;
    let docs = exec.fetch("delete", &query).await?;
    if docs.is_empty() {
        return Ok(0);
    }

    let ids: Vec<Bson> = docs
        .iter()
        .filter_map(|d| d.get("_id").cloned())
        .collect();
    let sql = format!(
        "DELETE FROM {table} WHERE _jsonb->'_id' IN (SELECT jsonb_array_elements($1::jsonb)) \
         RETURNING _jsonb->'_id'"
    );
    let params = [SqlParam::Json(fjson::to_json(&Bson::Array(ids))?)];

    match exec.run("delete", exec.backend.execute(&sql, &params)).await {
        Ok(rows) => Ok(rows.len() as i32),
        Err(e) if e.code() == ErrorCode::NamespaceNotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}
