use bson::{Bson, Document, doc};
use docsql_proto::{CommandError, ErrorCode};
use docsql_query::{Query, compile_find};

use super::{Exec, Reply};
use crate::numeric::get_whole_param_strict;
use crate::params::{Field, Kind, Modifier, extract_params};

const COUNT: &[Field] = &[
    Field::new("count", Kind::String).with(&[Modifier::Collection]),
    Field::new("query", Kind::Document).with(&[Modifier::Optional]),
    Field::new("skip", Kind::Any).with(&[Modifier::Optional]),
    Field::new("limit", Kind::Any).with(&[Modifier::Optional]),
    Field::new("maxTimeMS", Kind::Int).with(&[Modifier::Optional, Modifier::WholePositiveNumber]),
    Field::new("comment", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("readConcern", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("hint", Kind::Any).with(&[Modifier::Unimplemented]),
    Field::new("collation", Kind::Any).with(&[Modifier::Unimplemented]),
];

pub(super) async fn count(exec: &Exec<'_>, command: &Document) -> Reply {
    let params = extract_params(command, "count", COUNT)?;
    let collection = params.string("count").unwrap_or_default();

    let skip = match params.any("skip") {
        Some(v) => Some(get_whole_param_strict("count", "skip", v)?),
        None => None,
    };
    let limit = match params.any("limit") {
        Some(v) => Some(get_whole_param_strict("count", "limit", v)?),
        None => None,
    };

    let empty = Document::new();
    let find = compile_find(
        &exec.table(collection),
        params.document("query").unwrap_or(&empty),
        &empty,
        skip,
        limit,
    )?;
    let query = Query {
        sql: format!("SELECT COUNT(*) FROM ({}) AS counted", find.sql),
        params: find.params,
    };

    let rows = match exec
        .run("count", exec.backend.execute(&query.sql, &query.params))
        .await
    {
        Ok(rows) => rows,
        Err(e) if e.code() == ErrorCode::NamespaceNotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    let n = match rows.first().and_then(|row| row.first()) {
        None => 0,
        Some(value) => count_value(value)?,
    };
    let n = match i32::try_from(n) {
        Ok(n) => Bson::Int32(n),
        Err(_) => Bson::Int64(n),
    };

    Ok(doc! { "n": n, "ok": 1.0 })
}

/// `COUNT(*)` comes back as a number or, from drivers that keep bigints
/// exact, as a string.
fn count_value(value: &serde_json::Value) -> Result<i64, CommandError> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    };
    n.ok_or_else(|| CommandError::internal(format!("count: unexpected count value {value}")))
}
