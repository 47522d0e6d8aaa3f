use bson::Document;
use docsql_query::{Projection, compile_find};

use super::{Exec, Reply, cursor_reply};
use crate::numeric::get_whole_param_strict;
use crate::params::{Field, Kind, Modifier, extract_params};

const FIND: &[Field] = &[
    Field::new("find", Kind::String).with(&[Modifier::Collection]),
    Field::new("filter", Kind::Document).with(&[Modifier::Optional]),
    Field::new("sort", Kind::Document).with(&[Modifier::Optional]),
    Field::new("projection", Kind::Document).with(&[Modifier::Optional]),
    Field::new("skip", Kind::Any).with(&[Modifier::Optional]),
    Field::new("limit", Kind::Any).with(&[Modifier::Optional]),
    Field::new("batchSize", Kind::Int).with(&[Modifier::Optional, Modifier::PositiveNumber]),
    Field::new("singleBatch", Kind::Bool).with(&[Modifier::Optional]),
    Field::new("maxTimeMS", Kind::Int).with(&[Modifier::Optional, Modifier::WholePositiveNumber]),
    Field::new("comment", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("readConcern", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("allowPartialResults", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("noCursorTimeout", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("hint", Kind::Any).with(&[Modifier::Unimplemented]),
    Field::new("collation", Kind::Any).with(&[Modifier::Unimplemented]),
    Field::new("let", Kind::Any).with(&[Modifier::Unimplemented]),
    Field::new("min", Kind::Any).with(&[Modifier::Unimplemented]),
    Field::new("max", Kind::Any).with(&[Modifier::Unimplemented]),
    Field::new("tailable", Kind::Bool).with(&[Modifier::UnimplementedNonDefault]),
    Field::new("awaitData", Kind::Bool).with(&[Modifier::UnimplementedNonDefault]),
    Field::new("returnKey", Kind::Bool).with(&[Modifier::UnimplementedNonDefault]),
    Field::new("showRecordId", Kind::Bool).with(&[Modifier::UnimplementedNonDefault]),
];

pub(super) async fn find(exec: &Exec<'_>, command: &Document) -> Reply {
    let params = extract_params(command, "find", FIND)?;
    let collection = params.string("find").unwrap_or_default();

    let skip = match params.any("skip") {
        Some(v) => Some(get_whole_param_strict("find", "skip", v)?),
        None => None,
    };
    let limit = match params.any("limit") {
        Some(v) => Some(get_whole_param_strict("find", "limit", v)?),
        None => None,
    };
    let projection = params.document("projection").map(Projection::new).transpose()?;

    let empty = Document::new();
    let query = compile_find(
        &exec.table(collection),
        params.document("filter").unwrap_or(&empty),
        params.document("sort").unwrap_or(&empty),
        skip,
        limit,
    )?;

    let mut docs = exec.fetch("find", &query).await?;
    if let Some(projection) = &projection {
        docs = docs.iter().map(|d| projection.apply(d)).collect();
    }

    Ok(cursor_reply(exec.namespace(collection), docs))
}
