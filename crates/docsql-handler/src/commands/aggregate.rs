use bson::Document;
use docsql_query::compile_pipeline;

use super::{Exec, Reply, cursor_reply};
use crate::params::{Field, Kind, Modifier, extract_params};

const AGGREGATE: &[Field] = &[
    Field::new("aggregate", Kind::String).with(&[Modifier::Collection]),
    Field::new("pipeline", Kind::Array),
    Field::new("cursor", Kind::Document),
    Field::new("maxTimeMS", Kind::Int).with(&[Modifier::Optional, Modifier::WholePositiveNumber]),
    Field::new("allowDiskUse", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("readConcern", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("writeConcern", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("comment", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("explain", Kind::Bool).with(&[Modifier::UnimplementedNonDefault]),
    Field::new("bypassDocumentValidation", Kind::Bool)
        .with(&[Modifier::UnimplementedNonDefault]),
    Field::new("hint", Kind::Any).with(&[Modifier::Unimplemented]),
    Field::new("collation", Kind::Any).with(&[Modifier::Unimplemented]),
    Field::new("let", Kind::Any).with(&[Modifier::Unimplemented]),
];

pub(super) async fn aggregate(exec: &Exec<'_>, command: &Document) -> Reply {
    let params = extract_params(command, "aggregate", AGGREGATE)?;
    let collection = params.string("aggregate").unwrap_or_default();

    let pipeline = compile_pipeline(
        &exec.table(collection),
        params.array("pipeline").unwrap_or_default(),
    )?;
    let docs = exec.fetch("aggregate", &pipeline.query).await?;

    Ok(cursor_reply(
        exec.namespace(collection),
        pipeline.apply_post(docs),
    ))
}
