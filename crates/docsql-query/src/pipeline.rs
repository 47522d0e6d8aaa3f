//! Aggregation pipeline and `find` query assembly.
//!
//! `$match`, `$sort`, `$group`, `$limit`, `$skip` and `$count` compile into
//! chained SQL stages. `$project` and anything after it run in-process over
//! the fetched documents.

use bson::{Bson, Document};
use docsql_proto::{CommandError, ErrorCode, NumberError, get_whole_number_param};

use crate::group::group_stage;
use crate::param::SqlParam;
use crate::parse_filter::parse_filter;
use crate::path::Input;
use crate::projection::Projection;
use crate::sort::add_sort_stage;
use crate::stage::{FieldType, Query, Stage, StageField, wrap};

/// Stages that exist but have no translation.
const UNSUPPORTED_STAGES: &[&str] = &[
    "$addFields",
    "$bucket",
    "$bucketAuto",
    "$collStats",
    "$densify",
    "$facet",
    "$fill",
    "$geoNear",
    "$graphLookup",
    "$indexStats",
    "$lookup",
    "$merge",
    "$out",
    "$redact",
    "$replaceRoot",
    "$replaceWith",
    "$sample",
    "$set",
    "$setWindowFields",
    "$sortByCount",
    "$unionWith",
    "$unset",
    "$unwind",
];

/// Work done on fetched documents.
#[derive(Debug, Clone, PartialEq)]
pub enum PostStage {
    Project(Projection),
    Limit(i64),
    Skip(i64),
}

/// A compiled pipeline: one SQL query and the in-process tail.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub query: Query,
    pub post: Vec<PostStage>,
}

impl Pipeline {
    pub fn apply_post(&self, docs: Vec<Document>) -> Vec<Document> {
        self.post.iter().fold(docs, |docs, stage| match stage {
            PostStage::Project(p) => docs.iter().map(|d| p.apply(d)).collect(),
            PostStage::Limit(n) => docs.into_iter().take(*n as usize).collect(),
            PostStage::Skip(n) => docs.into_iter().skip(*n as usize).collect(),
        })
    }
}

/// Segments hold stages over a common `FROM`. A `$group` that follows column
/// output closes the current segment so it reads `_jsonb` documents again.
struct Builder {
    from: String,
    params: Vec<SqlParam>,
    segments: usize,
    stages: Vec<Stage>,
    input: Input,
}

impl Builder {
    fn new(table: &str) -> Self {
        Builder {
            from: table.to_string(),
            params: Vec::new(),
            segments: 0,
            stages: Vec::new(),
            input: Input::Document,
        }
    }

    fn close_segment(&mut self) {
        let mut stages = std::mem::take(&mut self.stages);
        let query = wrap(&self.from, &mut stages, self.params.len() + 1);
        self.segments += 1;
        self.from = format!("({}) AS segment{}", query.sql, self.segments);
        self.params.extend(query.params);
        self.input = Input::Document;
    }

    fn push(&mut self, stage: Stage) {
        if !stage.fields.is_empty() {
            self.input = Input::Columns;
        }
        self.stages.push(stage);
    }

    /// Last stage if `fits` accepts it, otherwise a fresh one.
    fn open(&mut self, fits: impl Fn(&Stage) -> bool) -> &mut Stage {
        if !self.stages.last().is_some_and(fits) {
            self.stages.push(Stage::new(self.input));
        }
        let last = self.stages.len() - 1;
        &mut self.stages[last]
    }

    fn finish(mut self) -> Query {
        let query = wrap(&self.from, &mut self.stages, self.params.len() + 1);
        self.params.extend(query.params);
        Query {
            sql: query.sql,
            params: self.params,
        }
    }
}

/// Compiles an aggregation pipeline over `table`.
pub fn compile_pipeline(table: &str, pipeline: &[Bson]) -> Result<Pipeline, CommandError> {
    let mut builder = Builder::new(table);
    let mut post: Vec<PostStage> = Vec::new();

    for stage in pipeline {
        let (name, value) = stage_entry(stage)?;

        if !post.is_empty() {
            post.push(match name {
                "$project" => PostStage::Project(project_stage(value)?),
                "$limit" => PostStage::Limit(limit_param(value)?),
                "$skip" => PostStage::Skip(skip_param(value)?),
                _ => {
                    known_stage(name)?;
                    return Err(CommandError::with_argument(
                        ErrorCode::NotImplemented,
                        format!("{name} after $project is not implemented yet"),
                        name,
                    ));
                }
            });
            continue;
        }

        match name {
            "$match" => {
                let Bson::Document(filter) = value else {
                    return Err(CommandError::with_argument(
                        ErrorCode::MatchBadExpression,
                        "the match filter must be an expression in an object",
                        "$match",
                    ));
                };
                let tree = parse_filter(filter, builder.input)?;
                let mut stage = Stage::new(builder.input);
                stage.filter = Some(tree);
                builder.push(stage);
            }
            "$sort" => {
                let Bson::Document(spec) = value else {
                    return Err(CommandError::with_argument(
                        ErrorCode::SortBadExpression,
                        "the $sort key specification must be an object",
                        "$sort",
                    ));
                };
                if spec.is_empty() {
                    return Err(CommandError::with_argument(
                        ErrorCode::SortMissingKey,
                        "$sort stage must have at least one sort key",
                        "$sort",
                    ));
                }
                let sort = add_sort_stage(spec)?;
                builder
                    .open(|s| {
                        s.fields.is_empty()
                            && s.sort.is_empty()
                            && s.limit.is_none()
                            && s.skip.is_none()
                    })
                    .sort = sort;
            }
            "$limit" => {
                let limit = limit_param(value)?;
                builder.open(|s| s.limit.is_none()).limit = Some(limit);
            }
            "$skip" => {
                let skip = skip_param(value)?;
                builder
                    .open(|s| s.limit.is_none() && s.skip.is_none())
                    .skip = Some(skip);
            }
            "$group" => {
                let stage = group_stage(value)?;
                if builder.input == Input::Columns {
                    builder.close_segment();
                }
                builder.push(stage);
            }
            "$count" => builder.push(count_stage(value, builder.input)?),
            "$project" => post.push(PostStage::Project(project_stage(value)?)),
            _ => {
                known_stage(name)?;
                return Err(CommandError::with_argument(
                    ErrorCode::NotImplemented,
                    format!("`aggregate` stage {name:?} is not implemented yet"),
                    name,
                ));
            }
        }
    }

    Ok(Pipeline {
        query: builder.finish(),
        post,
    })
}

/// Compiles a `find` over `table`. The projection, if any, is applied by the
/// caller.
pub fn compile_find(
    table: &str,
    filter: &Document,
    sort: &Document,
    skip: Option<i64>,
    limit: Option<i64>,
) -> Result<Query, CommandError> {
    let mut stage = Stage::new(Input::Document);
    let tree = parse_filter(filter, Input::Document)?;
    if !tree.is_empty() {
        stage.filter = Some(tree);
    }
    stage.sort = add_sort_stage(sort)?;
    stage.skip = skip.filter(|s| *s > 0);
    stage.limit = limit.filter(|l| *l > 0);

    let mut stages = if stage.is_passthrough() {
        Vec::new()
    } else {
        vec![stage]
    };
    Ok(wrap(table, &mut stages, 1))
}

// ── Stage arguments ─────────────────────────────────────────────

fn stage_entry(stage: &Bson) -> Result<(&str, &Bson), CommandError> {
    let invalid = || {
        CommandError::new(
            ErrorCode::StageInvalid,
            "A pipeline stage specification object must contain exactly one field.",
        )
    };
    let Bson::Document(doc) = stage else {
        return Err(invalid());
    };
    let mut entries = doc.iter();
    match (entries.next(), entries.next()) {
        (Some((name, value)), None) => Ok((name.as_str(), value)),
        _ => Err(invalid()),
    }
}

fn known_stage(name: &str) -> Result<(), CommandError> {
    if UNSUPPORTED_STAGES.contains(&name) {
        return Ok(());
    }
    Err(CommandError::new(
        ErrorCode::UnrecognizedPipelineStage,
        format!("Unrecognized pipeline stage name: '{name}'"),
    ))
}

fn project_stage(value: &Bson) -> Result<Projection, CommandError> {
    match value {
        Bson::Document(spec) if !spec.is_empty() => Projection::new(spec),
        Bson::Document(_) => Err(CommandError::with_argument(
            ErrorCode::BadValue,
            "projection specification must have at least one field",
            "$project",
        )),
        _ => Err(CommandError::with_argument(
            ErrorCode::BadValue,
            "$project specification must be an object",
            "$project",
        )),
    }
}

fn limit_param(value: &Bson) -> Result<i64, CommandError> {
    let invalid = |reason: String| {
        CommandError::with_argument(
            ErrorCode::StageLimitInvalidArg,
            format!("invalid argument to $limit stage: {reason}"),
            "$limit",
        )
    };
    match get_whole_number_param(value) {
        Ok(0) => Err(CommandError::with_argument(
            ErrorCode::StageLimitZero,
            "The limit must be positive",
            "$limit",
        )),
        Ok(n) if n < 0 => Err(invalid(format!(
            "Expected a non-negative number in: $limit: {n}"
        ))),
        Ok(n) => Ok(n),
        Err(NumberError::UnexpectedType) => {
            Err(invalid(format!("Expected a number in: $limit: {value}")))
        }
        Err(NumberError::NotWholeNumber | NumberError::Infinity) => {
            Err(invalid(format!("Expected an integer: $limit: {value}")))
        }
        Err(NumberError::LongExceededPositive | NumberError::LongExceededNegative) => Err(
            invalid(format!("Cannot represent as a 64-bit integer: $limit: {value}")),
        ),
    }
}

fn skip_param(value: &Bson) -> Result<i64, CommandError> {
    let invalid = |reason: String| {
        CommandError::with_argument(
            ErrorCode::StageSkipBadValue,
            format!("invalid argument to $skip stage: {reason}"),
            "$skip",
        )
    };
    match get_whole_number_param(value) {
        Ok(n) if n < 0 => Err(invalid(format!(
            "Expected a non-negative number in: $skip: {n}"
        ))),
        Ok(n) => Ok(n),
        Err(NumberError::LongExceededPositive | NumberError::LongExceededNegative) => Err(
            invalid(format!("Cannot represent as a 64-bit integer: $skip: {value}")),
        ),
        Err(_) => Err(invalid(format!("Expected an integer: $skip: {value}"))),
    }
}

fn count_stage(value: &Bson, input: Input) -> Result<Stage, CommandError> {
    let err = |code, message: &str| CommandError::with_argument(code, message, "$count");
    let Bson::String(name) = value else {
        return Err(err(
            ErrorCode::StageCountNonString,
            "the count field must be a non-empty string",
        ));
    };
    if name.is_empty() {
        return Err(err(
            ErrorCode::StageCountNonEmptyString,
            "the count field must be a non-empty string",
        ));
    }
    if name.starts_with('$') {
        return Err(err(
            ErrorCode::StageCountBadPrefix,
            "the count field cannot be a $-prefixed path",
        ));
    }
    if name.contains('.') {
        return Err(err(
            ErrorCode::StageCountBadValue,
            "the count field cannot contain '.'",
        ));
    }

    let mut stage = Stage::new(input);
    stage.fields.push(StageField {
        name: name.clone(),
        kind: FieldType::Plain,
        sql: "COUNT(*)".into(),
    });
    // no rows in, no document out
    stage.having = Some("COUNT(*) > 0".into());
    Ok(stage)
}

#[cfg(test)]
mod tests {
    use bson::{bson, doc};

    use super::*;

    fn compile(pipeline: Vec<Bson>) -> Pipeline {
        compile_pipeline("t", &pipeline).unwrap()
    }

    fn compile_err(pipeline: Vec<Bson>) -> CommandError {
        match compile_pipeline("t", &pipeline) {
            Err(e) => e,
            Ok(p) => panic!("expected error, got {}", p.query.sql),
        }
    }

    #[test]
    fn empty_pipeline_selects_everything() {
        let p = compile(vec![]);
        assert_eq!(p.query.sql, "SELECT * FROM t");
        assert!(p.query.params.is_empty());
        assert!(p.post.is_empty());
    }

    #[test]
    fn match_sort_limit_share_a_stage() {
        let p = compile(vec![
            bson!({ "$match": { "a": true } }),
            bson!({ "$sort": { "b": -1 } }),
            bson!({ "$skip": 1 }),
            bson!({ "$limit": 2 }),
        ]);
        assert_eq!(
            p.query.sql,
            "SELECT * FROM t WHERE (_jsonb->'a' = $1::jsonb) ORDER BY _jsonb->'b' DESC \
             LIMIT 2 OFFSET 1"
        );
    }

    #[test]
    fn limit_before_skip_nests() {
        let p = compile(vec![bson!({ "$limit": 5 }), bson!({ "$skip": 2 })]);
        assert_eq!(
            p.query.sql,
            "SELECT * FROM (SELECT * FROM t LIMIT 5) AS query1 OFFSET 2"
        );
    }

    #[test]
    fn group_then_match_reads_columns() {
        let p = compile(vec![
            bson!({ "$match": { "kind": true } }),
            bson!({ "$group": { "_id": "$a", "n": { "$count": {} } } }),
            bson!({ "$match": { "n": { "$exists": true } } }),
        ]);
        assert!(p.query.sql.starts_with("SELECT jsonb_build_object('$k'"), "{}", p.query.sql);
        assert!(p.query.sql.contains("WHERE (\"n\" IS NOT NULL)"), "{}", p.query.sql);
        assert_eq!(p.query.params.len(), 1);
    }

    #[test]
    fn second_group_opens_a_segment() {
        let p = compile(vec![
            bson!({ "$group": { "_id": "$a", "n": { "$sum": 1 } } }),
            bson!({ "$group": { "_id": "$n" } }),
        ]);
        assert!(p.query.sql.contains(") AS segment1"), "{}", p.query.sql);
        assert!(p.query.sql.contains("GROUP BY _jsonb->'n'"), "{}", p.query.sql);
    }

    #[test]
    fn placeholders_follow_segments() {
        let p = compile(vec![
            bson!({ "$match": { "a": "x" } }),
            bson!({ "$group": { "_id": "$a" } }),
            bson!({ "$group": { "_id": "$_id" } }),
            bson!({ "$match": { "_id": "y" } }),
        ]);
        let first = p.query.sql.find("$1").unwrap();
        let second = p.query.sql.find("$2").unwrap();
        assert!(first < second, "{}", p.query.sql);
        assert_eq!(
            p.query.params,
            vec![SqlParam::Text("x".into()), SqlParam::Text("y".into())]
        );
    }

    #[test]
    fn count_stage_sql() {
        let p = compile(vec![bson!({ "$count": "total" })]);
        assert_eq!(
            p.query.sql,
            "SELECT jsonb_build_object('$k', jsonb_build_array('total'), 'total', \"total\") \
             AS _jsonb FROM (SELECT COUNT(*) AS \"total\" FROM t HAVING COUNT(*) > 0) AS wrapped"
        );
    }

    #[test]
    fn count_name_errors() {
        let cases = [
            (bson!(1), ErrorCode::StageCountNonString),
            (bson!(""), ErrorCode::StageCountNonEmptyString),
            (bson!("$n"), ErrorCode::StageCountBadPrefix),
            (bson!("a.b"), ErrorCode::StageCountBadValue),
        ];
        for (name, code) in cases {
            let err = compile_err(vec![bson!({ "$count": name.clone() })]);
            assert_eq!(err.code(), code, "$count: {name}");
        }
    }

    #[test]
    fn stage_shape_errors() {
        let err = compile_err(vec![bson!({ "$match": {}, "$limit": 1 })]);
        assert_eq!(err.code(), ErrorCode::StageInvalid);
        let err = compile_err(vec![bson!(1)]);
        assert_eq!(err.code(), ErrorCode::StageInvalid);

        let err = compile_err(vec![bson!({ "$frobnicate": {} })]);
        assert_eq!(err.code(), ErrorCode::UnrecognizedPipelineStage);
        assert_eq!(err.message(), "Unrecognized pipeline stage name: '$frobnicate'");

        let err = compile_err(vec![bson!({ "$unwind": "$a" })]);
        assert_eq!(err.code(), ErrorCode::NotImplemented);
    }

    #[test]
    fn limit_arguments() {
        let cases = [
            (bson!(0), ErrorCode::StageLimitZero, "The limit must be positive"),
            (
                bson!(-1),
                ErrorCode::StageLimitInvalidArg,
                "invalid argument to $limit stage: Expected a non-negative number in: $limit: -1",
            ),
            (
                bson!(1.5),
                ErrorCode::StageLimitInvalidArg,
                "invalid argument to $limit stage: Expected an integer: $limit: 1.5",
            ),
            (
                bson!("1"),
                ErrorCode::StageLimitInvalidArg,
                "invalid argument to $limit stage: Expected a number in: $limit: \"1\"",
            ),
        ];
        for (value, code, message) in cases {
            let err = compile_err(vec![bson!({ "$limit": value })]);
            assert_eq!(err.code(), code);
            assert_eq!(err.message(), message);
        }
        assert_eq!(
            compile(vec![bson!({ "$limit": 3.0 })]).query.sql,
            "SELECT * FROM t LIMIT 3"
        );
    }

    #[test]
    fn skip_arguments() {
        let err = compile_err(vec![bson!({ "$skip": -2 })]);
        assert_eq!(err.code(), ErrorCode::StageSkipBadValue);
        assert_eq!(
            err.message(),
            "invalid argument to $skip stage: Expected a non-negative number in: $skip: -2"
        );
        let err = compile_err(vec![bson!({ "$skip": "x" })]);
        assert_eq!(err.code(), ErrorCode::StageSkipBadValue);
        assert_eq!(
            compile(vec![bson!({ "$skip": 0 })]).query.sql,
            "SELECT * FROM t OFFSET 0"
        );
    }

    #[test]
    fn project_runs_in_process() {
        let p = compile(vec![
            bson!({ "$match": { "a": 1 } }),
            bson!({ "$project": { "a": 1, "_id": 0 } }),
            bson!({ "$skip": 1 }),
        ]);
        assert_eq!(p.post.len(), 2);
        let docs = p.apply_post(vec![doc! { "_id": 1, "a": 1, "b": 2 }, doc! { "_id": 2, "a": 1 }]);
        assert_eq!(docs, vec![doc! { "a": 1 }]);

        let err = compile_err(vec![
            bson!({ "$project": { "a": 1 } }),
            bson!({ "$match": { "a": 1 } }),
        ]);
        assert_eq!(err.code(), ErrorCode::NotImplemented);
    }

    #[test]
    fn find_without_constraints() {
        let q = compile_find("t", &doc! {}, &doc! {}, None, Some(0)).unwrap();
        assert_eq!(q.sql, "SELECT * FROM t");

        let q = compile_find("t", &doc! { "a": "x" }, &doc! { "a": 1 }, Some(2), Some(10)).unwrap();
        assert_eq!(
            q.sql,
            "SELECT * FROM t WHERE ((CASE WHEN jsonb_typeof(_jsonb->'a') = 'string' \
             THEN _jsonb->'a' #>> '{}' END) = $1) ORDER BY _jsonb->'a' LIMIT 10 OFFSET 2"
        );
        assert_eq!(q.params, vec![SqlParam::Text("x".into())]);
    }
}
