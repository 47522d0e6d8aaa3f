//! Projection of fetched documents.
//!
//! Projections are validated up front and then applied in-process to each
//! document the backend returns.

use std::cmp::Ordering;

use bson::{Bson, Document};
use docsql_proto::{CommandError, ErrorCode, alias_from_value, compare_values, values_equal};

/// `$slice` argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slice {
    /// First `n` elements, or last `|n|` when negative.
    Count(f64),
    /// `[skip, limit]`; a negative skip counts from the end.
    Range { skip: i64, limit: i64 },
}

impl Slice {
    pub fn apply(&self, array: &[Bson]) -> Vec<Bson> {
        let len = array.len();
        match *self {
            Slice::Count(n) if n.is_nan() => Vec::new(),
            Slice::Count(n) if n.is_infinite() => array.to_vec(),
            Slice::Count(n) if n >= 0.0 => {
                let n = (n as usize).min(len);
                array[..n].to_vec()
            }
            Slice::Count(n) => {
                let n = ((-n) as usize).min(len);
                array[len - n..].to_vec()
            }
            Slice::Range { skip, limit } => {
                let start = if skip < 0 {
                    len.saturating_sub(skip.unsigned_abs() as usize)
                } else {
                    (skip as usize).min(len)
                };
                array[start..].iter().take(limit as usize).cloned().collect()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Op {
    Include,
    Exclude,
    /// A value set as a new field.
    Literal(Bson),
    Slice(Slice),
    ElemMatch(Document),
}

/// A validated projection document.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    inclusion: bool,
    fields: Vec<(String, Op)>,
}

impl Projection {
    /// Validates a projection document.
    ///
    /// Fields are either all included or all excluded; `_id` may be excluded
    /// from an inclusion projection and `$slice` fits either mode.
    pub fn new(projection: &Document) -> Result<Projection, CommandError> {
        let mut inclusion: Option<bool> = None;
        let mut fields = Vec::with_capacity(projection.len());

        for (key, value) in projection {
            if key.is_empty() {
                return Err(CommandError::with_argument(
                    ErrorCode::EmptyFieldPath,
                    "FieldPath cannot be constructed with empty string",
                    "projection",
                ));
            }
            if key.split('.').any(str::is_empty) {
                return Err(CommandError::with_argument(
                    ErrorCode::PathContainsEmptyElement,
                    "FieldPath field names may not be empty strings.",
                    "projection",
                ));
            }

            let op = match value {
                Bson::Document(d) => operator(key, d)?,
                Bson::Boolean(true) => Op::Include,
                Bson::Boolean(false) => Op::Exclude,
                Bson::Int32(0) | Bson::Int64(0) => Op::Exclude,
                Bson::Double(f) if *f == 0.0 => Op::Exclude,
                Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => Op::Include,
                v => Op::Literal(v.clone()),
            };

            let mode = match op {
                Op::Include | Op::Literal(_) | Op::ElemMatch(_) => Some(true),
                Op::Exclude => Some(false),
                Op::Slice(_) => None,
            };
            if let (Some(mode), false) = (mode, key == "_id") {
                match inclusion {
                    None => inclusion = Some(mode),
                    Some(true) if !mode => {
                        return Err(CommandError::with_argument(
                            ErrorCode::ProjectionExIn,
                            format!("Cannot do exclusion on field {key} in inclusion projection"),
                            "projection",
                        ));
                    }
                    Some(false) if mode => {
                        return Err(CommandError::with_argument(
                            ErrorCode::ProjectionInEx,
                            format!("Cannot do inclusion on field {key} in exclusion projection"),
                            "projection",
                        ));
                    }
                    Some(_) => {}
                }
            }
            fields.push((key.clone(), op));
        }

        let inclusion = inclusion.unwrap_or_else(|| {
            // a lone `_id: 1` keeps only the id
            matches!(fields.as_slice(), [(k, Op::Include | Op::Literal(_))] if k == "_id")
        });
        Ok(Projection { inclusion, fields })
    }

    pub fn is_inclusion(&self) -> bool {
        self.inclusion
    }

    pub fn apply(&self, doc: &Document) -> Document {
        let id_excluded = self
            .fields
            .iter()
            .any(|(k, op)| k == "_id" && *op == Op::Exclude);

        let mut out = if self.inclusion {
            let mut paths: Vec<Vec<&str>> = Vec::new();
            if !id_excluded {
                paths.push(vec!["_id"]);
            }
            for (key, op) in &self.fields {
                if matches!(op, Op::Include | Op::Slice(_) | Op::ElemMatch(_)) {
                    paths.push(key.split('.').collect());
                }
            }
            include(doc, &paths)
        } else {
            let mut out = doc.clone();
            for (key, op) in &self.fields {
                if *op == Op::Exclude {
                    let path: Vec<&str> = key.split('.').collect();
                    exclude(&mut out, &path);
                }
            }
            out
        };

        for (key, op) in &self.fields {
            match op {
                Op::Literal(v) => set_path(&mut out, key, v.clone()),
                Op::Slice(slice) => {
                    if let Some(Bson::Array(items)) = get_path_mut(&mut out, key) {
                        *items = slice.apply(items);
                    }
                }
                Op::ElemMatch(cond) => {
                    let found = match doc.get(key) {
                        Some(Bson::Array(items)) => items.iter().find(|e| elem_matches(e, cond)),
                        _ => None,
                    };
                    match found {
                        Some(e) => {
                            out.insert(key.clone(), Bson::Array(vec![e.clone()]));
                        }
                        None => {
                            out.remove(key);
                        }
                    }
                }
                Op::Include | Op::Exclude => {}
            }
        }
        out
    }
}

fn operator(key: &str, spec: &Document) -> Result<Op, CommandError> {
    let mut entries = spec.iter();
    match (entries.next(), entries.next()) {
        (Some((op, value)), None) if op == "$slice" => Ok(Op::Slice(parse_slice(value)?)),
        (Some((op, value)), None) if op == "$elemMatch" => {
            if key.contains('.') {
                return Err(CommandError::with_argument(
                    ErrorCode::BadValue,
                    "Cannot use $elemMatch projection on a nested field.",
                    "projection",
                ));
            }
            let Bson::Document(cond) = value else {
                return Err(CommandError::with_argument(
                    ErrorCode::BadValue,
                    format!(
                        "elemMatch: Invalid argument, object required, but got {}",
                        alias_from_value(value)
                    ),
                    "projection",
                ));
            };
            validate_condition(cond)?;
            Ok(Op::ElemMatch(cond.clone()))
        }
        _ => Err(CommandError::new(
            ErrorCode::NotImplemented,
            format!("projection expression {spec} is not supported"),
        )),
    }
}

fn parse_slice(value: &Bson) -> Result<Slice, CommandError> {
    let syntax = || {
        CommandError::with_argument(
            ErrorCode::InvalidArg,
            format!(
                "Invalid $slice syntax. The given syntax {{ $slice: {value} }} did not match the \
                 find() syntax: expected a number or an array of two numbers"
            ),
            "$slice",
        )
    };

    match value {
        Bson::Int32(n) => Ok(Slice::Count(f64::from(*n))),
        Bson::Int64(n) => Ok(Slice::Count(*n as f64)),
        Bson::Double(n) => Ok(Slice::Count(*n)),
        Bson::Array(args) => match args.as_slice() {
            [skip, limit] => {
                let Some(skip) = as_number(skip) else {
                    return Err(first_arg(skip));
                };
                let Some(limit) = as_number(limit) else {
                    return Err(CommandError::with_argument(
                        ErrorCode::InvalidArg,
                        format!(
                            "Second argument to $slice must be a numeric value, but is of type: {}",
                            alias_from_value(limit)
                        ),
                        "$slice",
                    ));
                };
                if limit <= 0 {
                    return Err(CommandError::with_argument(
                        ErrorCode::InvalidArg,
                        format!("Invalid $slice syntax. limit must be positive, got {limit}"),
                        "$slice",
                    ));
                }
                Ok(Slice::Range { skip, limit })
            }
            // the aggregation form takes the array first
            [first, _, _] if !matches!(first, Bson::Array(_)) => Err(first_arg(first)),
            [_, _, _] => Err(CommandError::with_argument(
                ErrorCode::NotImplemented,
                "$slice with an array argument is not implemented yet",
                "$slice",
            )),
            _ => Err(syntax()),
        },
        _ => Err(syntax()),
    }
}

fn first_arg(value: &Bson) -> CommandError {
    CommandError::with_argument(
        ErrorCode::SliceFirstArg,
        format!(
            "First argument to $slice must be an array, but is of type: {}",
            alias_from_value(value)
        ),
        "$slice",
    )
}

/// Numbers are truncated toward zero; NaN reads as zero.
fn as_number(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(f) => Some(*f as i64),
        _ => None,
    }
}

// ── Paths ───────────────────────────────────────────────────────

fn include(source: &Document, paths: &[Vec<&str>]) -> Document {
    let mut out = Document::new();
    for (key, value) in source {
        let matching: Vec<&Vec<&str>> = paths.iter().filter(|p| p[0] == key).collect();
        if matching.is_empty() {
            continue;
        }
        if matching.iter().any(|p| p.len() == 1) {
            out.insert(key.clone(), value.clone());
            continue;
        }
        let rest: Vec<Vec<&str>> = matching.iter().map(|p| p[1..].to_vec()).collect();
        match value {
            Bson::Document(d) => {
                out.insert(key.clone(), include(d, &rest));
            }
            Bson::Array(items) => {
                let projected: Vec<Bson> = items
                    .iter()
                    .filter_map(|e| match e {
                        Bson::Document(d) => Some(Bson::Document(include(d, &rest))),
                        _ => None,
                    })
                    .collect();
                out.insert(key.clone(), projected);
            }
            _ => {}
        }
    }
    out
}

fn exclude(doc: &mut Document, path: &[&str]) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        doc.remove(*first);
        return;
    }
    match doc.get_mut(*first) {
        Some(Bson::Document(d)) => exclude(d, rest),
        Some(Bson::Array(items)) => {
            for item in items {
                if let Bson::Document(d) = item {
                    exclude(d, rest);
                }
            }
        }
        _ => {}
    }
}

fn get_path_mut<'a>(doc: &'a mut Document, path: &str) -> Option<&'a mut Bson> {
    match path.split_once('.') {
        None => doc.get_mut(path),
        Some((first, rest)) => match doc.get_mut(first)? {
            Bson::Document(d) => get_path_mut(d, rest),
            _ => None,
        },
    }
}

fn set_path(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((first, rest)) => {
            if !matches!(doc.get(first), Some(Bson::Document(_))) {
                doc.insert(first, Document::new());
            }
            if let Some(Bson::Document(d)) = doc.get_mut(first) {
                set_path(d, rest, value);
            }
        }
    }
}

// ── $elemMatch ──────────────────────────────────────────────────

const COMPARISONS: &[&str] = &["$eq", "$ne", "$gt", "$gte", "$lt", "$lte"];

fn validate_condition(cond: &Document) -> Result<(), CommandError> {
    for (key, value) in cond {
        if key.starts_with('$') {
            check_comparison(key)?;
            continue;
        }
        if let Bson::Document(ops) = value {
            for op in ops.keys().filter(|k| k.starts_with('$')) {
                check_comparison(op)?;
            }
        }
    }
    Ok(())
}

fn check_comparison(op: &str) -> Result<(), CommandError> {
    if COMPARISONS.contains(&op) {
        return Ok(());
    }
    Err(CommandError::with_argument(
        ErrorCode::NotImplemented,
        format!("$elemMatch operator {op} is not implemented yet"),
        "projection",
    ))
}

fn elem_matches(elem: &Bson, cond: &Document) -> bool {
    cond.iter().all(|(key, expected)| {
        if key.starts_with('$') {
            return compare(elem, key, expected);
        }
        let Bson::Document(d) = elem else {
            return false;
        };
        let actual = d.get(key).unwrap_or(&Bson::Null);
        match expected {
            Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => {
                ops.iter().all(|(op, v)| compare(actual, op, v))
            }
            v => equal(actual, v),
        }
    })
}

fn equal(a: &Bson, b: &Bson) -> bool {
    compare_values(a, b) == Some(Ordering::Equal) || values_equal(a, b)
}

fn compare(actual: &Bson, op: &str, expected: &Bson) -> bool {
    let ord = compare_values(actual, expected);
    match op {
        "$eq" => equal(actual, expected),
        "$ne" => !equal(actual, expected),
        "$gt" => ord == Some(Ordering::Greater),
        "$gte" => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
        "$lt" => ord == Some(Ordering::Less),
        "$lte" => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
        _ => false,
    }
}
