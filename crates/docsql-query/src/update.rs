//! Update documents applied in-process to fetched documents.

use bson::{Bson, Document};
use docsql_proto::{CommandError, ErrorCode, alias_from_value, values_equal};

/// Update operators that exist but have no implementation.
const UNSUPPORTED_OPERATORS: &[&str] = &[
    "$addToSet",
    "$bit",
    "$currentDate",
    "$max",
    "$min",
    "$mul",
    "$pop",
    "$pull",
    "$pullAll",
    "$push",
    "$rename",
    "$setOnInsert",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Set,
    Unset,
    Inc,
}

impl UpdateOp {
    fn name(self) -> &'static str {
        match self {
            UpdateOp::Set => "$set",
            UpdateOp::Unset => "$unset",
            UpdateOp::Inc => "$inc",
        }
    }
}

/// A validated update document.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Whole-document replacement; `_id` is carried over.
    Replace(Document),
    Operators(Vec<(UpdateOp, Document)>),
}

impl Update {
    pub fn new(update: &Document) -> Result<Update, CommandError> {
        let operators = update.keys().next().is_some_and(|k| k.starts_with('$'));
        if !operators {
            if let Some(key) = update.keys().find(|k| k.starts_with('$')) {
                return Err(CommandError::new(
                    ErrorCode::DollarPrefixedFieldName,
                    format!("The dollar ($) prefixed field '{key}' in '{key}' is not valid for storage."),
                ));
            }
            return Ok(Update::Replace(update.clone()));
        }

        let mut ops = Vec::with_capacity(update.len());
        for (name, value) in update {
            let op = match name.as_str() {
                "$set" => UpdateOp::Set,
                "$unset" => UpdateOp::Unset,
                "$inc" => UpdateOp::Inc,
                n if UNSUPPORTED_OPERATORS.contains(&n) => {
                    return Err(CommandError::with_argument(
                        ErrorCode::NotImplemented,
                        format!("update operator {n} is not implemented yet"),
                        n,
                    ));
                }
                n => {
                    return Err(CommandError::new(
                        ErrorCode::FailedToParse,
                        format!(
                            "Unknown modifier: {n}. Expected a valid update modifier or \
                             pipeline-style update specified as an array"
                        ),
                    ));
                }
            };
            let Bson::Document(fields) = value else {
                return Err(CommandError::new(
                    ErrorCode::FailedToParse,
                    format!(
                        "Modifiers operate on fields but we found type {} instead. For example: \
                         {{$mod: {{<field>: ...}}}} not {{{name}: {value}}}",
                        alias_from_value(value)
                    ),
                ));
            };
            if op == UpdateOp::Inc {
                if let Some((field, v)) = fields.iter().find(|(_, v)| !is_number(v)) {
                    return Err(CommandError::new(
                        ErrorCode::TypeMismatch,
                        format!("Cannot increment with non-numeric argument: {{{field}: {v}}}"),
                    ));
                }
            }
            ops.push((op, fields.clone()));
        }

        check_conflicts(&ops)?;
        Ok(Update::Operators(ops))
    }

    /// Returns the updated copy of `doc`.
    pub fn apply(&self, doc: &Document) -> Result<Document, CommandError> {
        let updated = match self {
            Update::Replace(replacement) => {
                let mut out = Document::new();
                if let Some(id) = replacement.get("_id").or_else(|| doc.get("_id")) {
                    out.insert("_id", id.clone());
                }
                for (k, v) in replacement {
                    if k != "_id" {
                        out.insert(k.clone(), v.clone());
                    }
                }
                out
            }
            Update::Operators(ops) => {
                let mut out = doc.clone();
                for (op, fields) in ops {
                    for (path, value) in fields {
                        match op {
                            UpdateOp::Set => set_path(&mut out, path, value.clone())?,
                            UpdateOp::Unset => unset_path(&mut out, path),
                            UpdateOp::Inc => inc_path(&mut out, path, value)?,
                        }
                    }
                }
                out
            }
        };

        if let (Some(old), Some(new)) = (doc.get("_id"), updated.get("_id")) {
            if !values_equal(old, new) {
                return Err(CommandError::new(
                    ErrorCode::ImmutableField,
                    format!(
                        "After applying the update, the (immutable) field '_id' was found to \
                         have been altered to _id: {new}"
                    ),
                ));
            }
        }
        Ok(updated)
    }

    /// The document an upsert inserts: equality fields of `filter` with the
    /// update applied on top.
    pub fn upsert_document(&self, filter: &Document) -> Result<Document, CommandError> {
        match self {
            Update::Replace(_) => self.apply(&Document::new()),
            Update::Operators(_) => {
                let mut base = Document::new();
                for (k, v) in filter {
                    if k.starts_with('$') || k.contains('.') {
                        continue;
                    }
                    let is_operator = matches!(v, Bson::Document(d)
                        if d.keys().next().is_some_and(|k| k.starts_with('$')));
                    if !is_operator {
                        base.insert(k.clone(), v.clone());
                    }
                }
                self.apply(&base)
            }
        }
    }
}

fn is_number(v: &Bson) -> bool {
    matches!(v, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

fn check_conflicts(ops: &[(UpdateOp, Document)]) -> Result<(), CommandError> {
    let paths: Vec<&str> = ops
        .iter()
        .flat_map(|(_, fields)| fields.keys().map(String::as_str))
        .collect();
    for (i, a) in paths.iter().enumerate() {
        for b in &paths[i + 1..] {
            if overlaps(a, b) {
                return Err(CommandError::new(
                    ErrorCode::ConflictingUpdateOperators,
                    format!("Updating the path '{b}' would create a conflict at '{a}'"),
                ));
            }
        }
    }
    Ok(())
}

/// `a` and `a.b` overlap; `a` and `ab` do not.
fn overlaps(a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    long == short || (long.starts_with(short) && long.as_bytes()[short.len()] == b'.')
}

// ── Path operations ─────────────────────────────────────────────

/// Most null elements a positional `$set` may append to an array.
const MAX_ARRAY_PADDING: usize = 1_500_000;

fn not_viable(segment: &str, parent: &str, value: &Bson) -> CommandError {
    CommandError::new(
        ErrorCode::PathNotViable,
        format!("Cannot create field '{segment}' in element {{{parent}: {value}}}"),
    )
}

fn set_path(doc: &mut Document, path: &str, value: Bson) -> Result<(), CommandError> {
    let Some((first, rest)) = path.split_once('.') else {
        doc.insert(path, value);
        return Ok(());
    };
    if !doc.contains_key(first) {
        doc.insert(first, Document::new());
    }
    match doc.get_mut(first) {
        Some(child) => set_in(child, first, rest, value),
        None => Ok(()),
    }
}

fn set_in(target: &mut Bson, name: &str, path: &str, value: Bson) -> Result<(), CommandError> {
    match target {
        Bson::Document(d) => set_path(d, path, value),
        Bson::Array(items) => {
            let (segment, rest) = match path.split_once('.') {
                Some((s, r)) => (s, Some(r)),
                None => (path, None),
            };
            let Ok(index) = segment.parse::<usize>() else {
                return Err(not_viable(segment, name, &Bson::Array(items.clone())));
            };
            if index.saturating_sub(items.len()) > MAX_ARRAY_PADDING {
                return Err(CommandError::new(
                    ErrorCode::BadValue,
                    format!("can't backfill more than {MAX_ARRAY_PADDING} elements"),
                ));
            }
            if items.len() <= index {
                items.resize(index + 1, Bson::Null);
            }
            match rest {
                None => {
                    items[index] = value;
                    Ok(())
                }
                Some(rest) => {
                    if items[index] == Bson::Null {
                        items[index] = Bson::Document(Document::new());
                    }
                    set_in(&mut items[index], segment, rest, value)
                }
            }
        }
        other => {
            let segment = path.split('.').next().unwrap_or(path);
            Err(not_viable(segment, name, other))
        }
    }
}

fn unset_path(doc: &mut Document, path: &str) {
    let Some((first, rest)) = path.split_once('.') else {
        doc.remove(path);
        return;
    };
    match doc.get_mut(first) {
        Some(Bson::Document(d)) => unset_path(d, rest),
        Some(Bson::Array(items)) => {
            let (segment, rest) = match rest.split_once('.') {
                Some((s, r)) => (s, Some(r)),
                None => (rest, None),
            };
            let Some(item) = segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)) else {
                return;
            };
            match (rest, item) {
                // array elements are nulled, not removed
                (None, item) => *item = Bson::Null,
                (Some(rest), Bson::Document(d)) => unset_path(d, rest),
                _ => {}
            }
        }
        _ => {}
    }
}

fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    match path.split_once('.') {
        None => doc.get(path),
        Some((first, rest)) => match doc.get(first)? {
            Bson::Document(d) => get_path(d, rest),
            _ => None,
        },
    }
}

fn inc_path(doc: &mut Document, path: &str, by: &Bson) -> Result<(), CommandError> {
    let sum = match get_path(doc, path) {
        None => by.clone(),
        Some(current) => add(current, by).ok_or_else(|| {
            CommandError::new(
                ErrorCode::TypeMismatch,
                format!(
                    "Cannot apply $inc to a value of non-numeric type. {{_id: {}}} has the field \
                     '{path}' of non-numeric type {}",
                    doc.get("_id").unwrap_or(&Bson::Null),
                    alias_from_value(current)
                ),
            )
        })?,
    };
    set_path(doc, path, sum)
}

/// Numeric addition with int32 widening to int64 on overflow and int64
/// widening to double.
fn add(a: &Bson, b: &Bson) -> Option<Bson> {
    Some(match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => match x.checked_add(*y) {
            Some(n) => Bson::Int32(n),
            None => Bson::Int64(i64::from(*x) + i64::from(*y)),
        },
        (Bson::Int32(x), Bson::Int64(y)) | (Bson::Int64(y), Bson::Int32(x)) => {
            int64_sum(i64::from(*x), *y)
        }
        (Bson::Int64(x), Bson::Int64(y)) => int64_sum(*x, *y),
        (Bson::Double(x), y) | (y, Bson::Double(x)) => Bson::Double(x + as_f64(y)?),
        _ => return None,
    })
}

fn int64_sum(x: i64, y: i64) -> Bson {
    match x.checked_add(y) {
        Some(n) => Bson::Int64(n),
        None => Bson::Double(x as f64 + y as f64),
    }
}

fn as_f64(v: &Bson) -> Option<f64> {
    match v {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

impl std::fmt::Display for UpdateOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    fn apply(update: Document, doc: Document) -> Document {
        Update::new(&update).unwrap().apply(&doc).unwrap()
    }

    #[test]
    fn set_creates_nested_paths() {
        assert_eq!(
            apply(doc! { "$set": { "a.b": 1, "c": "x" } }, doc! { "_id": 1, "c": "y" }),
            doc! { "_id": 1, "c": "x", "a": { "b": 1 } }
        );
    }

    #[test]
    fn set_into_array_index() {
        assert_eq!(
            apply(doc! { "$set": { "arr.3": 9 } }, doc! { "_id": 1, "arr": [1, 2] }),
            doc! { "_id": 1, "arr": [1, 2, null, 9] }
        );
    }

    #[test]
    fn set_far_past_the_end_is_rejected() {
        let err = Update::new(&doc! { "$set": { "arr.99999999999": 1 } })
            .unwrap()
            .apply(&doc! { "_id": 1, "arr": [1] })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadValue);
        assert_eq!(err.message(), "can't backfill more than 1500000 elements");
    }

    #[test]
    fn set_through_scalar_fails() {
        let err = Update::new(&doc! { "$set": { "a.b": 1 } })
            .unwrap()
            .apply(&doc! { "_id": 1, "a": 5 })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PathNotViable);
        assert_eq!(err.message(), "Cannot create field 'b' in element {a: 5}");
    }

    #[test]
    fn unset_removes_fields_and_nulls_array_elements() {
        assert_eq!(
            apply(
                doc! { "$unset": { "a.b": "", "arr.0": 1, "missing": 1 } },
                doc! { "_id": 1, "a": { "b": 1, "c": 2 }, "arr": [1, 2] }
            ),
            doc! { "_id": 1, "a": { "c": 2 }, "arr": [null, 2] }
        );
    }

    #[test]
    fn inc_widens() {
        assert_eq!(
            apply(
                doc! { "$inc": { "a": 1, "b": 1.5, "c": 1, "d": 2 } },
                doc! { "_id": 1, "a": i32::MAX, "b": 1, "c": i64::MAX }
            ),
            doc! {
                "_id": 1,
                "a": i64::from(i32::MAX) + 1,
                "b": 2.5,
                "c": i64::MAX as f64 + 1.0,
                "d": 2,
            }
        );
    }

    #[test]
    fn inc_errors() {
        let err = Update::new(&doc! { "$inc": { "a": "x" } }).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TypeMismatch);

        let err = Update::new(&doc! { "$inc": { "a": 1 } })
            .unwrap()
            .apply(&doc! { "_id": 1, "a": "x" })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TypeMismatch);
        assert!(err.message().ends_with("of non-numeric type string"), "{}", err.message());
    }

    #[test]
    fn conflicting_paths() {
        let err = Update::new(&doc! { "$set": { "a": 1 }, "$inc": { "a.b": 1 } }).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConflictingUpdateOperators);
        assert_eq!(err.message(), "Updating the path 'a.b' would create a conflict at 'a'");

        assert!(Update::new(&doc! { "$set": { "a": 1 }, "$inc": { "ab": 1 } }).is_ok());
    }

    #[test]
    fn replacement_keeps_id() {
        assert_eq!(
            apply(doc! { "b": 2 }, doc! { "_id": 7, "a": 1 }),
            doc! { "_id": 7, "b": 2 }
        );
        let err = Update::new(&doc! { "_id": 8 })
            .unwrap()
            .apply(&doc! { "_id": 7 })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ImmutableField);
    }

    #[test]
    fn operator_errors() {
        let err = Update::new(&doc! { "$push": { "a": 1 } }).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotImplemented);

        let err = Update::new(&doc! { "$foo": { "a": 1 } }).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FailedToParse);

        let err = Update::new(&doc! { "$set": 1 }).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FailedToParse);

        let err = Update::new(&doc! { "a": 1, "$set": { "b": 1 } }).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DollarPrefixedFieldName);
    }

    #[test]
    fn upsert_starts_from_filter_equalities() {
        let update = Update::new(&doc! { "$inc": { "n": 1 } }).unwrap();
        assert_eq!(
            update
                .upsert_document(&doc! { "name": "x", "age": { "$gt": 3 }, "$or": [] })
                .unwrap(),
            doc! { "name": "x", "n": 1 }
        );
    }
}
