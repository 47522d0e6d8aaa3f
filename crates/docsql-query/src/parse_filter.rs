use bson::{Bson, Document};
use docsql_proto::{
    CommandError, ErrorCode, NumberError, TypeCode, alias_from_value, get_whole_number_param,
};

use crate::filter::{FilterTree, LogicalOp, NodeId, Operand};
use crate::path::{Input, parse_field, quote_ident};

/// Compiles a query filter document into a [`FilterTree`].
///
/// Follows MongoDB query semantics:
/// - the top-level document is an implicit AND of its entries
/// - `{field: value}` is an implicit `$eq`, with regular expression values
///   matching strings
/// - `{field: {$op: value, ...}}` holds one or more operators
/// - `$and`, `$or` and `$nor` take non-empty arrays of filter documents
pub fn parse_filter(filter: &Document, input: Input) -> Result<FilterTree, CommandError> {
    let mut tree = FilterTree::new();
    let root = tree.root();
    add_document(&mut tree, root, filter, input)?;
    Ok(tree)
}

fn add_document(
    tree: &mut FilterTree,
    parent: NodeId,
    filter: &Document,
    input: Input,
) -> Result<(), CommandError> {
    for (key, value) in filter {
        match key.as_str() {
            "$and" => {
                let and = tree.add_op(parent, LogicalOp::And)?;
                add_logical_array(tree, and, key, value, input)?;
            }
            "$or" => {
                let or = tree.add_op(parent, LogicalOp::Or)?;
                add_logical_array(tree, or, key, value, input)?;
            }
            "$nor" => {
                let not = tree.add_unary_op(parent)?;
                let or = tree.add_op(not, LogicalOp::Or)?;
                add_logical_array(tree, or, key, value, input)?;
            }
            k if k.starts_with('$') => {
                return Err(CommandError::with_argument(
                    ErrorCode::BadValue,
                    format!("unknown top level operator: {k}"),
                    k,
                ));
            }
            field => add_field_condition(tree, parent, field, value, input)?,
        }
    }
    Ok(())
}

/// Adds each element of a `$and`/`$or`/`$nor` array as a conjunction under
/// `parent`.
fn add_logical_array(
    tree: &mut FilterTree,
    parent: NodeId,
    op: &str,
    value: &Bson,
    input: Input,
) -> Result<(), CommandError> {
    let Bson::Array(elements) = value else {
        return Err(CommandError::with_argument(
            ErrorCode::BadValue,
            format!("{op} must be an array"),
            op,
        ));
    };
    if elements.is_empty() {
        return Err(CommandError::with_argument(
            ErrorCode::BadValue,
            "$and/$or/$nor must be a nonempty array",
            op,
        ));
    }

    for element in elements {
        let Bson::Document(doc) = element else {
            return Err(CommandError::with_argument(
                ErrorCode::BadValue,
                "$or/$and/$nor entries need to be full objects",
                op,
            ));
        };
        let and = tree.add_op(parent, LogicalOp::And)?;
        add_document(tree, and, doc, input)?;
    }
    Ok(())
}

fn add_field_condition(
    tree: &mut FilterTree,
    parent: NodeId,
    field: &str,
    value: &Bson,
    input: Input,
) -> Result<(), CommandError> {
    if let Bson::Document(doc) = value {
        if doc.keys().next().is_some_and(|k| k.starts_with('$')) {
            return add_operators(tree, parent, field, doc, input);
        }
    }
    match value {
        Bson::RegularExpression(re) => {
            add_regex(tree, parent, field, re.pattern.as_str(), re.options.as_str())
        }
        v => add_eq(tree, parent, field, v, input),
    }
}

/// Equality; `null` also matches documents without the field.
fn add_eq(
    tree: &mut FilterTree,
    parent: NodeId,
    field: &str,
    value: &Bson,
    input: Input,
) -> Result<(), CommandError> {
    if *value == Bson::Null {
        let or = tree.add_op(parent, LogicalOp::Or)?;
        tree.add_filter(or, "", field, "=", value)?;
        let not = tree.add_unary_op(or)?;
        return add_exists(tree, not, field, input);
    }
    tree.add_filter(parent, "", field, "=", value)?;
    Ok(())
}

fn add_operators(
    tree: &mut FilterTree,
    parent: NodeId,
    field: &str,
    ops: &Document,
    input: Input,
) -> Result<(), CommandError> {
    for (op, value) in ops {
        match op.as_str() {
            "$eq" => add_eq(tree, parent, field, value, input)?,
            "$ne" => {
                let not = tree.add_unary_op(parent)?;
                add_eq(tree, not, field, value, input)?;
            }
            "$gt" => {
                tree.add_filter(parent, "", field, ">", value)?;
            }
            "$gte" => {
                tree.add_filter(parent, "", field, ">=", value)?;
            }
            "$lt" => {
                tree.add_filter(parent, "", field, "<", value)?;
            }
            "$lte" => {
                tree.add_filter(parent, "", field, "<=", value)?;
            }
            "$in" => {
                let or = tree.add_op(parent, LogicalOp::Or)?;
                add_in(tree, or, field, op, value, input)?;
            }
            "$nin" => {
                let not = tree.add_unary_op(parent)?;
                let or = tree.add_op(not, LogicalOp::Or)?;
                add_in(tree, or, field, op, value, input)?;
            }
            "$exists" => {
                if truthy(value) {
                    add_exists(tree, parent, field, input)?;
                } else {
                    let not = tree.add_unary_op(parent)?;
                    add_exists(tree, not, field, input)?;
                }
            }
            "$regex" => {
                let options = match ops.get("$options") {
                    None => None,
                    Some(Bson::String(s)) => Some(s.as_str()),
                    Some(_) => {
                        return Err(CommandError::with_argument(
                            ErrorCode::BadValue,
                            "$options has to be a string",
                            "$options",
                        ));
                    }
                };
                match value {
                    Bson::String(pattern) => {
                        add_regex(tree, parent, field, pattern, options.unwrap_or_default())?
                    }
                    Bson::RegularExpression(re) => {
                        if options.is_some() && !re.options.as_str().is_empty() {
                            return Err(CommandError::with_argument(
                                ErrorCode::BadValue,
                                "options set in both $regex and $options",
                                "$regex",
                            ));
                        }
                        let opts = options.unwrap_or(re.options.as_str());
                        add_regex(tree, parent, field, re.pattern.as_str(), opts)?
                    }
                    _ => {
                        return Err(CommandError::with_argument(
                            ErrorCode::BadValue,
                            "$regex has to be a string",
                            "$regex",
                        ));
                    }
                }
            }
            "$options" => {
                if !ops.contains_key("$regex") {
                    return Err(CommandError::with_argument(
                        ErrorCode::BadValue,
                        "$options needs a $regex",
                        "$options",
                    ));
                }
            }
            "$not" => {
                let not = tree.add_unary_op(parent)?;
                match value {
                    Bson::Document(inner) if inner.is_empty() => {
                        return Err(CommandError::with_argument(
                            ErrorCode::BadValue,
                            "$not cannot be empty",
                            "$not",
                        ));
                    }
                    Bson::Document(inner) => {
                        let and = tree.add_op(not, LogicalOp::And)?;
                        add_operators(tree, and, field, inner, input)?;
                    }
                    Bson::RegularExpression(re) => {
                        add_regex(tree, not, field, re.pattern.as_str(), re.options.as_str())?
                    }
                    _ => {
                        return Err(CommandError::with_argument(
                            ErrorCode::BadValue,
                            "$not needs a regex or a document",
                            "$not",
                        ));
                    }
                }
            }
            "$size" => add_size(tree, parent, field, value, input)?,
            "$type" => add_type(tree, parent, field, value, input)?,
            "$all" | "$elemMatch" | "$mod" | "$bitsAllSet" | "$bitsAllClear" | "$bitsAnySet"
            | "$bitsAnyClear" | "$expr" | "$jsonSchema" | "$where" | "$text" | "$near"
            | "$geoWithin" | "$geoIntersects" => {
                return Err(CommandError::with_argument(
                    ErrorCode::NotImplemented,
                    format!("filter operator {op} is not implemented yet"),
                    op,
                ));
            }
            _ => {
                return Err(CommandError::with_argument(
                    ErrorCode::BadValue,
                    format!("unknown operator: {op}"),
                    op,
                ));
            }
        }
    }
    Ok(())
}

fn add_in(
    tree: &mut FilterTree,
    or: NodeId,
    field: &str,
    op: &str,
    value: &Bson,
    input: Input,
) -> Result<(), CommandError> {
    let Bson::Array(candidates) = value else {
        return Err(CommandError::with_argument(
            ErrorCode::BadValue,
            format!("{op} needs an array"),
            op,
        ));
    };
    for candidate in candidates {
        match candidate {
            Bson::RegularExpression(re) => {
                add_regex(tree, or, field, re.pattern.as_str(), re.options.as_str())?
            }
            v => add_eq(tree, or, field, v, input)?,
        }
    }
    Ok(())
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(f) => *f != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

/// Key presence test on the enclosing document.
fn add_exists(
    tree: &mut FilterTree,
    parent: NodeId,
    field: &str,
    input: Input,
) -> Result<(), CommandError> {
    let (key, enclosing) = parse_field(field);
    if enclosing.is_empty() && input == Input::Columns {
        tree.add_raw_filter(parent, &quote_ident(key), "%s IS NOT NULL", None)?;
        return Ok(());
    }
    let sql = input.path(enclosing, false);
    tree.add_raw_filter(parent, &sql, "?", Some(Operand::Text(key.to_string())))?;
    Ok(())
}

/// Translates regular expression options into embedded options understood
/// by the backend's regex engine.
///
/// Without options `.` must not match a newline and `^`/`$` anchor the whole
/// string, which is `p`. `m` makes the anchors line-aware (`n`), `s` lets `.`
/// cross newlines (no flag) and both together are `w`.
fn regex_flags(options: &str) -> Result<String, CommandError> {
    let mut flags = String::new();
    let (mut multiline, mut dot_all) = (false, false);
    for c in options.chars() {
        match c {
            'i' => flags.push('i'),
            'x' => flags.push('x'),
            'm' => multiline = true,
            's' => dot_all = true,
            c => {
                return Err(CommandError::with_argument(
                    ErrorCode::BadRegexOption,
                    format!("invalid flag in regex options: {c}"),
                    "$options",
                ));
            }
        }
    }
    match (multiline, dot_all) {
        (false, false) => flags.push('p'),
        (true, false) => flags.push('n'),
        (true, true) => flags.push('w'),
        (false, true) => {}
    }
    Ok(flags)
}

fn add_regex(
    tree: &mut FilterTree,
    parent: NodeId,
    field: &str,
    pattern: &str,
    options: &str,
) -> Result<(), CommandError> {
    let flags = regex_flags(options)?;
    let pattern = if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{flags}){pattern}")
    };
    tree.add_filter(parent, "", field, "~", &Bson::String(pattern))?;
    Ok(())
}

fn add_size(
    tree: &mut FilterTree,
    parent: NodeId,
    field: &str,
    value: &Bson,
    input: Input,
) -> Result<(), CommandError> {
    let size = match get_whole_number_param(value) {
        Ok(n) if n < 0 => {
            return Err(CommandError::with_argument(
                ErrorCode::BadValue,
                format!("Failed to parse $size. Expected a non-negative number in: $size: {n}"),
                "$size",
            ));
        }
        Ok(n) => n,
        Err(NumberError::UnexpectedType) => {
            return Err(CommandError::with_argument(
                ErrorCode::BadValue,
                format!("Failed to parse $size. Expected a number in: $size: {value}"),
                "$size",
            ));
        }
        Err(_) => {
            return Err(CommandError::with_argument(
                ErrorCode::BadValue,
                format!("Failed to parse $size. Expected an integer in: $size: {value}"),
                "$size",
            ));
        }
    };

    let path = input.path(field, false);
    let sql = format!("jsonb_array_length(CASE WHEN jsonb_typeof({path}) = 'array' THEN {path} END)");
    let operand = Operand::from_value(&Bson::Int64(size))?;
    tree.add_raw_filter(parent, &sql, "=", Some(operand))?;
    Ok(())
}

fn add_type(
    tree: &mut FilterTree,
    parent: NodeId,
    field: &str,
    value: &Bson,
    input: Input,
) -> Result<(), CommandError> {
    let codes = match value {
        Bson::Array(items) => items.iter().map(type_code).collect::<Result<Vec<_>, _>>()?,
        v => vec![type_code(v)?],
    };

    let path = input.path(field, false);
    let or = tree.add_op(parent, LogicalOp::Or)?;
    for code in codes {
        tree.add_raw_filter(or, &path, &type_predicate(code), None)?;
    }
    Ok(())
}

fn type_code(value: &Bson) -> Result<TypeCode, CommandError> {
    match value {
        Bson::String(alias) => TypeCode::parse_alias(alias),
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => match get_whole_number_param(value) {
            Ok(code) => i32::try_from(code)
                .map_err(|_| {
                    CommandError::new(
                        ErrorCode::BadValue,
                        format!("Invalid numerical type code: {value}"),
                    )
                })
                .and_then(TypeCode::from_code),
            Err(_) => Err(CommandError::new(
                ErrorCode::BadValue,
                format!("Invalid numerical type code: {value}"),
            )),
        },
        v => Err(CommandError::new(
            ErrorCode::TypeMismatch,
            format!("type must be represented as a number or a string, got {}", alias_from_value(v)),
        )),
    }
}

/// Template matching values of the given type; `%s` is the field.
fn type_predicate(code: TypeCode) -> String {
    let marker = |m: &str| format!("(jsonb_typeof(%s) = 'object' AND %s ? '{m}')");
    let json_type = |t: &str| format!("jsonb_typeof(%s) = '{t}'");
    match code {
        TypeCode::Double => marker("$f"),
        TypeCode::String => json_type("string"),
        TypeCode::Object => marker("$k"),
        TypeCode::Array => json_type("array"),
        TypeCode::BinData => marker("$b"),
        TypeCode::ObjectId => marker("$o"),
        TypeCode::Bool => json_type("boolean"),
        TypeCode::Date => marker("$d"),
        TypeCode::Null => json_type("null"),
        TypeCode::Regex => marker("$r"),
        TypeCode::Int => json_type("number"),
        TypeCode::Timestamp => marker("$t"),
        TypeCode::Long => marker("$l"),
        TypeCode::Number => format!(
            "({} OR {} OR {})",
            json_type("number"),
            marker("$f"),
            marker("$l")
        ),
    }
}
