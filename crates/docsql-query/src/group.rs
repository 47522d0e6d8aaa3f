use bson::{Bson, Document};
use docsql_codec::fjson;
use docsql_proto::{CommandError, ErrorCode, alias_from_value};

use crate::path::{Input, field_to_sql, numeric_value, quote_literal};
use crate::stage::{FieldType, Stage, StageField};

/// Compiles a `$group` stage body. The stage reads stored documents.
pub fn group_stage(value: &Bson) -> Result<Stage, CommandError> {
    let Bson::Document(spec) = value else {
        return Err(CommandError::with_argument(
            ErrorCode::StageGroupInvalidFields,
            "a group's fields must be specified in an object",
            "$group",
        ));
    };
    let Some(id) = spec.get("_id") else {
        return Err(CommandError::with_argument(
            ErrorCode::StageGroupMissingID,
            "a group specification must include an _id",
            "$group",
        ));
    };

    let mut stage = Stage::new(Input::Document);
    let id = Expr::parse(id)?;
    let id_sql = id.to_jsonb();
    if id.has_field_refs() {
        stage.groups.push(id_sql.clone());
    } else {
        // one group over all input, none over empty input
        stage.having = Some("COUNT(*) > 0".into());
    }
    stage.fields.push(StageField {
        name: "_id".into(),
        kind: FieldType::Plain,
        sql: id_sql,
    });

    for (name, value) in spec {
        if name == "_id" {
            continue;
        }
        stage.fields.push(accumulator(name, value)?);
    }
    Ok(stage)
}

fn accumulator(name: &str, value: &Bson) -> Result<StageField, CommandError> {
    let Bson::Document(acc) = value else {
        return Err(CommandError::with_argument(
            ErrorCode::StageGroupInvalidAccumulator,
            format!("The field '{name}' must be an accumulator object"),
            "$group",
        ));
    };
    let mut ops = acc.iter();
    let (Some((op, operand)), None) = (ops.next(), ops.next()) else {
        return Err(CommandError::with_argument(
            ErrorCode::StageGroupMultipleAccumulator,
            format!("The field '{name}' must specify one accumulator"),
            "$group",
        ));
    };

    match op.as_str() {
        "$sum" | "$avg" => {
            if matches!(operand, Bson::Array(_)) {
                return Err(CommandError::with_argument(
                    ErrorCode::StageGroupUnaryOperator,
                    format!("The {op} accumulator is a unary operator"),
                    "$group",
                ));
            }
            let expr = Expr::parse(operand)?;
            Ok(if op == "$sum" {
                sum(name, &expr)
            } else {
                StageField {
                    name: name.to_string(),
                    kind: FieldType::Float,
                    sql: format!("AVG({})", expr.to_numeric()),
                }
            })
        }
        "$count" => Ok(StageField {
            name: name.to_string(),
            kind: FieldType::Plain,
            sql: "COUNT(*)".into(),
        }),
        "$min" | "$max" | "$first" | "$last" | "$push" | "$addToSet" | "$stdDevPop"
        | "$stdDevSamp" | "$mergeObjects" => Err(CommandError::with_argument(
            ErrorCode::NotImplemented,
            format!("accumulator {op} is not implemented yet"),
            op,
        )),
        _ => Err(CommandError::with_argument(
            ErrorCode::StageGroupInvalidAccumulator,
            format!("unknown group operator '{op}'"),
            op,
        )),
    }
}

/// `$sum` keeps integers integral unless any input was a double.
fn sum(name: &str, expr: &Expr) -> StageField {
    match expr {
        Expr::Literal(Bson::Int32(_) | Bson::Int64(_)) => StageField {
            name: name.to_string(),
            kind: FieldType::Plain,
            sql: format!("COUNT(*) * {}", expr.to_numeric()),
        },
        Expr::Literal(Bson::Double(_)) => StageField {
            name: name.to_string(),
            kind: FieldType::Float,
            sql: format!("COUNT(*) * {}", expr.to_numeric()),
        },
        Expr::Field(field) => {
            let path = field_to_sql(field, false);
            let total = format!("COALESCE(SUM({}), 0)", numeric_value(&path));
            StageField {
                name: name.to_string(),
                kind: FieldType::Plain,
                sql: format!(
                    "CASE WHEN COALESCE(bool_or(jsonb_typeof({path}) = 'object' AND {path} ? '$f'), FALSE) \
                     THEN jsonb_build_object('$f', {total}) ELSE to_jsonb({total}) END"
                ),
            }
        }
        // non-numeric literals add nothing
        Expr::Literal(_) => StageField {
            name: name.to_string(),
            kind: FieldType::Plain,
            sql: "0".into(),
        },
        _ => StageField {
            name: name.to_string(),
            kind: FieldType::Float,
            sql: format!("COALESCE(SUM({}), 0)", expr.to_numeric()),
        },
    }
}

// ── Expressions ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Arith {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// Expression over the grouped documents.
#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Field(String),
    Literal(Bson),
    Arith(Arith, Vec<Expr>),
    DateToString { format: String, date: Box<Expr> },
    /// Document with literal keys, built field by field.
    Object(Vec<(String, Expr)>),
}

impl Expr {
    fn parse(value: &Bson) -> Result<Expr, CommandError> {
        match value {
            Bson::String(s) if s.starts_with('$') => {
                let field = &s[1..];
                if field.is_empty() {
                    return Err(CommandError::with_argument(
                        ErrorCode::GroupInvalidFieldPath,
                        "'$' by itself is not a valid FieldPath",
                        "$group",
                    ));
                }
                if field.split('.').any(str::is_empty) {
                    return Err(CommandError::with_argument(
                        ErrorCode::PathContainsEmptyElement,
                        "FieldPath field names may not be empty strings.",
                        "$group",
                    ));
                }
                Ok(Expr::Field(field.to_string()))
            }
            Bson::Document(doc) => Self::parse_document(doc),
            Bson::Array(_) => Err(CommandError::with_argument(
                ErrorCode::NotImplemented,
                "array expressions are not implemented yet",
                "$group",
            )),
            v => Ok(Expr::Literal(v.clone())),
        }
    }

    fn parse_document(doc: &Document) -> Result<Expr, CommandError> {
        let mut entries = doc.iter();
        let Some((op, args)) = entries.next() else {
            return Ok(Expr::Object(Vec::new()));
        };
        if !op.starts_with('$') {
            return doc
                .iter()
                .map(|(k, v)| Ok((k.clone(), Expr::parse(v)?)))
                .collect::<Result<Vec<_>, CommandError>>()
                .map(Expr::Object);
        }
        if entries.next().is_some() {
            return Err(CommandError::with_argument(
                ErrorCode::InvalidPipelineOperator,
                format!(
                    "an expression specification must contain exactly one field, \
                     the name of the expression. Found {} fields",
                    doc.len()
                ),
                "$group",
            ));
        }

        let op = op.as_str();
        match op {
            "$add" => Self::arith(Arith::Add, op, args, None),
            "$multiply" => Self::arith(Arith::Multiply, op, args, None),
            "$subtract" => Self::arith(Arith::Subtract, op, args, Some(2)),
            "$divide" => Self::arith(Arith::Divide, op, args, Some(2)),
            "$dateToString" => Self::date_to_string(args),
            "$sum" | "$avg" | "$min" | "$max" | "$concat" | "$cond" | "$ifNull" | "$toUpper"
            | "$toLower" | "$year" | "$month" | "$dayOfMonth" | "$mod" | "$abs" => {
                Err(CommandError::with_argument(
                    ErrorCode::NotImplemented,
                    format!("expression {op} is not implemented yet"),
                    op,
                ))
            }
            _ => Err(CommandError::with_argument(
                ErrorCode::InvalidPipelineOperator,
                format!("Unrecognized expression '{op}'"),
                op,
            )),
        }
    }

    fn arith(kind: Arith, op: &str, args: &Bson, arity: Option<usize>) -> Result<Expr, CommandError> {
        let operands = match args {
            Bson::Array(items) => items.iter().map(Expr::parse).collect::<Result<Vec<_>, _>>()?,
            v => vec![Expr::parse(v)?],
        };
        if let Some(n) = arity {
            if operands.len() != n {
                return Err(CommandError::with_argument(
                    ErrorCode::BadValue,
                    format!(
                        "Expression {op} takes exactly {n} arguments. {} were passed in.",
                        operands.len()
                    ),
                    op,
                ));
            }
        }
        Ok(Expr::Arith(kind, operands))
    }

    fn date_to_string(args: &Bson) -> Result<Expr, CommandError> {
        let Bson::Document(args) = args else {
            return Err(CommandError::with_argument(
                ErrorCode::BadValue,
                format!(
                    "$dateToString only supports an object as its argument, got {}",
                    alias_from_value(args)
                ),
                "$dateToString",
            ));
        };
        let format = match args.get("format") {
            None => "%Y-%m-%dT%H:%M:%S.%LZ".to_string(),
            Some(Bson::String(f)) => f.clone(),
            Some(v) => {
                return Err(CommandError::with_argument(
                    ErrorCode::BadValue,
                    format!("$dateToString requires that 'format' be a string, found: {v}"),
                    "$dateToString",
                ));
            }
        };
        let Some(date) = args.get("date") else {
            return Err(CommandError::with_argument(
                ErrorCode::BadValue,
                "Missing 'date' parameter to $dateToString",
                "$dateToString",
            ));
        };
        for key in args.keys() {
            if key != "format" && key != "date" {
                return Err(CommandError::with_argument(
                    ErrorCode::BadValue,
                    format!("Unrecognized parameter to $dateToString: {key}"),
                    "$dateToString",
                ));
            }
        }
        to_char_format(&format)?;
        Ok(Expr::DateToString {
            format,
            date: Box::new(Expr::parse(date)?),
        })
    }

    fn has_field_refs(&self) -> bool {
        match self {
            Expr::Field(_) => true,
            Expr::Literal(_) => false,
            Expr::Arith(_, operands) => operands.iter().any(Expr::has_field_refs),
            Expr::DateToString { date, .. } => date.has_field_refs(),
            Expr::Object(fields) => fields.iter().any(|(_, e)| e.has_field_refs()),
        }
    }

    /// The value as jsonb in its stored encoding.
    fn to_jsonb(&self) -> String {
        match self {
            Expr::Field(field) => field_to_sql(field, false),
            Expr::Literal(v) => match fjson::to_json(v) {
                Ok(json) => format!("{}::jsonb", quote_literal(&json.to_string())),
                Err(_) => "'null'::jsonb".to_string(),
            },
            Expr::Arith(..) => format!("to_jsonb({})", self.to_numeric()),
            Expr::DateToString { format, date } => {
                let millis = format!("({}->>'$d')::numeric", date.to_jsonb());
                // validated at parse time
                let pattern = to_char_format(format).unwrap_or_default();
                format!(
                    "to_jsonb(TO_CHAR(TO_TIMESTAMP({millis} / 1000) AT TIME ZONE 'UTC', {}))",
                    quote_literal(&pattern)
                )
            }
            Expr::Object(fields) => {
                let keys: Vec<String> = fields.iter().map(|(k, _)| quote_literal(k)).collect();
                let mut sql = format!(
                    "jsonb_build_object('$k', jsonb_build_array({})",
                    keys.join(", ")
                );
                for (key, expr) in fields {
                    sql.push_str(&format!(", {}, {}", quote_literal(key), expr.to_jsonb()));
                }
                sql.push(')');
                sql
            }
        }
    }

    /// The value as SQL `numeric`, NULL when it is not a number.
    fn to_numeric(&self) -> String {
        match self {
            Expr::Field(field) => numeric_value(&field_to_sql(field, false)),
            Expr::Literal(Bson::Int32(i)) => i.to_string(),
            Expr::Literal(Bson::Int64(i)) => i.to_string(),
            Expr::Literal(Bson::Double(f)) if f.is_finite() => format!("{f:?}::numeric"),
            Expr::Literal(Bson::Double(f)) if f.is_nan() => "'NaN'::numeric".into(),
            Expr::Literal(Bson::Double(f)) if *f > 0.0 => "'Infinity'::numeric".into(),
            Expr::Literal(Bson::Double(_)) => "'-Infinity'::numeric".into(),
            Expr::Literal(_) | Expr::Object(_) | Expr::DateToString { .. } => "NULL::numeric".into(),
            Expr::Arith(kind, operands) => {
                let sep = match kind {
                    Arith::Add => " + ",
                    Arith::Subtract => " - ",
                    Arith::Multiply => " * ",
                    Arith::Divide => " / ",
                };
                let parts: Vec<String> = operands.iter().map(Expr::to_numeric).collect();
                if parts.is_empty() {
                    return match kind {
                        Arith::Multiply => "1".into(),
                        _ => "0".into(),
                    };
                }
                format!("({})", parts.join(sep))
            }
        }
    }
}

/// Translates a `$dateToString` format into a `TO_CHAR` pattern.
fn to_char_format(format: &str) -> Result<String, CommandError> {
    let mut out = String::new();
    let mut literal = String::new();
    let mut chars = format.chars();

    let flush = |out: &mut String, literal: &mut String| {
        if !literal.is_empty() {
            out.push('"');
            out.push_str(&literal.replace('"', "\\\""));
            out.push('"');
            literal.clear();
        }
    };

    while let Some(c) = chars.next() {
        if c != '%' {
            literal.push(c);
            continue;
        }
        let spec = match chars.next() {
            Some('Y') => "YYYY",
            Some('m') => "MM",
            Some('d') => "DD",
            Some('H') => "HH24",
            Some('M') => "MI",
            Some('S') => "SS",
            Some('L') => "MS",
            Some('j') => "DDD",
            Some('%') => {
                literal.push('%');
                continue;
            }
            Some(other) => {
                return Err(CommandError::with_argument(
                    ErrorCode::BadValue,
                    format!("Invalid format character '%{other}' in format string"),
                    "$dateToString",
                ));
            }
            None => {
                return Err(CommandError::with_argument(
                    ErrorCode::BadValue,
                    "Unmatched '%' at end of format string",
                    "$dateToString",
                ));
            }
        };
        flush(&mut out, &mut literal);
        out.push_str(spec);
    }
    flush(&mut out, &mut literal);
    Ok(out)
}
