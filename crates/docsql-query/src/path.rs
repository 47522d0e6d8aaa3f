//! Field path resolution over the `_jsonb` document column or over the
//! flat columns a grouping stage produces.

/// Column holding each stored document.
pub const DOCUMENT_COLUMN: &str = "_jsonb";

/// What the rows feeding a stage look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// One `_jsonb` column per row.
    Document,
    /// Named columns produced by an earlier stage with output fields.
    Columns,
}

impl Input {
    /// Resolves a dotted path to a SQL expression. With `text` set the last
    /// segment is extracted as text, otherwise as jsonb.
    pub fn path(self, field: &str, text: bool) -> String {
        match self {
            Input::Document => field_to_sql(field, text),
            Input::Columns => {
                let mut segments = field.split('.');
                let column = segments.next().unwrap_or_default();
                let base = format!("to_jsonb({})", quote_ident(column));
                let rest: Vec<&str> = segments.collect();
                if rest.is_empty() && text {
                    return format!("({base} #>> '{{}}')");
                }
                json_path(base, &rest, text)
            }
        }
    }
}

/// Renders `a.b.c` as `_jsonb->'a'->'b'->'c'`, or with `->>` on the last
/// segment when `text` is set. An empty field is the whole document.
pub fn field_to_sql(field: &str, text: bool) -> String {
    if field.is_empty() {
        return DOCUMENT_COLUMN.to_string();
    }
    let segments: Vec<&str> = field.split('.').collect();
    json_path(DOCUMENT_COLUMN.to_string(), &segments, text)
}

fn json_path(mut sql: String, segments: &[&str], text: bool) -> String {
    for (i, segment) in segments.iter().enumerate() {
        let op = if text && i + 1 == segments.len() { "->>" } else { "->" };
        sql.push_str(op);
        sql.push_str(&quote_literal(segment));
    }
    sql
}

/// Splits `a.b.c` into (`c`, `a.b`).
pub fn parse_field(field: &str) -> (&str, &str) {
    match field.rsplit_once('.') {
        Some((parent, key)) => (key, parent),
        None => (field, ""),
    }
}

/// Numeric value of a jsonb expression: plain numbers, `{"$f": ...}` and
/// `{"$l": ...}` markers are read as `numeric`, anything else is NULL.
pub fn numeric_value(expr: &str) -> String {
    format!(
        "(CASE WHEN jsonb_typeof({expr}) = 'number' THEN ({expr})::numeric \
         WHEN jsonb_typeof({expr}) = 'object' AND ({expr} ? '$f') THEN ({expr}->>'$f')::numeric \
         WHEN jsonb_typeof({expr}) = 'object' AND ({expr} ? '$l') THEN ({expr}->>'$l')::numeric END)"
    )
}

/// Text of a jsonb expression when it holds a string, NULL otherwise.
pub fn string_value(expr: &str) -> String {
    format!("(CASE WHEN jsonb_typeof({expr}) = 'string' THEN {expr} #>> '{{}}' END)")
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
