use std::fmt;

/// Positional parameter bound to a `$N` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    /// A document or value in its `_jsonb` encoding.
    Json(serde_json::Value),
}

impl fmt::Display for SqlParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlParam::Text(s) => write!(f, "{s:?}"),
            SqlParam::Json(v) => write!(f, "{v}"),
        }
    }
}
