//! Storage encoding of documents in the `_jsonb` column.
//!
//! JSON has fewer types than BSON, so every BSON type that JSON can't carry
//! natively is wrapped in a single-key marker object:
//!
//! | BSON      | JSON                                              |
//! |-----------|---------------------------------------------------|
//! | document  | `{"$k": ["<key 1>", ...], "<key 1>": <value 1>, ...}` |
//! | array     | JSON array                                        |
//! | double    | `{"$f": <number>}` or `{"$f": "Infinity" \| "-Infinity" \| "NaN"}` |
//! | string    | JSON string                                       |
//! | binary    | `{"$b": "<base64>", "s": <subtype>}`              |
//! | ObjectId  | `{"$o": "<24 hex chars>"}`                        |
//! | bool      | JSON `true` / `false`                             |
//! | date-time | `{"$d": <milliseconds since epoch>}`              |
//! | null      | JSON `null`                                       |
//! | regex     | `{"$r": "<pattern>", "o": "<options>"}`           |
//! | int32     | JSON number                                       |
//! | timestamp | `{"$t": "<u64 as string>"}`                       |
//! | int64     | `{"$l": "<i64 as string>"}`                       |
//!
//! `$k` keeps the key order, which JSON objects don't guarantee.
//!
//! Decoding is lenient about bare numbers: a plain JSON number that is not an
//! int32 decodes as int64 or double. SQL aggregates (`count(*)`, `sum`)
//! produce those.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bson::oid::ObjectId;
use bson::spec::BinarySubtype;
use bson::{Binary, Bson, DateTime, Document, Timestamp};
use serde_json::{Map, Number, Value};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("fjson: {0}")]
    Json(#[from] serde_json::Error),
    #[error("fjson: unsupported type {0}")]
    UnsupportedType(&'static str),
    #[error("fjson: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::Invalid(msg.into())
}

// ── Encoding ────────────────────────────────────────────────────

/// Encodes a value into its storage JSON.
pub fn to_json(value: &Bson) -> Result<Value, Error> {
    let json = match value {
        Bson::Document(doc) => document_to_json(doc)?,
        Bson::Array(arr) => Value::Array(arr.iter().map(to_json).collect::<Result<_, _>>()?),
        Bson::Double(f) => marker("$f", double_to_json(*f)),
        Bson::String(s) => Value::String(s.clone()),
        Bson::Binary(bin) => {
            let mut m = Map::new();
            m.insert("$b".into(), Value::String(STANDARD.encode(&bin.bytes)));
            m.insert("s".into(), Value::from(u8::from(bin.subtype)));
            Value::Object(m)
        }
        Bson::ObjectId(oid) => marker("$o", Value::String(oid.to_hex())),
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::DateTime(dt) => marker("$d", Value::from(dt.timestamp_millis())),
        Bson::Null => Value::Null,
        Bson::RegularExpression(re) => {
            let mut m = Map::new();
            m.insert("$r".into(), Value::String(re.pattern.as_str().to_string()));
            m.insert("o".into(), Value::String(re.options.as_str().to_string()));
            Value::Object(m)
        }
        Bson::Int32(i) => Value::from(*i),
        Bson::Timestamp(ts) => marker("$t", Value::String(timestamp_to_u64(*ts).to_string())),
        Bson::Int64(i) => marker("$l", Value::String(i.to_string())),
        other => {
            return Err(Error::UnsupportedType(
                docsql_proto::alias_from_value(other),
            ));
        }
    };
    Ok(json)
}

/// Encodes a document, recording its key order under `$k`.
pub fn document_to_json(doc: &Document) -> Result<Value, Error> {
    let mut m = Map::with_capacity(doc.len() + 1);
    let keys: Vec<Value> = doc.keys().map(|k| Value::String(k.clone())).collect();
    m.insert("$k".into(), Value::Array(keys));
    for (k, v) in doc {
        m.insert(k.clone(), to_json(v)?);
    }
    Ok(Value::Object(m))
}

/// Encodes a value into storage JSON text.
pub fn marshal(value: &Bson) -> Result<String, Error> {
    Ok(serde_json::to_string(&to_json(value)?)?)
}

fn marker(key: &str, value: Value) -> Value {
    let mut m = Map::with_capacity(1);
    m.insert(key.to_string(), value);
    Value::Object(m)
}

fn double_to_json(f: f64) -> Value {
    if f.is_nan() {
        Value::String("NaN".into())
    } else if f == f64::INFINITY {
        Value::String("Infinity".into())
    } else if f == f64::NEG_INFINITY {
        Value::String("-Infinity".into())
    } else {
        // finite values always convert
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

pub(crate) fn timestamp_to_u64(ts: Timestamp) -> u64 {
    (u64::from(ts.time) << 32) | u64::from(ts.increment)
}

pub(crate) fn timestamp_from_u64(v: u64) -> Timestamp {
    Timestamp {
        time: (v >> 32) as u32,
        increment: v as u32,
    }
}

/// Builds a BSON regex, normalizing option order.
pub fn regex(pattern: &str, options: &str) -> Result<bson::Regex, Error> {
    let mut opts: Vec<char> = options.chars().collect();
    opts.sort_unstable();
    let options: String = opts.into_iter().collect();

    let pattern = bson::raw::CString::try_from(pattern)
        .map_err(|e| invalid(format!("invalid regex pattern: {e}")))?;
    let options = bson::raw::CString::try_from(options.as_str())
        .map_err(|e| invalid(format!("invalid regex options: {e}")))?;

    Ok(bson::Regex { pattern, options })
}

// ── Decoding ────────────────────────────────────────────────────

/// Decodes storage JSON into a value.
pub fn from_json(json: &Value) -> Result<Bson, Error> {
    match json {
        Value::Null => Ok(Bson::Null),
        Value::Bool(b) => Ok(Bson::Boolean(*b)),
        Value::String(s) => Ok(Bson::String(s.clone())),
        Value::Number(n) => Ok(plain_number(n)),
        Value::Array(arr) => Ok(Bson::Array(
            arr.iter().map(from_json).collect::<Result<_, _>>()?,
        )),
        Value::Object(m) => object_from_json(m),
    }
}

/// Decodes storage JSON text into a value.
pub fn unmarshal(data: &str) -> Result<Bson, Error> {
    let json: Value = serde_json::from_str(data)?;
    from_json(&json)
}

/// Decodes storage JSON into a document; anything else is an error.
pub fn document_from_json(json: &Value) -> Result<Document, Error> {
    match from_json(json)? {
        Bson::Document(doc) => Ok(doc),
        other => Err(invalid(format!(
            "expected document, got {}",
            docsql_proto::alias_from_value(&other)
        ))),
    }
}

fn plain_number(n: &Number) -> Bson {
    if let Some(i) = n.as_i64() {
        return match i32::try_from(i) {
            Ok(i) => Bson::Int32(i),
            Err(_) => Bson::Int64(i),
        };
    }
    Bson::Double(n.as_f64().unwrap_or(f64::NAN))
}

fn object_from_json(m: &Map<String, Value>) -> Result<Bson, Error> {
    if let Some(keys) = m.get("$k") {
        return keyed_document(keys, m).map(Bson::Document);
    }

    if let Some(v) = m.get("$f") {
        return match v {
            Value::Number(n) => n
                .as_f64()
                .map(Bson::Double)
                .ok_or_else(|| invalid(format!("invalid $f value {n}"))),
            Value::String(s) => match s.as_str() {
                "Infinity" => Ok(Bson::Double(f64::INFINITY)),
                "-Infinity" => Ok(Bson::Double(f64::NEG_INFINITY)),
                "NaN" => Ok(Bson::Double(f64::NAN)),
                s => Err(invalid(format!("invalid $f value {s:?}"))),
            },
            v => Err(invalid(format!("invalid $f value {v}"))),
        };
    }

    if let Some(v) = m.get("$l") {
        let s = v.as_str().ok_or_else(|| invalid("$l must be a string"))?;
        return s
            .parse::<i64>()
            .map(Bson::Int64)
            .map_err(|e| invalid(format!("invalid $l value {s:?}: {e}")));
    }

    if let Some(v) = m.get("$o") {
        let s = v.as_str().ok_or_else(|| invalid("$o must be a string"))?;
        return ObjectId::parse_str(s)
            .map(Bson::ObjectId)
            .map_err(|e| invalid(format!("invalid $o value {s:?}: {e}")));
    }

    if let Some(v) = m.get("$d") {
        let ms = v.as_i64().ok_or_else(|| invalid("$d must be an integer"))?;
        return Ok(Bson::DateTime(DateTime::from_millis(ms)));
    }

    if let Some(v) = m.get("$b") {
        let s = v.as_str().ok_or_else(|| invalid("$b must be a string"))?;
        let bytes = STANDARD
            .decode(s)
            .map_err(|e| invalid(format!("invalid $b value: {e}")))?;
        let subtype = m
            .get("s")
            .and_then(Value::as_u64)
            .and_then(|s| u8::try_from(s).ok())
            .ok_or_else(|| invalid("binary subtype must be a byte"))?;
        return Ok(Bson::Binary(Binary {
            subtype: BinarySubtype::from(subtype),
            bytes,
        }));
    }

    if let Some(v) = m.get("$r") {
        let pattern = v.as_str().ok_or_else(|| invalid("$r must be a string"))?;
        let options = m.get("o").and_then(Value::as_str).unwrap_or("");
        return Ok(Bson::RegularExpression(regex(pattern, options)?));
    }

    if let Some(v) = m.get("$t") {
        let s = v.as_str().ok_or_else(|| invalid("$t must be a string"))?;
        let n = s
            .parse::<u64>()
            .map_err(|e| invalid(format!("invalid $t value {s:?}: {e}")))?;
        return Ok(Bson::Timestamp(timestamp_from_u64(n)));
    }

    Err(invalid(format!(
        "unhandled object with keys {:?}",
        m.keys().collect::<Vec<_>>()
    )))
}

fn keyed_document(keys: &Value, m: &Map<String, Value>) -> Result<Document, Error> {
    let keys = keys
        .as_array()
        .ok_or_else(|| invalid("$k must be an array"))?;

    if keys.len() + 1 != m.len() {
        return Err(invalid(format!(
            "{} elements in $k, {} in total",
            keys.len(),
            m.len()
        )));
    }

    let mut doc = Document::new();
    for key in keys {
        let key = key
            .as_str()
            .ok_or_else(|| invalid("$k elements must be strings"))?;
        let value = m
            .get(key)
            .ok_or_else(|| invalid(format!("missing key {key:?}")))?;
        doc.insert(key, from_json(value)?);
    }
    Ok(doc)
}
