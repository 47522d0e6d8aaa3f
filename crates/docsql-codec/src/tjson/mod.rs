//! Schema-carrying JSON codec for typed backends.
//!
//! Values are encoded as JSON whose shape is described by a [`Schema`]:
//!
//! | BSON      | JSON                                   | schema                      |
//! |-----------|----------------------------------------|-----------------------------|
//! | document  | `{"$k": [keys...], "<key>": <value>}`  | object + properties         |
//! | double    | JSON number                            | number (double)             |
//! | string    | JSON string                            | string                      |
//! | binary    | `{"$b": "<base64>", "s": <subtype>}`   | object {$b, s}              |
//! | ObjectId  | base64 string of 12 bytes              | string (byte)               |
//! | ObjectId  | `{"$o": "<hex>"}`                      | object {$o}                 |
//! | bool      | JSON `true` / `false`                  | boolean                     |
//! | date-time | RFC 3339 string                        | string (date-time)          |
//! | null      | JSON `null`                            | none                        |
//! | regex     | `{"$r": "<pattern>", "o": "<options>"}`| object {$r, o}              |
//! | int32     | JSON number                            | integer (int32)             |
//! | timestamp | `{"$t": "<u64 as string>"}`            | object {$t}                 |
//! | int64     | JSON number                            | integer (int64 or empty)    |
//!
//! Arrays are not supported.

mod schema;

pub use schema::{Schema, SchemaFormat, SchemaType, document_schema, empty_schema};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bson::oid::ObjectId;
use bson::spec::BinarySubtype;
use bson::{Binary, Bson, DateTime, Document};
use chrono::SecondsFormat;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::fjson;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("tjson: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document must have an _id")]
    MissingId,
    #[error("tjson: arrays are not supported (field {0:?})")]
    UnsupportedArray(String),
    #[error("tjson: unsupported type {0}")]
    UnsupportedType(&'static str),
    #[error("tjson: unhandled format {format:?} for type {kind:?}")]
    UnhandledFormat {
        kind: Option<SchemaType>,
        format: SchemaFormat,
    },
    #[error("tjson: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::Invalid(msg.into())
}

/// Decodes exactly one JSON value; anything but whitespace after it is an
/// error.
pub(crate) fn decode_strict<T: DeserializeOwned>(data: &[u8]) -> Result<T, Error> {
    let mut de = serde_json::Deserializer::from_slice(data);
    let value = T::deserialize(&mut de)?;
    de.end()?;
    Ok(value)
}

// ── Key names ───────────────────────────────────────────────────

fn needs_key_encoding(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_digit()) || name.contains(['-', '.'])
}

/// Encodes a key so that it may start with a digit and contain dots and
/// dashes.
pub fn encode_key_name(name: &str) -> String {
    if !needs_key_encoding(name) {
        return name.to_string();
    }
    format!("__D__{}", name.replace('.', "__E__").replace('-', "__C__"))
}

/// Inverse of [`encode_key_name`].
pub fn decode_key_name(name: &str) -> String {
    match name.strip_prefix("__D__") {
        Some(rest) => rest.replace("__E__", ".").replace("__C__", "-"),
        None => name.to_string(),
    }
}

// ── Marshal ─────────────────────────────────────────────────────

/// Encodes a value as JSON shaped by `schema`.
///
/// Document fields without a property in `schema` are encoded with the
/// schema their value would derive.
pub fn marshal(value: &Bson, schema: &Schema) -> Result<Vec<u8>, Error> {
    Ok(serde_json::to_vec(&to_json(value, schema)?)?)
}

fn to_json(value: &Bson, schema: &Schema) -> Result<Value, Error> {
    let json = match value {
        Bson::Document(doc) => document_to_json(doc, schema)?,
        Bson::Array(_) => return Err(Error::UnsupportedArray(String::new())),
        Bson::Double(f) => {
            if !f.is_finite() {
                return Err(invalid(format!("{f} is not representable")));
            }
            serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .ok_or_else(|| invalid(format!("{f} is not representable")))?
        }
        Bson::String(s) => Value::String(s.clone()),
        Bson::Binary(bin) => {
            let mut m = Map::new();
            m.insert("$b".into(), Value::String(STANDARD.encode(&bin.bytes)));
            m.insert("s".into(), Value::from(u8::from(bin.subtype)));
            Value::Object(m)
        }
        Bson::ObjectId(oid) => match schema.kind {
            Some(SchemaType::Object) => {
                let mut m = Map::new();
                m.insert("$o".into(), Value::String(oid.to_hex()));
                Value::Object(m)
            }
            _ => Value::String(STANDARD.encode(oid.bytes())),
        },
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::DateTime(dt) => {
            let ms = dt.timestamp_millis();
            let ts = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms)
                .ok_or_else(|| invalid(format!("date {ms} is out of range")))?;
            Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        Bson::Null => Value::Null,
        Bson::RegularExpression(re) => {
            let mut m = Map::new();
            m.insert("$r".into(), Value::String(re.pattern.as_str().to_string()));
            m.insert("o".into(), Value::String(re.options.as_str().to_string()));
            Value::Object(m)
        }
        Bson::Int32(i) => Value::from(*i),
        Bson::Timestamp(ts) => {
            let mut m = Map::new();
            m.insert(
                "$t".into(),
                Value::String(fjson::timestamp_to_u64(*ts).to_string()),
            );
            Value::Object(m)
        }
        Bson::Int64(i) => Value::from(*i),
        other => {
            return Err(Error::UnsupportedType(docsql_proto::alias_from_value(
                other,
            )));
        }
    };
    Ok(json)
}

fn document_to_json(doc: &Document, schema: &Schema) -> Result<Value, Error> {
    let mut m = Map::with_capacity(doc.len() + 1);
    let keys: Vec<Value> = doc.keys().map(|k| Value::String(k.clone())).collect();
    m.insert("$k".into(), Value::Array(keys));

    for (key, value) in doc {
        let json = match schema.properties.get(key) {
            Some(s) => to_json(value, s)?,
            None => match Schema::for_value(key, value)? {
                Some(s) => to_json(value, &s)?,
                None => Value::Null,
            },
        };
        m.insert(encode_key_name(key), json);
    }

    Ok(Value::Object(m))
}

// ── Unmarshal ───────────────────────────────────────────────────

/// Decodes JSON shaped by `schema`.
///
/// Malformed JSON, trailing data, values that don't fit the schema and
/// unknown document fields are all errors.
pub fn unmarshal(data: &[u8], schema: &Schema) -> Result<Bson, Error> {
    let json: Value = decode_strict(data)?;
    from_json(&json, schema)
}

fn from_json(json: &Value, schema: &Schema) -> Result<Bson, Error> {
    if json.is_null() {
        return Ok(Bson::Null);
    }

    let unhandled = || Error::UnhandledFormat {
        kind: schema.kind,
        format: schema.format,
    };

    match schema.kind {
        Some(SchemaType::Integer) => match schema.format {
            SchemaFormat::Empty | SchemaFormat::Int64 => json
                .as_i64()
                .map(Bson::Int64)
                .ok_or_else(|| mismatch("int64", json)),
            SchemaFormat::Int32 => json
                .as_i64()
                .and_then(|i| i32::try_from(i).ok())
                .map(Bson::Int32)
                .ok_or_else(|| mismatch("int32", json)),
            _ => Err(unhandled()),
        },
        Some(SchemaType::Number) => match schema.format {
            SchemaFormat::Empty | SchemaFormat::Double => {
                let f = json.as_f64().ok_or_else(|| mismatch("double", json))?;
                if !f.is_finite() {
                    return Err(invalid(format!("{f} is not a finite double")));
                }
                Ok(Bson::Double(f))
            }
            _ => Err(unhandled()),
        },
        Some(SchemaType::String) => {
            let s = json.as_str().ok_or_else(|| mismatch("string", json))?;
            match schema.format {
                SchemaFormat::Empty => Ok(Bson::String(s.to_string())),
                SchemaFormat::Byte => object_id_from_base64(s),
                SchemaFormat::DateTime => {
                    let ts = chrono::DateTime::parse_from_rfc3339(s)
                        .map_err(|e| invalid(format!("invalid date-time {s:?}: {e}")))?;
                    Ok(Bson::DateTime(DateTime::from_millis(ts.timestamp_millis())))
                }
                _ => Err(unhandled()),
            }
        }
        Some(SchemaType::Boolean) => json
            .as_bool()
            .map(Bson::Boolean)
            .ok_or_else(|| mismatch("boolean", json)),
        Some(SchemaType::Object) => {
            let m = json.as_object().ok_or_else(|| mismatch("object", json))?;
            if m.contains_key("$k") {
                document_from_json(m, schema).map(Bson::Document)
            } else if m.contains_key("$t") {
                special(m, &["$t"], |m| {
                    let s = string_field(m, "$t")?;
                    let n = s
                        .parse::<u64>()
                        .map_err(|e| invalid(format!("invalid $t value {s:?}: {e}")))?;
                    Ok(Bson::Timestamp(fjson::timestamp_from_u64(n)))
                })
            } else if m.contains_key("$b") {
                special(m, &["$b", "s"], |m| {
                    let bytes = STANDARD
                        .decode(string_field(m, "$b")?)
                        .map_err(|e| invalid(format!("invalid $b value: {e}")))?;
                    let subtype = m
                        .get("s")
                        .and_then(Value::as_u64)
                        .and_then(|s| u8::try_from(s).ok())
                        .ok_or_else(|| invalid("binary subtype must be a byte"))?;
                    Ok(Bson::Binary(Binary {
                        subtype: BinarySubtype::from(subtype),
                        bytes,
                    }))
                })
            } else if m.contains_key("$r") {
                special(m, &["$r", "o"], |m| {
                    let re = fjson::regex(string_field(m, "$r")?, string_field(m, "o")?)
                        .map_err(|e| invalid(e.to_string()))?;
                    Ok(Bson::RegularExpression(re))
                })
            } else if m.contains_key("$o") {
                special(m, &["$o"], |m| {
                    let s = string_field(m, "$o")?;
                    ObjectId::parse_str(s)
                        .map(Bson::ObjectId)
                        .map_err(|e| invalid(format!("invalid $o value {s:?}: {e}")))
                })
            } else {
                Err(invalid(format!(
                    "unhandled object with keys {:?}",
                    m.keys().collect::<Vec<_>>()
                )))
            }
        }
        Some(SchemaType::Array) | None => Err(unhandled()),
    }
}

fn mismatch(expected: &str, json: &Value) -> Error {
    invalid(format!("expected {expected}, got {json}"))
}

fn string_field<'a>(m: &'a Map<String, Value>, key: &str) -> Result<&'a str, Error> {
    m.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(format!("{key} must be a string")))
}

/// Decodes a marker object, rejecting fields other than `allowed`.
fn special(
    m: &Map<String, Value>,
    allowed: &[&str],
    decode: impl FnOnce(&Map<String, Value>) -> Result<Bson, Error>,
) -> Result<Bson, Error> {
    if let Some(extra) = m.keys().find(|k| !allowed.contains(&k.as_str())) {
        return Err(invalid(format!("unknown field {extra:?}")));
    }
    decode(m)
}

fn object_id_from_base64(s: &str) -> Result<Bson, Error> {
    let bytes = STANDARD
        .decode(s)
        .map_err(|e| invalid(format!("invalid ObjectId {s:?}: {e}")))?;
    let bytes: [u8; 12] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| invalid(format!("ObjectId must be 12 bytes, got {}", b.len())))?;
    Ok(Bson::ObjectId(ObjectId::from_bytes(bytes)))
}

fn document_from_json(m: &Map<String, Value>, schema: &Schema) -> Result<Document, Error> {
    let keys = m
        .get("$k")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("$k must be an array"))?;
    let additional = schema.additional_properties.unwrap_or(false);

    if keys.len() + 1 != m.len() && !additional {
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

        let Some(raw) = m.get(&encode_key_name(key)) else {
            if additional {
                continue;
            }
            return Err(invalid(format!("missing key {key:?}")));
        };

        let value = match schema.properties.get(key) {
            Some(s) => from_json(raw, s)?,
            None if raw.is_null() => Bson::Null,
            None if additional => fjson::from_json(raw).map_err(|e| invalid(e.to_string()))?,
            None => return Err(invalid(format!("no schema for key {key:?}"))),
        };
        doc.insert(key, value);
    }

    Ok(doc)
}
