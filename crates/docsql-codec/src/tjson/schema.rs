use std::collections::BTreeMap;

use bson::oid::ObjectId;
use bson::{Bson, Document, doc};
use serde::{Deserialize, Serialize};

use super::{Error, decode_strict};

/// JSON value type in a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Integer,
    Number,
    String,
    Boolean,
    Array,
    Object,
}

/// Refinement of a [`SchemaType`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaFormat {
    #[default]
    #[serde(rename = "")]
    Empty,
    #[serde(rename = "double")]
    Double,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "int64")]
    Int64,
    #[serde(rename = "int32")]
    Int32,
    #[serde(rename = "byte")]
    Byte,
    #[serde(rename = "uuid")]
    Uuid,
    #[serde(rename = "date-time")]
    DateTime,
}

impl SchemaFormat {
    pub fn is_empty(&self) -> bool {
        *self == SchemaFormat::Empty
    }
}

/// A supported subset of JSON Schema.
///
/// `properties` are keyed by the document's own key names; key-name encoding
/// only applies to the marshaled document body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Schema {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SchemaType>,
    #[serde(default, skip_serializing_if = "SchemaFormat::is_empty")]
    pub format: SchemaFormat,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Schema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,
    #[serde(
        rename = "additionalProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<bool>,

    // accepted so that persisted schemas written by other tools decode
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub collection_type: String,
}

impl Schema {
    pub fn scalar(kind: SchemaType, format: SchemaFormat) -> Self {
        Schema {
            kind: Some(kind),
            format,
            ..Default::default()
        }
    }

    pub fn object(properties: BTreeMap<String, Schema>) -> Self {
        Schema {
            kind: Some(SchemaType::Object),
            properties,
            ..Default::default()
        }
    }

    pub fn array(items: Schema) -> Self {
        Schema {
            kind: Some(SchemaType::Array),
            items: Some(Box::new(items)),
            ..Default::default()
        }
    }

    pub fn double() -> Self {
        Schema::scalar(SchemaType::Number, SchemaFormat::Empty)
    }

    pub fn string() -> Self {
        Schema::scalar(SchemaType::String, SchemaFormat::Empty)
    }

    pub fn binary() -> Self {
        Schema::object(BTreeMap::from([
            (
                "$b".to_string(),
                Schema::scalar(SchemaType::String, SchemaFormat::Byte),
            ),
            ("s".to_string(), Schema::int32()),
        ]))
    }

    /// ObjectId as a base64 string of its 12 bytes.
    pub fn object_id() -> Self {
        Schema::scalar(SchemaType::String, SchemaFormat::Byte)
    }

    /// ObjectId as `{"$o": "<hex>"}`.
    pub fn object_id_hex() -> Self {
        Schema::object(BTreeMap::from([("$o".to_string(), Schema::string())]))
    }

    pub fn boolean() -> Self {
        Schema::scalar(SchemaType::Boolean, SchemaFormat::Empty)
    }

    pub fn date_time() -> Self {
        Schema::scalar(SchemaType::String, SchemaFormat::DateTime)
    }

    pub fn regex() -> Self {
        Schema::object(BTreeMap::from([
            ("$r".to_string(), Schema::string()),
            ("o".to_string(), Schema::string()),
        ]))
    }

    pub fn int32() -> Self {
        Schema::scalar(SchemaType::Integer, SchemaFormat::Int32)
    }

    pub fn timestamp() -> Self {
        Schema::object(BTreeMap::from([("$t".to_string(), Schema::string())]))
    }

    pub fn int64() -> Self {
        Schema::scalar(SchemaType::Integer, SchemaFormat::Empty)
    }

    fn key_list() -> Self {
        Schema::array(Schema::string())
    }

    /// Structural equality with default formats normalized: an empty number
    /// format equals `double`, an empty integer format equals `int64`.
    pub fn eq_normalized(&self, other: &Schema) -> bool {
        if self.kind != other.kind {
            return false;
        }

        match self.kind {
            Some(SchemaType::Object) => {
                self.properties.len() == other.properties.len()
                    && self.properties.iter().all(|(k, v)| {
                        other
                            .properties
                            .get(k)
                            .is_some_and(|o| v.eq_normalized(o))
                    })
            }
            Some(SchemaType::Array) => match (&self.items, &other.items) {
                (Some(a), Some(b)) => a.eq_normalized(b),
                (None, None) => true,
                _ => false,
            },
            Some(kind) => normalized_format(kind, self.format) == normalized_format(kind, other.format),
            None => false,
        }
    }

    /// Encodes the schema as JSON text.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a persisted schema.
    ///
    /// Unknown fields and trailing data are errors. Every plain object gets a
    /// `$k` property and a missing top-level type means `object`.
    pub fn from_json(data: &[u8]) -> Result<Schema, Error> {
        let mut schema: Schema = decode_strict(data)?;
        schema.add_document_properties();
        if schema.kind.is_none() {
            schema.kind = Some(SchemaType::Object);
        }
        Ok(schema)
    }

    fn add_document_properties(&mut self) {
        match self.kind {
            Some(SchemaType::Array) => {
                if let Some(items) = self.items.as_deref_mut() {
                    if items.kind == Some(SchemaType::Object) {
                        items.add_document_properties();
                    }
                }
                return;
            }
            Some(SchemaType::Object) | None => {}
            Some(_) => return,
        }

        for sub in self.properties.values_mut() {
            if sub.kind == Some(SchemaType::Object) {
                sub.add_document_properties();
            }
        }

        // binary, regex, timestamp and hex ObjectId objects are not documents
        const SPECIALS: [&str; 5] = ["$k", "$b", "$r", "$t", "$o"];
        if SPECIALS.iter().any(|s| self.properties.contains_key(*s)) {
            return;
        }

        self.properties.insert("$k".to_string(), Schema::key_list());
    }

    /// The schema of a single value; `None` for null, which Tigris-style
    /// schemas leave undeclared.
    pub(crate) fn for_value(path: &str, value: &Bson) -> Result<Option<Schema>, Error> {
        let schema = match value {
            Bson::Document(doc) => {
                let mut schema = Schema::object(BTreeMap::new());
                merge_document(&mut schema, path, doc)?;
                schema
            }
            Bson::Array(_) => return Err(Error::UnsupportedArray(path.to_string())),
            Bson::Double(_) => Schema::double(),
            Bson::String(_) => Schema::string(),
            Bson::Binary(_) => Schema::binary(),
            Bson::ObjectId(_) => Schema::object_id(),
            Bson::Boolean(_) => Schema::boolean(),
            Bson::DateTime(_) => Schema::date_time(),
            Bson::Null => return Ok(None),
            Bson::RegularExpression(_) => Schema::regex(),
            Bson::Int32(_) => Schema::int32(),
            Bson::Timestamp(_) => Schema::timestamp(),
            Bson::Int64(_) => Schema::int64(),
            other => {
                return Err(Error::UnsupportedType(docsql_proto::alias_from_value(
                    other,
                )));
            }
        };
        Ok(Some(schema))
    }
}

fn normalized_format(kind: SchemaType, format: SchemaFormat) -> SchemaFormat {
    match (kind, format) {
        (SchemaType::Number, SchemaFormat::Empty) => SchemaFormat::Double,
        (SchemaType::Integer, SchemaFormat::Empty) => SchemaFormat::Int64,
        (_, f) => f,
    }
}

fn merge_document(schema: &mut Schema, path: &str, doc: &Document) -> Result<(), Error> {
    schema.properties.insert("$k".to_string(), Schema::key_list());

    for (key, value) in doc {
        let child_path = if path.is_empty() {
            key.clone()
        } else {
            format!("{path}.{key}")
        };

        if let Some(s) = Schema::for_value(&child_path, value)? {
            schema.properties.insert(key.clone(), s);
        }
    }

    Ok(())
}

/// Derives the schema of a top-level document, which must carry `_id`.
///
/// Arrays are not supported and fail with [`Error::UnsupportedArray`].
pub fn document_schema(doc: &Document) -> Result<Schema, Error> {
    if !doc.contains_key("_id") {
        return Err(Error::MissingId);
    }

    let mut schema = Schema {
        primary_key: vec!["_id".to_string()],
        ..Schema::object(BTreeMap::new())
    };
    merge_document(&mut schema, "", doc)?;

    Ok(schema)
}

/// Schema of a collection holding nothing but ObjectId `_id`s.
pub fn empty_schema(collection: &str) -> Result<Schema, Error> {
    let mut schema = document_schema(&doc! { "_id": ObjectId::new() })?;
    schema.title = collection.to_string();
    Ok(schema)
}
