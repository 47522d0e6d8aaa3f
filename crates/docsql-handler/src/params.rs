//! Declarative extraction of typed command parameters.
//!
//! Each command describes its arguments as a static table of [`Field`]s. The
//! extractor walks the command document once, validates every value against
//! its field's [`Kind`] and [`Modifier`]s, and returns [`Params`] the command
//! reads with typed getters.

use bson::{Bson, Document};
use docsql_proto::{CommandError, ErrorCode, NumberError, alias_from_value, get_whole_number_param};
use tracing::debug;

use crate::numeric::{
    get_bool_optional_param, get_optional_positive_number,
    get_validated_number_param_with_min_value,
};

/// Validation rule attached to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    /// The field may be absent.
    Optional,
    /// Any value is rejected with NotImplemented.
    Unimplemented,
    /// Only `true` is rejected with NotImplemented.
    UnimplementedNonDefault,
    /// The value is logged and discarded.
    Ignored,
    /// The value names the target collection.
    Collection,
    /// Number `>= 0`, fractions floored, clamped to the int32 range.
    PositiveNumber,
    /// Integral number in `0..=i32::MAX`.
    WholePositiveNumber,
    /// Numbers and `null` read as booleans.
    NumericBool,
    /// Only the numbers 0 and 1, read as booleans.
    ZeroOrOneAsBool,
}

/// Expected shape of a field value.
#[derive(Debug, Clone, Copy)]
pub enum Kind {
    String,
    Document,
    Array,
    Bool,
    Int,
    Any,
    /// Array of documents, each extracted with the nested table.
    Documents(&'static [Field]),
}

impl Kind {
    fn alias(&self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::Document => "object",
            Kind::Array | Kind::Documents(_) => "array",
            Kind::Bool => "bool",
            Kind::Int => "long",
            Kind::Any => "any",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub key: &'static str,
    pub kind: Kind,
    pub modifiers: &'static [Modifier],
}

impl Field {
    pub const fn new(key: &'static str, kind: Kind) -> Self {
        Field {
            key,
            kind,
            modifiers: &[],
        }
    }

    pub const fn with(self, modifiers: &'static [Modifier]) -> Self {
        Field { modifiers, ..self }
    }

    fn has(&self, modifier: Modifier) -> bool {
        self.modifiers.contains(&modifier)
    }

    fn required(&self) -> bool {
        !self.modifiers.iter().any(|m| {
            matches!(
                m,
                Modifier::Optional
                    | Modifier::Ignored
                    | Modifier::Unimplemented
                    | Modifier::UnimplementedNonDefault
            )
        })
    }
}

/// Fields every top-level command accepts.
pub const COMMON_FIELDS: &[Field] = &[
    Field::new("$db", Kind::String).with(&[Modifier::Optional]),
    Field::new("lsid", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("$clusterTime", Kind::Any).with(&[Modifier::Ignored]),
    Field::new("$readPreference", Kind::Any).with(&[Modifier::Ignored]),
];

/// An extracted value.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    String(String),
    Document(Document),
    Array(Vec<Bson>),
    Bool(bool),
    Int(i64),
    Any(Bson),
    Documents(Vec<Params>),
}

/// Extracted parameters keyed by their field key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: Vec<(&'static str, Param)>,
}

impl Params {
    pub fn get(&self, key: &str) -> Option<&Param> {
        self.values.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(Param::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn document(&self, key: &str) -> Option<&Document> {
        match self.get(key) {
            Some(Param::Document(d)) => Some(d),
            _ => None,
        }
    }

    pub fn array(&self, key: &str) -> Option<&[Bson]> {
        match self.get(key) {
            Some(Param::Array(a)) => Some(a),
            _ => None,
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(Param::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(Param::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn any(&self, key: &str) -> Option<&Bson> {
        match self.get(key) {
            Some(Param::Any(v)) => Some(v),
            _ => None,
        }
    }

    pub fn documents(&self, key: &str) -> &[Params] {
        match self.get(key) {
            Some(Param::Documents(d)) => d,
            _ => &[],
        }
    }
}

/// Extracts a top-level command document. `command` is the command name;
/// a key matching it case-insensitively is looked up as `command`.
pub fn extract_params(
    doc: &Document,
    command: &str,
    fields: &'static [Field],
) -> Result<Params, CommandError> {
    extract(doc, command, fields, COMMON_FIELDS)
}

fn extract(
    doc: &Document,
    command: &str,
    fields: &'static [Field],
    common: &'static [Field],
) -> Result<Params, CommandError> {
    let mut params = Params::default();

    for (key, value) in doc {
        let lookup = if key.eq_ignore_ascii_case(command) {
            command
        } else {
            key.as_str()
        };

        let Some(field) = fields.iter().chain(common).find(|f| f.key == lookup) else {
            return Err(CommandError::with_argument(
                ErrorCode::FailedToParse,
                format!("{command}: unknown field {key:?}"),
                command,
            ));
        };

        if field.has(Modifier::Ignored) {
            debug!(command, field = key.as_str(), %value, "ignoring field");
            continue;
        }

        if field.has(Modifier::Unimplemented) {
            return Err(CommandError::with_argument(
                ErrorCode::NotImplemented,
                format!(
                    "{command}: support for field {key:?} with value {value} is not implemented yet"
                ),
                key.as_str(),
            ));
        }

        if field.has(Modifier::UnimplementedNonDefault) && *value == Bson::Boolean(true) {
            return Err(CommandError::with_argument(
                ErrorCode::NotImplemented,
                format!(
                    "{command}: support for field {key:?} with non-default value {value} \
                     is not implemented yet"
                ),
                key.as_str(),
            ));
        }

        let param = convert(field, command, key, value)?;
        params.values.push((field.key, param));
    }

    for field in fields.iter().filter(|f| f.required()) {
        if field.has(Modifier::Collection) {
            if params.string(field.key).is_none_or(str::is_empty) {
                let db = params.string("$db").unwrap_or_default();
                return Err(CommandError::with_argument(
                    ErrorCode::InvalidNamespace,
                    format!("Invalid namespace specified '{db}.'"),
                    command,
                ));
            }
            continue;
        }

        let lower = field.key.to_lowercase();
        if !doc.contains_key(field.key) && !doc.contains_key(&lower) {
            return Err(CommandError::with_argument(
                ErrorCode::MissingField,
                format!(
                    "BSON field '{command}.{}' is missing but a required field",
                    field.key
                ),
                command,
            ));
        }
    }

    Ok(params)
}

fn wrong_type(command: &str, key: &str, value: &Bson, expected: &str) -> CommandError {
    CommandError::with_argument(
        ErrorCode::TypeMismatch,
        format!(
            "BSON field '{command}.{key}' is the wrong type '{}', expected type '{expected}'",
            alias_from_value(value)
        ),
        command,
    )
}

fn convert(field: &Field, command: &str, key: &str, value: &Bson) -> Result<Param, CommandError> {
    let mismatch = || {
        if field.has(Modifier::Collection) {
            CommandError::with_argument(
                ErrorCode::InvalidNamespace,
                format!("collection name has invalid type {}", alias_from_value(value)),
                command,
            )
        } else {
            wrong_type(command, key, value, field.kind.alias())
        }
    };

    let param = match field.kind {
        Kind::String => match value {
            Bson::String(s) => Param::String(s.clone()),
            _ => return Err(mismatch()),
        },
        Kind::Document => match value {
            Bson::Document(d) => Param::Document(d.clone()),
            _ => return Err(mismatch()),
        },
        Kind::Array => match value {
            Bson::Array(a) => Param::Array(a.clone()),
            _ => return Err(mismatch()),
        },
        Kind::Any => Param::Any(value.clone()),
        Kind::Int => {
            if field.has(Modifier::PositiveNumber) {
                Param::Int(get_validated_number_param_with_min_value(
                    command, key, value, 0,
                )?)
            } else if field.has(Modifier::WholePositiveNumber) {
                Param::Int(get_optional_positive_number(key, value)?)
            } else {
                match get_whole_number_param(value) {
                    Ok(n) => Param::Int(n),
                    Err(NumberError::UnexpectedType) => return Err(mismatch()),
                    Err(e) => {
                        return Err(CommandError::with_argument(
                            ErrorCode::BadValue,
                            format!("BSON field '{command}.{key}' is {e}"),
                            command,
                        ));
                    }
                }
            }
        }
        Kind::Bool => {
            if field.has(Modifier::NumericBool) {
                Param::Bool(get_bool_optional_param(key, value)?)
            } else if field.has(Modifier::ZeroOrOneAsBool) {
                match get_whole_number_param(value) {
                    Ok(n @ 0..=1) => Param::Bool(n == 1),
                    _ => {
                        return Err(CommandError::with_argument(
                            ErrorCode::FailedToParse,
                            format!("The '{command}.{key}' field must be 0 or 1. Got {value}"),
                            command,
                        ));
                    }
                }
            } else {
                match value {
                    Bson::Boolean(b) => Param::Bool(*b),
                    _ => return Err(mismatch()),
                }
            }
        }
        Kind::Documents(nested) => {
            let Bson::Array(items) = value else {
                return Err(mismatch());
            };
            let path = format!("{command}.{key}");
            let mut extracted = Vec::with_capacity(items.len());
            for item in items {
                let Bson::Document(doc) = item else {
                    return Err(wrong_type(command, key, item, "object"));
                };
                extracted.push(extract(doc, &path, nested, &[])?);
            }
            Param::Documents(extracted)
        }
    };

    Ok(param)
}
