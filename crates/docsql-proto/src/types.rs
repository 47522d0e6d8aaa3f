use std::cmp::Ordering;
use std::fmt;

use bson::{Bson, Document};

use crate::code::ErrorCode;
use crate::error::CommandError;

/// BSON type codes as accepted by `$type`, plus the `number` surrogate that
/// matches double, int and long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Double,
    String,
    Object,
    Array,
    BinData,
    ObjectId,
    Bool,
    Date,
    Null,
    Regex,
    Int,
    Timestamp,
    Long,
    Number,
}

const ALIASES: &[TypeCode] = &[
    TypeCode::Double,
    TypeCode::String,
    TypeCode::Object,
    TypeCode::Array,
    TypeCode::BinData,
    TypeCode::ObjectId,
    TypeCode::Bool,
    TypeCode::Date,
    TypeCode::Null,
    TypeCode::Regex,
    TypeCode::Int,
    TypeCode::Timestamp,
    TypeCode::Long,
    TypeCode::Number,
];

impl TypeCode {
    pub const fn code(self) -> i32 {
        match self {
            TypeCode::Double => 1,
            TypeCode::String => 2,
            TypeCode::Object => 3,
            TypeCode::Array => 4,
            TypeCode::BinData => 5,
            TypeCode::ObjectId => 7,
            TypeCode::Bool => 8,
            TypeCode::Date => 9,
            TypeCode::Null => 10,
            TypeCode::Regex => 11,
            TypeCode::Int => 16,
            TypeCode::Timestamp => 17,
            TypeCode::Long => 18,
            TypeCode::Number => -128,
        }
    }

    pub const fn alias(self) -> &'static str {
        match self {
            TypeCode::Double => "double",
            TypeCode::String => "string",
            TypeCode::Object => "object",
            TypeCode::Array => "array",
            TypeCode::BinData => "binData",
            TypeCode::ObjectId => "objectId",
            TypeCode::Bool => "bool",
            TypeCode::Date => "date",
            TypeCode::Null => "null",
            TypeCode::Regex => "regex",
            TypeCode::Int => "int",
            TypeCode::Timestamp => "timestamp",
            TypeCode::Long => "long",
            TypeCode::Number => "number",
        }
    }

    /// Resolves a numeric `$type` argument.
    pub fn from_code(code: i32) -> Result<TypeCode, CommandError> {
        if let Some(tc) = ALIASES.iter().copied().find(|tc| tc.code() == code) {
            return Ok(tc);
        }

        match code {
            // decimal, minKey, maxKey
            19 | -1 | 127 => Err(CommandError::with_argument(
                ErrorCode::NotImplemented,
                format!("Type code {code} not implemented"),
                "$type",
            )),
            _ => Err(CommandError::with_argument(
                ErrorCode::BadValue,
                format!("Invalid numerical type code: {code}"),
                "$type",
            )),
        }
    }

    /// Resolves a string `$type` argument.
    pub fn parse_alias(alias: &str) -> Result<TypeCode, CommandError> {
        ALIASES
            .iter()
            .copied()
            .find(|tc| tc.alias() == alias)
            .ok_or_else(|| {
                CommandError::with_argument(
                    ErrorCode::BadValue,
                    format!("Unknown type name alias: {alias}"),
                    "$type",
                )
            })
    }

    /// Whether `value` is of this type. `number` matches any numeric value.
    pub fn matches(self, value: &Bson) -> bool {
        match self {
            TypeCode::Number => matches!(
                value,
                Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_)
            ),
            tc => type_code_of(value) == Some(tc),
        }
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alias())
    }
}

fn type_code_of(value: &Bson) -> Option<TypeCode> {
    let tc = match value {
        Bson::Document(_) => TypeCode::Object,
        Bson::Array(_) => TypeCode::Array,
        Bson::Double(_) => TypeCode::Double,
        Bson::String(_) => TypeCode::String,
        Bson::Binary(_) => TypeCode::BinData,
        Bson::ObjectId(_) => TypeCode::ObjectId,
        Bson::Boolean(_) => TypeCode::Bool,
        Bson::DateTime(_) => TypeCode::Date,
        Bson::Null => TypeCode::Null,
        Bson::RegularExpression(_) => TypeCode::Regex,
        Bson::Int32(_) => TypeCode::Int,
        Bson::Timestamp(_) => TypeCode::Timestamp,
        Bson::Int64(_) => TypeCode::Long,
        _ => return None,
    };
    Some(tc)
}

/// Type alias name of a value, as used in error messages.
pub fn alias_from_value(value: &Bson) -> &'static str {
    match value {
        Bson::Undefined => "undefined",
        Bson::Decimal128(_) => "decimal",
        Bson::MinKey => "minKey",
        Bson::MaxKey => "maxKey",
        Bson::JavaScriptCode(_) => "javascript",
        v => type_code_of(v).map(TypeCode::alias).unwrap_or("unknown"),
    }
}

/// Whether the value is numeric and holds a whole number.
pub fn is_whole_number(value: &Bson) -> bool {
    match value {
        Bson::Double(f) => f.is_finite() && f.trunc() == *f,
        Bson::Int32(_) | Bson::Int64(_) => true,
        _ => false,
    }
}

/// Whether all array elements share one type. Whole numbers of any numeric
/// type count as the same type.
pub fn has_same_type_elements(array: &[Bson]) -> bool {
    let mut prev: Option<&str> = None;
    for element in array {
        let cur = if is_whole_number(element) {
            TypeCode::Number.alias()
        } else {
            alias_from_value(element)
        };

        match prev {
            None => prev = Some(cur),
            Some(p) if p != cur => return false,
            Some(_) => {}
        }
    }
    true
}

/// Strict, order-sensitive equality.
///
/// Unlike `Document`'s `PartialEq`, two documents are only equal when their
/// keys appear in the same order. Doubles compare by bit pattern so that NaN
/// equals itself.
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (a, b) {
        (Bson::Document(a), Bson::Document(b)) => documents_equal(a, b),
        (Bson::Array(a), Bson::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Bson::Double(a), Bson::Double(b)) => a.to_bits() == b.to_bits(),
        _ => a == b,
    }
}

/// Strict, order-sensitive document equality. See [`values_equal`].
pub fn documents_equal(a: &Document, b: &Document) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|((ka, va), (kb, vb))| ka == kb && values_equal(va, vb))
}

/// Compares two scalar values of comparable types.
///
/// Numbers compare across int32, int64 and double. Returns `None` for
/// values of different type classes or for NaN.
pub fn compare_values(a: &Bson, b: &Bson) -> Option<Ordering> {
    match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => Some(x.cmp(y)),
        (Bson::Int64(x), Bson::Int64(y)) => Some(x.cmp(y)),
        (Bson::Int32(x), Bson::Int64(y)) => Some(i64::from(*x).cmp(y)),
        (Bson::Int64(x), Bson::Int32(y)) => Some(x.cmp(&i64::from(*y))),
        _ if is_numeric(a) && is_numeric(b) => as_f64(a)?.partial_cmp(&as_f64(b)?),
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Timestamp(x), Bson::Timestamp(y)) => {
            Some((x.time, x.increment).cmp(&(y.time, y.increment)))
        }
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn is_numeric(v: &Bson) -> bool {
    matches!(v, Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_))
}

fn as_f64(v: &Bson) -> Option<f64> {
    match v {
        Bson::Double(f) => Some(*f),
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        _ => None,
    }
}
