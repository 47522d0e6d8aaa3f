use std::fmt;

use bson::Bson;

/// Why a value could not be read as a whole 64-bit number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberError {
    NotWholeNumber,
    LongExceededPositive,
    LongExceededNegative,
    Infinity,
    UnexpectedType,
}

impl fmt::Display for NumberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NumberError::NotWholeNumber => "not a whole number",
            NumberError::LongExceededPositive => "long exceeded - positive value",
            NumberError::LongExceededNegative => "long exceeded - negative value",
            NumberError::Infinity => "infinity",
            NumberError::UnexpectedType => "unexpected type",
        };
        f.write_str(s)
    }
}

impl std::error::Error for NumberError {}

/// Reads an int32, int64 or a double holding a whole number, as used by
/// limits, `$size` and similar arguments.
pub fn get_whole_number_param(value: &Bson) -> Result<i64, NumberError> {
    match value {
        Bson::Double(f) => {
            let f = *f;
            if f == f64::INFINITY {
                return Err(NumberError::Infinity);
            }
            if f > i64::MAX as f64 {
                return Err(NumberError::LongExceededPositive);
            }
            if f < i64::MIN as f64 {
                return Err(NumberError::LongExceededNegative);
            }
            // NaN fails this comparison too
            if f.trunc() != f {
                return Err(NumberError::NotWholeNumber);
            }
            Ok(f as i64)
        }
        Bson::Int32(i) => Ok(i64::from(*i)),
        Bson::Int64(i) => Ok(*i),
        _ => Err(NumberError::UnexpectedType),
    }
}
