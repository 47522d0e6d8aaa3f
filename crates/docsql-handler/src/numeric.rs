//! Numeric command arguments: `limit`, `skip`, `batchSize` and friends.

use bson::Bson;
use docsql_proto::{CommandError, ErrorCode, NumberError, alias_from_value, get_whole_number_param};

fn as_double(value: &Bson) -> f64 {
    match value {
        Bson::Double(f) => *f,
        Bson::Int32(n) => f64::from(*n),
        Bson::Int64(n) => *n as f64,
        _ => 0.0,
    }
}

fn negative(command: &str, param: &str, min: i64, actual: i64) -> CommandError {
    CommandError::with_argument(
        ErrorCode::ValueNegative,
        format!("BSON field '{param}' value must be >= {min}, actual value '{actual}'"),
        command,
    )
}

fn wrong_number_type(command: &str, param: &str, value: &Bson) -> CommandError {
    CommandError::with_argument(
        ErrorCode::TypeMismatch,
        format!(
            "BSON field '{command}.{param}' is the wrong type '{}', expected types \
             '[long, int, decimal, double]'",
            alias_from_value(value)
        ),
        command,
    )
}

/// Whole non-negative number without an upper clamp.
///
/// Infinity and values above the int64 range saturate to `i64::MAX`; NaN is
/// zero. Positive fractions are floored, while negative fractions fail and
/// report the ceiling of the input.
pub fn get_whole_param_strict(command: &str, param: &str, value: &Bson) -> Result<i64, CommandError> {
    match get_whole_number_param(value) {
        Ok(n) if n < 0 => Err(negative(command, param, 0, n)),
        Ok(n) => Ok(n),
        Err(NumberError::UnexpectedType) => Err(wrong_number_type(command, param, value)),
        Err(NumberError::Infinity | NumberError::LongExceededPositive) => Ok(i64::MAX),
        Err(NumberError::NotWholeNumber) => {
            let f = as_double(value);
            if f.is_nan() {
                Ok(0)
            } else if f.is_sign_negative() {
                Err(negative(command, param, 0, f.ceil() as i64))
            } else {
                Ok(f.floor() as i64)
            }
        }
        Err(NumberError::LongExceededNegative) => {
            Err(negative(command, param, 0, as_double(value).ceil() as i64))
        }
    }
}

/// Whole number at least `min`, clamped to the int32 range. `null` reads as
/// `min`.
pub fn get_validated_number_param_with_min_value(
    command: &str,
    param: &str,
    value: &Bson,
    min: i32,
) -> Result<i64, CommandError> {
    let whole = match get_whole_number_param(value) {
        Ok(n) => n,
        Err(NumberError::UnexpectedType) if *value == Bson::Null => return Ok(i64::from(min)),
        Err(NumberError::UnexpectedType) => return Err(wrong_number_type(command, param, value)),
        Err(NumberError::NotWholeNumber) => {
            let f = as_double(value);
            if f.is_sign_negative() {
                return Err(negative(command, param, i64::from(min), f.ceil() as i64));
            }
            f.floor() as i64
        }
        Err(NumberError::Infinity | NumberError::LongExceededPositive) => {
            return Ok(i64::from(i32::MAX));
        }
        Err(NumberError::LongExceededNegative) => {
            return Err(negative(
                command,
                param,
                i64::from(min),
                as_double(value).ceil() as i64,
            ));
        }
    };

    if whole < i64::from(min) {
        return Err(negative(command, param, i64::from(min), whole));
    }
    Ok(whole.min(i64::from(i32::MAX)))
}

/// Whole number in `0..=i32::MAX` given as an int, long or integral double.
pub fn get_optional_positive_number(key: &str, value: &Bson) -> Result<i64, CommandError> {
    let bad = |message: String| CommandError::with_argument(ErrorCode::BadValue, message, key);
    let whole = match get_whole_number_param(value) {
        Ok(n) => n,
        Err(NumberError::UnexpectedType) => return Err(bad(format!("{key} must be a number"))),
        Err(NumberError::NotWholeNumber) => {
            return Err(bad(format!("{key} has non-integral value")));
        }
        Err(_) => return Err(bad(format!("{value} value for {key} is out of range"))),
    };
    if !(0..=i64::from(i32::MAX)).contains(&whole) {
        return Err(bad(format!("{whole} value for {key} is out of range")));
    }
    Ok(whole)
}

/// Non-zero numbers are `true`; zero and `null` are `false`.
pub fn get_bool_optional_param(key: &str, value: &Bson) -> Result<bool, CommandError> {
    match value {
        Bson::Boolean(b) => Ok(*b),
        Bson::Double(f) => Ok(*f != 0.0),
        Bson::Int32(n) => Ok(*n != 0),
        Bson::Int64(n) => Ok(*n != 0),
        Bson::Null => Ok(false),
        v => Err(CommandError::with_argument(
            ErrorCode::TypeMismatch,
            format!(
                "BSON field '{key}' is the wrong type '{}', expected types \
                 '[bool, long, int, decimal, double]'",
                alias_from_value(v)
            ),
            key,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_negative_reports_the_value() {
        let err = get_whole_param_strict("find", "limit", &Bson::Int32(-1)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValueNegative);
        assert_eq!(err.message(), "BSON field 'limit' value must be >= 0, actual value '-1'");
    }

    #[test]
    fn strict_negative_fraction_reports_the_ceiling() {
        let err = get_whole_param_strict("find", "skip", &Bson::Double(-1.5)).unwrap_err();
        assert_eq!(err.message(), "BSON field 'skip' value must be >= 0, actual value '-1'");
    }

    #[test]
    fn strict_saturates_and_floors() {
        let cases = [
            (Bson::Double(f64::INFINITY), i64::MAX),
            (Bson::Double(1e300), i64::MAX),
            (Bson::Double(f64::NAN), 0),
            (Bson::Double(2.9), 2),
            (Bson::Int64(7), 7),
        ];
        for (value, expected) in cases {
            assert_eq!(get_whole_param_strict("find", "limit", &value).unwrap(), expected, "{value}");
        }
    }

    #[test]
    fn strict_rejects_non_numbers() {
        for value in [Bson::String("1".into()), Bson::Document(Default::default()), Bson::Array(vec![])] {
            let err = get_whole_param_strict("find", "limit", &value).unwrap_err();
            assert_eq!(err.code(), ErrorCode::TypeMismatch);
            assert!(
                err.message().contains(alias_from_value(&value)),
                "{}",
                err.message()
            );
        }
    }

    #[test]
    fn validated_number_clamps_to_int32() {
        let v = get_validated_number_param_with_min_value("find", "batchSize", &Bson::Int64(1 << 40), 0);
        assert_eq!(v.unwrap(), i64::from(i32::MAX));
        let v = get_validated_number_param_with_min_value("find", "batchSize", &Bson::Null, 0);
        assert_eq!(v.unwrap(), 0);
        let v = get_validated_number_param_with_min_value("find", "batchSize", &Bson::Double(3.7), 0);
        assert_eq!(v.unwrap(), 3);
    }

    #[test]
    fn optional_positive_number() {
        assert_eq!(get_optional_positive_number("maxTimeMS", &Bson::Int32(10)).unwrap(), 10);
        let err = get_optional_positive_number("maxTimeMS", &Bson::Double(1.5)).unwrap_err();
        assert_eq!(err.message(), "maxTimeMS has non-integral value");
        let err = get_optional_positive_number("maxTimeMS", &Bson::Int32(-1)).unwrap_err();
        assert_eq!(err.message(), "-1 value for maxTimeMS is out of range");
        let err = get_optional_positive_number("maxTimeMS", &Bson::String("x".into())).unwrap_err();
        assert_eq!(err.message(), "maxTimeMS must be a number");
    }

    #[test]
    fn numeric_bool() {
        assert!(get_bool_optional_param("nameOnly", &Bson::Double(0.5)).unwrap());
        assert!(!get_bool_optional_param("nameOnly", &Bson::Null).unwrap());
        let err = get_bool_optional_param("nameOnly", &Bson::String("yes".into())).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TypeMismatch);
    }
}
