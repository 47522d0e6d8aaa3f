//! Document model helpers and the wire protocol error taxonomy.

pub mod code;
pub mod error;
pub mod number;
pub mod types;

pub use code::ErrorCode;
pub use error::{
    CommandError, ErrInfo, ProtoErr, ProtoError, ValidationError, WriteError, WriteErrors,
    protocol_error,
};
pub use number::{NumberError, get_whole_number_param};
pub use types::{
    TypeCode, alias_from_value, compare_values, documents_equal, has_same_type_elements,
    is_whole_number, values_equal,
};
