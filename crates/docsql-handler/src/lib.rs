//! Command execution: parameter extraction, dispatch, backend calls and
//! translation of backend failures into wire protocol errors.

pub mod backend;
mod commands;
pub mod config;
pub mod error;
mod handler;
pub mod memory;
pub mod native;
pub mod numeric;
pub mod params;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use backend::{Backend, BackendError, Context, Row};
pub use config::HandlerConfig;
pub use error::HandlerError;
pub use handler::Handler;
pub use memory::MemoryBackend;
pub use native::{map_backend_error, map_wrapped_code, map_write_errors};
pub use numeric::{
    get_bool_optional_param, get_optional_positive_number, get_validated_number_param_with_min_value,
    get_whole_param_strict,
};
pub use params::{Field, Kind, Modifier, Param, Params, extract_params};
