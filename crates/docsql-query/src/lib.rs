//! Compiles filter, sort, projection, aggregation and update documents into
//! SQL over a `_jsonb` document column, or into in-process transforms where
//! SQL has no counterpart.

pub mod filter;
mod group;
pub mod param;
pub mod parse_filter;
pub mod path;
pub mod pipeline;
pub mod projection;
pub mod sort;
pub mod stage;
pub mod update;

pub use filter::{FilterTree, LogicalOp, NodeId, Operand};
pub use group::group_stage;
pub use param::SqlParam;
pub use parse_filter::parse_filter;
pub use path::{DOCUMENT_COLUMN, Input, quote_ident};
pub use pipeline::{Pipeline, PostStage, compile_find, compile_pipeline};
pub use projection::{Projection, Slice};
pub use sort::{Sort, SortDirection, add_sort_stage};
pub use stage::{FieldType, Query, Stage, StageField, wrap};
pub use update::{Update, UpdateOp};
