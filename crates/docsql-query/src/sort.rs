use bson::{Bson, Document};
use docsql_proto::{CommandError, ErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

/// Reads a sort document, keeping its key order. Only `1` and `-1` of any
/// numeric type are accepted.
pub fn add_sort_stage(spec: &Document) -> Result<Vec<Sort>, CommandError> {
    spec.iter()
        .map(|(field, value)| {
            let direction = match value {
                Bson::Int32(1) | Bson::Int64(1) => SortDirection::Asc,
                Bson::Int32(-1) | Bson::Int64(-1) => SortDirection::Desc,
                Bson::Double(f) if *f == 1.0 => SortDirection::Asc,
                Bson::Double(f) if *f == -1.0 => SortDirection::Desc,
                v => {
                    return Err(CommandError::with_argument(
                        ErrorCode::SortBadOrder,
                        format!("invalid sort order: {v}"),
                        "$sort",
                    ));
                }
            };
            Ok(Sort {
                field: field.clone(),
                direction,
            })
        })
        .collect()
}
