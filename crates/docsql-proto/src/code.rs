use std::fmt;

/// Wire protocol error code.
///
/// `name()` is the `codeName` drivers see next to the numeric code. Codes
/// MongoDB only knows by their assertion location are named `LocationNNNN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InternalError,
    BadValue,
    FailedToParse,
    TypeMismatch,
    NamespaceNotFound,
    PathNotViable,
    ConflictingUpdateOperators,
    CursorNotFound,
    NamespaceExists,
    MaxTimeMSExpired,
    DollarPrefixedFieldName,
    InvalidID,
    EmptyFieldName,
    CommandNotFound,
    ImmutableField,
    CannotCreateIndex,
    IndexAlreadyExists,
    InvalidNamespace,
    IndexOptionsConflict,
    IndexKeySpecsConflict,
    OperationFailed,
    InvalidPipelineOperator,
    DocumentValidationFailure,
    NotImplemented,
    DuplicateKey,
    Interrupted,
    StageGroupInvalidFields,
    StageGroupID,
    StageGroupMissingID,
    StageSkipBadValue,
    StageLimitZero,
    MatchBadExpression,
    SortBadExpression,
    SortBadValue,
    SortBadOrder,
    SortMissingKey,
    PathContainsEmptyElement,
    GroupInvalidFieldPath,
    InvalidArg,
    SliceFirstArg,
    ProjectionInEx,
    ProjectionExIn,
    StageCountNonString,
    StageCountNonEmptyString,
    StageCountBadPrefix,
    StageCountBadValue,
    StageGroupInvalidAccumulator,
    StageGroupUnaryOperator,
    StageGroupMultipleAccumulator,
    StageInvalid,
    UnrecognizedPipelineStage,
    EmptyFieldPath,
    MissingField,
    FailedToParseInput,
    ValueNegative,
    RegexOptions,
    RegexMissingParen,
    BadRegexOption,
    DuplicateField,
    StageLimitInvalidArg,
}

const ALL: &[ErrorCode] = &[
    ErrorCode::InternalError,
    ErrorCode::BadValue,
    ErrorCode::FailedToParse,
    ErrorCode::TypeMismatch,
    ErrorCode::NamespaceNotFound,
    ErrorCode::PathNotViable,
    ErrorCode::ConflictingUpdateOperators,
    ErrorCode::CursorNotFound,
    ErrorCode::NamespaceExists,
    ErrorCode::MaxTimeMSExpired,
    ErrorCode::DollarPrefixedFieldName,
    ErrorCode::InvalidID,
    ErrorCode::EmptyFieldName,
    ErrorCode::CommandNotFound,
    ErrorCode::ImmutableField,
    ErrorCode::CannotCreateIndex,
    ErrorCode::IndexAlreadyExists,
    ErrorCode::InvalidNamespace,
    ErrorCode::IndexOptionsConflict,
    ErrorCode::IndexKeySpecsConflict,
    ErrorCode::OperationFailed,
    ErrorCode::InvalidPipelineOperator,
    ErrorCode::DocumentValidationFailure,
    ErrorCode::NotImplemented,
    ErrorCode::DuplicateKey,
    ErrorCode::Interrupted,
    ErrorCode::StageGroupInvalidFields,
    ErrorCode::StageGroupID,
    ErrorCode::StageGroupMissingID,
    ErrorCode::StageSkipBadValue,
    ErrorCode::StageLimitZero,
    ErrorCode::MatchBadExpression,
    ErrorCode::SortBadExpression,
    ErrorCode::SortBadValue,
    ErrorCode::SortBadOrder,
    ErrorCode::SortMissingKey,
    ErrorCode::PathContainsEmptyElement,
    ErrorCode::GroupInvalidFieldPath,
    ErrorCode::InvalidArg,
    ErrorCode::SliceFirstArg,
    ErrorCode::ProjectionInEx,
    ErrorCode::ProjectionExIn,
    ErrorCode::StageCountNonString,
    ErrorCode::StageCountNonEmptyString,
    ErrorCode::StageCountBadPrefix,
    ErrorCode::StageCountBadValue,
    ErrorCode::StageGroupInvalidAccumulator,
    ErrorCode::StageGroupUnaryOperator,
    ErrorCode::StageGroupMultipleAccumulator,
    ErrorCode::StageInvalid,
    ErrorCode::UnrecognizedPipelineStage,
    ErrorCode::EmptyFieldPath,
    ErrorCode::MissingField,
    ErrorCode::FailedToParseInput,
    ErrorCode::ValueNegative,
    ErrorCode::RegexOptions,
    ErrorCode::RegexMissingParen,
    ErrorCode::BadRegexOption,
    ErrorCode::DuplicateField,
    ErrorCode::StageLimitInvalidArg,
];

impl ErrorCode {
    pub const fn code(self) -> i32 {
        match self {
            ErrorCode::InternalError => 1,
            ErrorCode::BadValue => 2,
            ErrorCode::FailedToParse => 9,
            ErrorCode::TypeMismatch => 14,
            ErrorCode::NamespaceNotFound => 26,
            ErrorCode::PathNotViable => 28,
            ErrorCode::ConflictingUpdateOperators => 40,
            ErrorCode::CursorNotFound => 43,
            ErrorCode::NamespaceExists => 48,
            ErrorCode::MaxTimeMSExpired => 50,
            ErrorCode::DollarPrefixedFieldName => 52,
            ErrorCode::InvalidID => 53,
            ErrorCode::EmptyFieldName => 56,
            ErrorCode::CommandNotFound => 59,
            ErrorCode::ImmutableField => 66,
            ErrorCode::CannotCreateIndex => 67,
            ErrorCode::IndexAlreadyExists => 68,
            ErrorCode::InvalidNamespace => 73,
            ErrorCode::IndexOptionsConflict => 85,
            ErrorCode::IndexKeySpecsConflict => 86,
            ErrorCode::OperationFailed => 96,
            ErrorCode::InvalidPipelineOperator => 168,
            ErrorCode::DocumentValidationFailure => 121,
            ErrorCode::NotImplemented => 238,
            ErrorCode::DuplicateKey => 11000,
            ErrorCode::Interrupted => 11601,
            ErrorCode::StageGroupInvalidFields => 15947,
            ErrorCode::StageGroupID => 15948,
            ErrorCode::StageGroupMissingID => 15955,
            ErrorCode::StageSkipBadValue => 15956,
            ErrorCode::StageLimitZero => 15958,
            ErrorCode::MatchBadExpression => 15959,
            ErrorCode::SortBadExpression => 15973,
            ErrorCode::SortBadValue => 15974,
            ErrorCode::SortBadOrder => 15975,
            ErrorCode::SortMissingKey => 15976,
            ErrorCode::PathContainsEmptyElement => 15998,
            ErrorCode::GroupInvalidFieldPath => 16872,
            ErrorCode::InvalidArg => 28667,
            ErrorCode::SliceFirstArg => 28724,
            ErrorCode::ProjectionInEx => 31253,
            ErrorCode::ProjectionExIn => 31254,
            ErrorCode::StageCountNonString => 40156,
            ErrorCode::StageCountNonEmptyString => 40157,
            ErrorCode::StageCountBadPrefix => 40158,
            ErrorCode::StageCountBadValue => 40160,
            ErrorCode::StageGroupInvalidAccumulator => 40234,
            ErrorCode::StageGroupUnaryOperator => 40237,
            ErrorCode::StageGroupMultipleAccumulator => 40238,
            ErrorCode::StageInvalid => 40323,
            ErrorCode::UnrecognizedPipelineStage => 40324,
            ErrorCode::EmptyFieldPath => 40352,
            ErrorCode::MissingField => 40414,
            ErrorCode::FailedToParseInput => 40415,
            ErrorCode::ValueNegative => 51024,
            ErrorCode::RegexOptions => 51075,
            ErrorCode::RegexMissingParen => 51091,
            ErrorCode::BadRegexOption => 51108,
            ErrorCode::DuplicateField => 4822819,
            ErrorCode::StageLimitInvalidArg => 5107201,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ErrorCode::InternalError => "InternalError",
            ErrorCode::BadValue => "BadValue",
            ErrorCode::FailedToParse => "FailedToParse",
            ErrorCode::TypeMismatch => "TypeMismatch",
            ErrorCode::NamespaceNotFound => "NamespaceNotFound",
            ErrorCode::PathNotViable => "PathNotViable",
            ErrorCode::ConflictingUpdateOperators => "ConflictingUpdateOperators",
            ErrorCode::CursorNotFound => "CursorNotFound",
            ErrorCode::NamespaceExists => "NamespaceExists",
            ErrorCode::MaxTimeMSExpired => "MaxTimeMSExpired",
            ErrorCode::DollarPrefixedFieldName => "DollarPrefixedFieldName",
            ErrorCode::InvalidID => "InvalidID",
            ErrorCode::EmptyFieldName => "EmptyFieldName",
            ErrorCode::CommandNotFound => "CommandNotFound",
            ErrorCode::ImmutableField => "ImmutableField",
            ErrorCode::CannotCreateIndex => "CannotCreateIndex",
            ErrorCode::IndexAlreadyExists => "IndexAlreadyExists",
            ErrorCode::InvalidNamespace => "InvalidNamespace",
            ErrorCode::IndexOptionsConflict => "IndexOptionsConflict",
            ErrorCode::IndexKeySpecsConflict => "IndexKeySpecsConflict",
            ErrorCode::OperationFailed => "OperationFailed",
            ErrorCode::InvalidPipelineOperator => "InvalidPipelineOperator",
            ErrorCode::DocumentValidationFailure => "DocumentValidationFailure",
            ErrorCode::NotImplemented => "NotImplemented",
            ErrorCode::DuplicateKey => "Location11000",
            ErrorCode::Interrupted => "Interrupted",
            ErrorCode::StageGroupInvalidFields => "Location15947",
            ErrorCode::StageGroupID => "Location15948",
            ErrorCode::StageGroupMissingID => "Location15955",
            ErrorCode::StageSkipBadValue => "Location15956",
            ErrorCode::StageLimitZero => "Location15958",
            ErrorCode::MatchBadExpression => "Location15959",
            ErrorCode::SortBadExpression => "Location15973",
            ErrorCode::SortBadValue => "Location15974",
            ErrorCode::SortBadOrder => "Location15975",
            ErrorCode::SortMissingKey => "Location15976",
            ErrorCode::PathContainsEmptyElement => "Location15998",
            ErrorCode::GroupInvalidFieldPath => "Location16872",
            ErrorCode::InvalidArg => "Location28667",
            ErrorCode::SliceFirstArg => "Location28724",
            ErrorCode::ProjectionInEx => "Location31253",
            ErrorCode::ProjectionExIn => "Location31254",
            ErrorCode::StageCountNonString => "Location40156",
            ErrorCode::StageCountNonEmptyString => "Location40157",
            ErrorCode::StageCountBadPrefix => "Location40158",
            ErrorCode::StageCountBadValue => "Location40160",
            ErrorCode::StageGroupInvalidAccumulator => "Location40234",
            ErrorCode::StageGroupUnaryOperator => "Location40237",
            ErrorCode::StageGroupMultipleAccumulator => "Location40238",
            ErrorCode::StageInvalid => "Location40323",
            ErrorCode::UnrecognizedPipelineStage => "Location40324",
            ErrorCode::EmptyFieldPath => "Location40352",
            ErrorCode::MissingField => "Location40414",
            ErrorCode::FailedToParseInput => "Location40415",
            ErrorCode::ValueNegative => "Location51024",
            ErrorCode::RegexOptions => "Location51075",
            ErrorCode::RegexMissingParen => "Location51091",
            ErrorCode::BadRegexOption => "Location51108",
            ErrorCode::DuplicateField => "Location4822819",
            ErrorCode::StageLimitInvalidArg => "Location5107201",
        }
    }

    /// Looks a numeric code up in the table.
    pub fn from_code(code: i32) -> Option<ErrorCode> {
        ALL.iter().copied().find(|c| c.code() == code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
