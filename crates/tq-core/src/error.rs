use thiserror::Error;

/// Errors raised while composing a query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The query carries no `ago(<n><m|h|d>)` token and no explicit range.
    #[error("query has no ago(...) duration token: {0}")]
    MissingDurationToken(String),

    #[error("invalid duration token '{0}', expected <integer><m|h|d>")]
    InvalidDurationToken(String),

    /// The base query reads a table that cannot be correlated through
    /// `operation_Id`, so it cannot restrict another table.
    #[error("table '{0}' cannot be correlated with the analyzed table")]
    UncorrelatedTable(String),

    #[error("invalid time range: {from} is not before {to}")]
    InvalidRange { from: String, to: String },
}
