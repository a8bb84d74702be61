#![forbid(unsafe_code)]

use thiserror::Error;

/// Failure taxonomy of the columnar layer.
///
/// Representation mismatch (a chunk mutator that cannot hold a value)
/// is deliberately absent: it is a `bool` at the chunk seam, absorbed by
/// the column write path through inflation, and never surfaces. Every
/// variant here propagates to the immediate caller without retry.
#[derive(Debug, Error)]
pub enum ColumnarError {
    /// The operation is structurally invalid right now: reading rollup
    /// stats during an active write, writing through a read-only view,
    /// sealing a build with unreported interior chunks, reading a view
    /// whose master column was deleted.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An integer read hit a missing value. The float accessor reports
    /// missing as a value (`None`/NaN); the integer accessor cannot.
    #[error("value at row {row} is missing")]
    MissingValue { row: u64 },

    /// Columns with mismatched chunk layouts combined into one frame, a
    /// categorical conversion of a non-integer column, or a write with
    /// no common representation.
    #[error("incompatible: {0}")]
    Incompatibility(String),

    /// Categorical conversion found more distinct values than the hard
    /// ceiling. No truncated domain is ever returned.
    #[error("column domain is too large to be categorical: {found} > {max}")]
    CardinalityExceeded { found: usize, max: usize },

    /// A key this layer expects is absent or undecodable: corrupted or
    /// partially replicated cluster state. Fatal; never repaired here.
    #[error("store inconsistency: {0}")]
    StoreInconsistency(String),

    /// A header document failed to encode or decode.
    #[error("malformed header document: {0}")]
    Header(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ColumnarError>;
