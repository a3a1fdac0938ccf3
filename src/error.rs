//! Crate-wide error taxonomy.

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, WeftError>;

/// Errors surfaced by the composition core.
///
/// Invalid-state and capacity errors abort the current request's
/// composition; partial subgraph failures are represented as data
/// (invalidated or undefined slots) and never travel through this enum.
#[derive(Debug, Error)]
pub enum WeftError {
    /// An operation was attempted against an object in the wrong lifecycle
    /// state (disposed store, unclosed builder, already-set slot, ...).
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    /// A row field value does not fit its bit-width budget.
    #[error("{field} value {value} exceeds its {bits}-bit budget")]
    CapacityExceeded {
        /// Name of the offending row field.
        field: &'static str,
        /// The rejected value.
        value: u64,
        /// The field's bit width.
        bits: u32,
    },
    /// A cursor or index referenced a row past the end of the store.
    #[error("row index {index} out of range (rows: {len})")]
    RowIndexOutOfRange {
        /// The requested row index.
        index: u32,
        /// Number of rows currently in the store.
        len: u32,
    },
    /// The input bytes are not well-formed JSON text.
    #[error("parse error at byte {position}: {message}")]
    Parse {
        /// Absolute byte offset in the logical input.
        position: usize,
        /// Human-readable description of the failure.
        message: String,
    },
    /// A caller-supplied argument violated the API contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// An object has no property with the requested name.
    #[error("property '{0}' not found")]
    PropertyNotFound(String),
    /// A field name does not appear in the element's selection set.
    #[error("field '{0}' is not part of the selection set")]
    SelectionNotFound(String),
}
