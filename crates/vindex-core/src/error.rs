//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the graph engine, the dump codec, and the
//! database orchestrator returns this single [`Error`] type. Diagnostic-only
//! conditions (EF clamping, oplog replay misses) are deliberately *not*
//! variants here — they are observable through counters and logs instead,
//! matching how they are consumed.

use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the graph engine, dump codec, and orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configuration field disagreed with the runtime config, either on a
    /// dump load or on an `update_config` attempt after `init_index`.
    #[error("config mismatch on field `{field}`: expected {expected}, got {actual}")]
    ConfigMismatch {
        /// Name of the disagreeing field.
        field: &'static str,
        /// The value already committed to the running index.
        expected: String,
        /// The value that was rejected.
        actual: String,
    },

    /// The dump header or body failed validation (bad magic, version,
    /// out-of-range field, or truncated body).
    #[error("corrupt dump: {0}")]
    CorruptDump(String),

    /// An internal id was requested at or beyond capacity.
    #[error("out of capacity: requested id {requested}, capacity is {capacity}")]
    OutOfCapacity {
        /// The id (or count) that did not fit.
        requested: u32,
        /// The configured capacity.
        capacity: u32,
    },

    /// An input vector's length did not match the configured dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Length of the offending vector.
        actual: usize,
    },

    /// A read or write returned fewer bytes than required.
    #[error("short I/O on {path}: expected {expected} bytes, got {actual}")]
    ShortIo {
        /// Path of the file the short I/O happened against.
        path: PathBuf,
        /// Bytes that should have been transferred.
        expected: usize,
        /// Bytes actually transferred.
        actual: usize,
    },

    /// The arena failed to grow its backing region.
    #[error("allocation failure: requested {requested} additional bytes")]
    AllocationFailure {
        /// Size of the failed growth request.
        requested: usize,
    },

    /// Underlying I/O failure not covered by a more specific variant.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Dump/mapping (de)serialization failure.
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
}
