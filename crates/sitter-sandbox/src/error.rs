//! Error types for the sitter-sandbox crate.

use thiserror::Error;

use crate::diagnostics::QueryErrorKind;

/// Binding error type
#[derive(Error, Debug)]
pub enum SitterError {
    /// A guest call trapped. The owning session is poisoned and refuses any further call.
    #[error("guest trap in '{export}': {message}")]
    GuestTrap {
        /// Export that was executing (or the operation attempted on a poisoned session)
        export: String,
        /// Trap description reported by the runtime
        message: String,
    },

    /// The guest allocator returned a null address
    #[error("guest allocation of {requested} bytes failed")]
    AllocationFailure {
        /// Number of bytes requested
        requested: u32,
    },

    /// A transfer touched bytes past the end of guest memory
    #[error("guest memory access out of bounds: address={address} len={len} memory_size={memory_size}")]
    OutOfBounds {
        /// Guest address of the access
        address: u32,
        /// Length of the access in bytes
        len: u64,
        /// Guest memory size at the time of the access
        memory_size: usize,
    },

    /// A fixed-layout record returned by the guest does not fit in guest memory
    #[error("corrupt {record} record: address={address} len={len} memory_size={memory_size}")]
    CorruptRecord {
        /// Record type being decoded
        record: &'static str,
        /// Guest address of the record
        address: u32,
        /// Bytes the decoder needed
        len: u64,
        /// Guest memory size at the time of the decode
        memory_size: usize,
    },

    /// The guest refused the grammar
    #[error("incompatible language version {0}")]
    IncompatibleLanguageVersion(u32),

    /// The guest failed to compile a query pattern
    #[error("{message}")]
    QueryCompile {
        /// Byte offset of the error in the pattern
        offset: u32,
        /// Error category reported by the guest
        kind: QueryErrorKind,
        /// Line/column annotated description
        message: String,
    },

    /// A handle was used after its resource (or its session) was released
    #[error("{resource} used after it was released")]
    UseAfterFree {
        /// Kind of resource
        resource: &'static str,
    },

    /// The parse exceeded the parser's timeout
    #[error("parse timed out after {timeout_micros}us")]
    ParseTimeout {
        /// Timeout that was in effect
        timeout_micros: u64,
    },

    /// The guest returned no tree (usually because no language was set)
    #[error("guest returned no tree")]
    ParseFailed,

    /// A required function is not exported by the guest module
    #[error("guest module does not export '{0}'")]
    MissingExport(String),

    /// A guest string is not valid UTF-8
    #[error("guest string at {address} is not valid UTF-8")]
    InvalidString {
        /// Guest address of the string
        address: u32,
    },

    /// Engine, compilation, link or instantiation error
    #[error("WASM error: {0}")]
    WasmError(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SitterError {
    /// Whether this error poisoned the session that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SitterError::GuestTrap { .. })
    }
}

/// Result type alias for binding operations
pub type Result<T> = std::result::Result<T, SitterError>;
