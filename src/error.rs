//! Error taxonomy for loading, reading, writing and checksumming.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the engine.
///
/// Per-field errors ([`Error::AddressOutOfRange`], [`Error::InvalidWriteValue`],
/// [`Error::InvalidBcd`]) are isolated to the field they concern; format detection
/// and buffer-load errors are fatal to the session.
#[derive(Debug, Error)]
pub enum Error {
    /// No region validator matched the buffer.
    #[error("format not recognized: no region validator matched")]
    FormatNotRecognized,

    /// A resolved address falls outside the buffer.
    #[error("address out of range: bit offset {bit_offset} (+{bits} bits) beyond buffer of {buffer_len} bytes")]
    AddressOutOfRange {
        /// Absolute bit offset of the access
        bit_offset: i64,
        /// Width of the access in bits
        bits: u32,
        /// Buffer length in bytes
        buffer_len: usize,
    },

    /// A value was rejected before any mutation.
    #[error("invalid write value: {0}")]
    InvalidWriteValue(String),

    /// Stored BCD data holds a nibble above 9.
    #[error("invalid BCD digit {digit:#x} at byte {byte_offset:#x}")]
    InvalidBcd {
        /// Offending nibble
        digit: u8,
        /// Byte holding the nibble
        byte_offset: usize,
    },

    /// A checksum has neither a built-in algorithm nor a hook.
    #[error("no checksum algorithm for `{0}`")]
    ChecksumAlgorithmMissing(String),

    /// Structurally invalid schema.
    #[error("schema: {0}")]
    Schema(String),

    /// Value kind does not fit the item kind.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// No item with this key in the resolved tree.
    #[error("unknown item: {0}")]
    UnknownItem(String),

    /// Operation requires a loaded buffer.
    #[error("no buffer loaded")]
    NotLoaded,

    /// A derived-field propagation chain revisited an item.
    #[error("propagation cycle through `{0}`")]
    PropagationCycle(String),

    /// A derived-field propagation chain exceeded the configured depth.
    #[error("propagation deeper than {0} levels")]
    PropagationDepth(usize),

    /// Hook-reported failure.
    #[error("hook: {0}")]
    Hook(String),

    /// Invalid string constraint.
    #[error(transparent)]
    Regex(#[from] regex::Error),

    /// JSON schema decoding.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Per-field errors that must not abort a tree walk.
    pub fn is_field_local(&self) -> bool {
        matches!(
            self,
            Error::AddressOutOfRange { .. }
                | Error::InvalidWriteValue(_)
                | Error::InvalidBcd { .. }
                | Error::TypeMismatch(_)
        )
    }
}
