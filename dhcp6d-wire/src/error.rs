//! Error types for the wire codec

use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors that can occur while parsing or serializing DHCPv6 elements
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The buffer ended before the element was complete
    #[error("insufficient data: needed {needed} more bytes for {element}")]
    InsufficientData {
        element: &'static str,
        needed: usize,
    },

    /// A declared length doesn't match the structure of the element
    #[error("invalid length {length} for {element}")]
    InvalidLength { element: &'static str, length: usize },

    /// A field contains data that cannot be decoded
    #[error("malformed {0}")]
    MalformedField(String),

    /// The relay chain nests deeper than the configured ceiling
    #[error("relay chain exceeds maximum depth of {max_depth}")]
    RelayTooDeep { max_depth: usize },
}

impl WireError {
    /// Shorthand for a truncated-buffer error
    pub fn short(element: &'static str, needed: usize) -> Self {
        WireError::InsufficientData { element, needed }
    }

    /// Shorthand for a malformed-field error
    pub fn malformed<S: Into<String>>(what: S) -> Self {
        WireError::MalformedField(what.into())
    }
}
