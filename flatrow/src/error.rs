//! Error types for the flatrow row builder.

use thiserror::Error;

/// The main error type for all flatrow operations.
///
/// Row construction errors are surfaced through [`RowError`]; decoding an
/// encoded row reports [`DecodeError`]; loading pool configuration reports
/// [`ConfigError`].
#[derive(Error, Debug)]
pub enum FlatrowError {
    /// A value passed to the row builder was rejected, or the row is incomplete.
    #[error("row error: {0}")]
    Row(#[from] RowError),

    /// An encoded row could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Pool configuration is invalid or could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Writing an encoded row to an output sink failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while accumulating or building a metric row.
///
/// Every variant except [`RowError::EmptyRow`] is returned from the `add_*`
/// call that detected it, and the rejected call leaves the builder unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowError {
    /// A tag key or value was empty.
    #[error("invalid tag {key:?}={value:?}: key and value must be non-empty")]
    InvalidTag {
        /// The rejected key, lossily decoded as UTF-8.
        key: String,
        /// The rejected value, lossily decoded as UTF-8.
        value: String,
    },

    /// A simple field was added with an empty name.
    #[error("invalid field name: name cannot be empty")]
    InvalidFieldName,

    /// A simple field was added with the unspecified type.
    #[error("invalid field type {field_type}: type must be specified")]
    InvalidFieldType {
        /// The raw type discriminant.
        field_type: u8,
    },

    /// A field value is NaN, infinite, or negative where it must not be.
    #[error("invalid field value {value}: {reason}")]
    InvalidFieldValue {
        /// The rejected value.
        value: f64,
        /// Why the value is invalid.
        reason: &'static str,
    },

    /// Histogram bucket bounds are malformed.
    #[error("invalid bucket bounds: {reason}")]
    InvalidBounds {
        /// Description of what is wrong with the bounds.
        reason: &'static str,
    },

    /// `build` was called on a row with no simple field and no compound field.
    #[error("row has no simple fields and no compound field")]
    EmptyRow,
}

/// Errors raised while reading an encoded row.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// An offset or length points outside the buffer.
    #[error("access beyond buffer bounds: offset {offset} + length {length} > buffer size {buffer_len}")]
    OutOfBounds {
        /// The attempted offset.
        offset: usize,
        /// The attempted read length.
        length: usize,
        /// The actual buffer size.
        buffer_len: usize,
    },

    /// A vtable is truncated or describes an impossible table.
    #[error("invalid vtable at offset {offset}")]
    InvalidVTable {
        /// Absolute offset of the vtable.
        offset: usize,
    },

    /// A simple field carries a type discriminant this reader does not know.
    #[error("unknown simple field type {raw}")]
    UnknownFieldType {
        /// The raw discriminant.
        raw: u8,
    },
}

/// Errors raised while validating or loading pool configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// `max_idle` must allow at least one pooled builder.
    #[error("invalid max_idle {max_idle}: must be greater than zero")]
    InvalidMaxIdle {
        /// The configured value.
        max_idle: usize,
    },

    /// The configuration file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`PoolConfig`](crate::pool::PoolConfig).
    #[error("failed to parse config '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: std::path::PathBuf,
        /// The underlying JSON parsing error.
        #[source]
        source: serde_json::Error,
    },
}

/// Type alias for `Result<T, FlatrowError>`.
pub type Result<T> = std::result::Result<T, FlatrowError>;
