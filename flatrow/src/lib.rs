//! # flatrow
//!
//! Deterministic binary encoding of metric rows.
//!
//! flatrow assembles one time-series data point (namespace, name, timestamp,
//! tags and numeric fields) into a compact FlatBuffers-compatible byte buffer
//! for shipping to a downstream store. It is meant to sit on the hot ingestion
//! path of an agent or collector.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Byte-identical output for the same logical row, whatever the tag order
//! - Validation at the `add_*` call that supplies a bad value
//! - Canonical, hashed tag sets that identify a series
//! - No per-row heap allocation once a pooled builder has warmed up
//!
//! ## Quick Start
//!
//! ```rust
//! use flatrow::{RowView, SimpleFieldType};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Take a builder from the process-wide pool
//! let mut builder = flatrow::acquire();
//!
//! builder.add_namespace("vm");
//! builder.add_metric_name("cpu.usage");
//! builder.add_timestamp(1_640_000_000_000);
//! builder.add_tag("host", "web1")?;
//! builder.add_simple_field("user", SimpleFieldType::Last, 85.5)?;
//! builder.add_compound_field_mmsc(0.2, 9.0, 31.0, 12.0)?;
//! builder.add_compound_field_data(&[1.0, 5.0, f64::INFINITY], &[4.0, 6.0, 2.0])?;
//!
//! let bytes = builder.build()?.to_vec();
//! // Dropping the guard resets the builder and returns it to the pool
//! drop(builder);
//!
//! let row = RowView::new(&bytes)?;
//! assert_eq!(row.name()?, b"cpu.usage");
//! assert_eq!(row.key_values()?, vec![(&b"host"[..], &b"web1"[..])]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`RowBuilder`]: Accumulates one row and encodes it
//! - [`RowBuilderPool`]: Recycles builders; hands out [`PooledRowBuilder`] guards
//! - [`RowView`]: Bounds-checked reader over an encoded row
//! - [`RowSpec`]: Owned, serde-friendly row description
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`builder`]: Row encoder
//! - [`tags`]: Tag accumulation and canonicalization
//! - [`field`]: Field validation and accumulation
//! - [`writer`]: Bottom-up binary writer
//! - [`schema`]: Wire schema slots and constants
//! - [`view`]: Encoded row reader
//! - [`pool`]: Builder pool and its configuration
//! - [`row`]: Row descriptions
//! - [`error`]: Error types

pub mod builder;
pub mod error;
pub mod field;
pub mod pool;
pub mod row;
pub mod schema;
pub mod tags;
pub mod view;
pub mod writer;

// Re-export primary API types at crate root for convenience.
pub use builder::RowBuilder;
pub use error::{ConfigError, DecodeError, FlatrowError, Result, RowError};
pub use pool::{PoolConfig, PooledRowBuilder, RowBuilderPool};
pub use row::RowSpec;
pub use schema::{EMPTY_TAGS_HASH, SimpleFieldType};
pub use view::RowView;

/// Takes an empty builder from the process-wide pool.
///
/// Shorthand for `flatrow::pool::global().acquire()`.
pub fn acquire() -> PooledRowBuilder {
    pool::global().acquire()
}
