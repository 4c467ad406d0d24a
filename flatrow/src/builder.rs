//! Row encoder.
//!
//! [`RowBuilder`] accumulates one metric row through `add_*` calls and encodes
//! it into the fixed [`schema`](crate::schema) with [`RowBuilder::build`]. All
//! buffers are owned by the builder and survive [`RowBuilder::reset`], which is
//! what makes pooled builders allocation-free once warmed up.
//!
//! # Example
//!
//! ```rust
//! use flatrow::{RowBuilder, SimpleFieldType};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder = RowBuilder::new();
//! builder.add_namespace("system");
//! builder.add_metric_name("cpu");
//! builder.add_timestamp(1_700_000_000_000);
//! builder.add_tag("host", "web1")?;
//! builder.add_simple_field("idle", SimpleFieldType::Last, 97.5)?;
//!
//! let bytes = builder.build()?;
//! assert!(!bytes.is_empty());
//! # Ok(())
//! # }
//! ```

use std::hash::Hasher;
use std::io;

use twox_hash::XxHash64;

use crate::error::{Result, RowError};
use crate::field::FieldSet;
use crate::schema::{
    RESERVED_SEPARATOR, SEPARATOR_REPLACEMENT, SimpleFieldType, compound_field, key_value, metric,
    simple_field,
};
use crate::tags::TagSet;
use crate::writer::{BinaryWriter, DEFAULT_WRITER_CAPACITY, FlatWriter, Offset};

/// Builder for a single encoded metric row.
///
/// A builder has exactly one holder at a time. It is reused row after row:
/// call [`reset`](Self::reset) (or return it to a
/// [`RowBuilderPool`](crate::pool::RowBuilderPool)) between rows.
///
/// `Default` yields a builder with no reserved buffers; [`new`](Self::new)
/// pre-reserves [`DEFAULT_WRITER_CAPACITY`] bytes for the encoded output.
#[derive(Debug, Default)]
pub struct RowBuilder {
    namespace: Vec<u8>,
    name: Vec<u8>,
    timestamp: i64,
    tags: TagSet,
    fields: FieldSet,
    writer: FlatWriter,
    /// Scratch for child table offsets while encoding a vector.
    offsets: Vec<Offset>,
}

impl RowBuilder {
    /// Creates an empty builder with the default output capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_WRITER_CAPACITY)
    }

    /// Creates an empty builder with `writer_capacity` bytes reserved for output.
    pub fn with_capacity(writer_capacity: usize) -> Self {
        Self {
            writer: FlatWriter::with_capacity(writer_capacity),
            ..Self::default()
        }
    }

    /// Sets the namespace, replacing any previous one.
    ///
    /// Every `|` is replaced with `_`.
    pub fn add_namespace(&mut self, namespace: impl AsRef<[u8]>) {
        set_sanitized(&mut self.namespace, namespace.as_ref());
    }

    /// Sets the metric name, replacing any previous one.
    ///
    /// Every `|` is replaced with `_`.
    pub fn add_metric_name(&mut self, name: impl AsRef<[u8]>) {
        set_sanitized(&mut self.name, name.as_ref());
    }

    /// Sets the timestamp, in milliseconds.
    pub fn add_timestamp(&mut self, timestamp_ms: i64) {
        self.timestamp = timestamp_ms;
    }

    /// Adds a tag. A later tag with the same key overrides an earlier one.
    ///
    /// # Errors
    ///
    /// Returns [`RowError::InvalidTag`] if the key or value is empty.
    pub fn add_tag(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.tags.add_tag(key, value)
    }

    /// Appends a simple field.
    ///
    /// # Errors
    ///
    /// See [`FieldSet::add_simple_field`].
    pub fn add_simple_field(
        &mut self,
        name: impl AsRef<[u8]>,
        field_type: SimpleFieldType,
        value: f64,
    ) -> Result<()> {
        self.fields.add_simple_field(name, field_type, value)
    }

    /// Sets the histogram buckets of the compound field.
    ///
    /// # Errors
    ///
    /// See [`FieldSet::add_compound_field_data`].
    pub fn add_compound_field_data(&mut self, bounds: &[f64], values: &[f64]) -> Result<()> {
        self.fields.add_compound_field_data(bounds, values)
    }

    /// Sets the min/max/sum/count summary of the compound field.
    ///
    /// # Errors
    ///
    /// See [`FieldSet::add_compound_field_mmsc`].
    pub fn add_compound_field_mmsc(&mut self, min: f64, max: f64, sum: f64, count: f64) -> Result<()> {
        self.fields.add_compound_field_mmsc(min, max, sum, count)
    }

    /// Returns the number of simple fields added so far.
    pub fn simple_fields_len(&self) -> usize {
        self.fields.simple_fields_len()
    }

    /// Returns the sanitized namespace.
    pub fn namespace(&self) -> &[u8] {
        &self.namespace
    }

    /// Returns the sanitized metric name.
    pub fn metric_name(&self) -> &[u8] {
        &self.name
    }

    /// Returns the timestamp, in milliseconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Returns the number of tags added, duplicates included.
    pub fn tags_len(&self) -> usize {
        self.tags.len()
    }

    /// Returns `true` once histogram bucket data has been set.
    pub fn has_compound_field(&self) -> bool {
        self.fields.compound_field().is_some()
    }

    /// Returns the accumulated tags.
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Returns the accumulated fields.
    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    /// Canonicalizes the tags and returns the canonical string and its hash.
    pub fn canonical_tags(&mut self) -> (&[u8], u64) {
        let hash = self.tags.canonicalize();
        (self.tags.canonical(), hash)
    }

    /// Hash identifying the metric: XXH64 (seed 0) of `namespace|name`.
    pub fn name_hash(&self) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(&self.namespace);
        hasher.write(&[RESERVED_SEPARATOR]);
        hasher.write(&self.name);
        hasher.finish()
    }

    /// Encodes the row and returns the encoded bytes.
    ///
    /// The bytes live in the builder's output buffer and are overwritten by
    /// the next build. Building twice without intermediate changes produces
    /// identical bytes, as does replaying the same calls on another builder.
    ///
    /// # Errors
    ///
    /// Returns [`RowError::EmptyRow`] if the row has neither a simple field
    /// nor compound bucket data.
    pub fn build(&mut self) -> Result<&[u8]> {
        if self.fields.is_empty() {
            return Err(RowError::EmptyRow.into());
        }
        let kvs_hash = self.tags.canonicalize();
        let name_hash = self.name_hash();

        let Self {
            namespace,
            name,
            timestamp,
            tags,
            fields,
            writer,
            offsets,
        } = self;
        writer.reset();

        offsets.clear();
        for (key, value) in tags.canonical_tags() {
            let key = writer.create_string(key);
            let value = writer.create_string(value);
            writer.start_table();
            writer.add_offset(key_value::KEY, key);
            writer.add_offset(key_value::VALUE, value);
            offsets.push(writer.end_table());
        }
        let key_values = writer.create_offset_vector(&offsets[..]);

        offsets.clear();
        for field in fields.simple_fields() {
            let field_name = writer.create_string(field.name);
            writer.start_table();
            writer.add_scalar(simple_field::VALUE, field.value);
            writer.add_offset(simple_field::NAME, field_name);
            writer.add_scalar(simple_field::TYPE, field.field_type.as_u8());
            offsets.push(writer.end_table());
        }
        let simple_fields = writer.create_offset_vector(&offsets[..]);

        let compound = fields.compound_field().map(|compound| {
            let bounds = writer.create_scalar_vector(compound.bounds);
            let values = writer.create_scalar_vector(compound.values);
            writer.start_table();
            writer.add_scalar(compound_field::MIN, compound.min);
            writer.add_scalar(compound_field::MAX, compound.max);
            writer.add_scalar(compound_field::SUM, compound.sum);
            writer.add_scalar(compound_field::COUNT, compound.count);
            writer.add_offset(compound_field::EXPLICIT_BOUNDS, bounds);
            writer.add_offset(compound_field::VALUES, values);
            writer.end_table()
        });

        let namespace = writer.create_string(namespace);
        let name = writer.create_string(name);

        writer.start_table();
        writer.add_scalar(metric::TIMESTAMP, *timestamp);
        writer.add_scalar(metric::NAME_HASH, name_hash);
        writer.add_scalar(metric::KVS_HASH, kvs_hash);
        writer.add_offset(metric::NAMESPACE, namespace);
        writer.add_offset(metric::NAME, name);
        writer.add_offset(metric::KEY_VALUES, key_values);
        writer.add_offset(metric::SIMPLE_FIELDS, simple_fields);
        if let Some(compound) = compound {
            writer.add_offset(metric::COMPOUND_FIELD, compound);
        }
        let root = writer.end_table();
        Ok(writer.finish(root))
    }

    /// Encodes the row and writes it to `out`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns the [`build`](Self::build) error, or [`FlatrowError::Io`](crate::FlatrowError::Io)
    /// if writing fails.
    pub fn build_to<W: io::Write + ?Sized>(&mut self, out: &mut W) -> Result<usize> {
        let bytes = self.build()?;
        out.write_all(bytes)?;
        Ok(bytes.len())
    }

    /// Clears every part of the row, retaining allocated capacity.
    pub fn reset(&mut self) {
        self.namespace.clear();
        self.name.clear();
        self.timestamp = 0;
        self.tags.clear();
        self.fields.clear();
        self.writer.reset();
        self.offsets.clear();
    }
}

fn set_sanitized(dst: &mut Vec<u8>, src: &[u8]) {
    dst.clear();
    dst.extend(src.iter().map(|&b| {
        if b == RESERVED_SEPARATOR {
            SEPARATOR_REPLACEMENT
        } else {
            b
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlatrowError;
    use crate::schema::EMPTY_TAGS_HASH;
    use crate::view::RowView;

    fn sample(builder: &mut RowBuilder) {
        builder.add_tag("a", "b").unwrap();
        builder.add_simple_field("f1", SimpleFieldType::DeltaSum, 1.0).unwrap();
        builder.add_metric_name("namespace");
        builder.add_timestamp(111_111);
    }

    #[test]
    fn test_build_is_deterministic() {
        let mut builder = RowBuilder::new();
        sample(&mut builder);
        let first = builder.build().unwrap().to_vec();

        for _ in 0..20 {
            assert_eq!(builder.build().unwrap(), &first[..]);
        }
        for _ in 0..20 {
            builder.reset();
            sample(&mut builder);
            assert_eq!(builder.build().unwrap(), &first[..]);
        }

        let mut fresh = RowBuilder::default();
        sample(&mut fresh);
        assert_eq!(fresh.build().unwrap(), &first[..]);
    }

    #[test]
    fn test_tag_insertion_order_does_not_change_bytes() {
        let mut forward = RowBuilder::new();
        forward.add_tag("host", "web1").unwrap();
        forward.add_tag("dc", "east").unwrap();
        forward.add_simple_field("v", SimpleFieldType::Last, 1.0).unwrap();

        let mut backward = RowBuilder::new();
        backward.add_tag("dc", "east").unwrap();
        backward.add_tag("host", "web1").unwrap();
        backward.add_simple_field("v", SimpleFieldType::Last, 1.0).unwrap();

        assert_eq!(forward.build().unwrap(), backward.build().unwrap());
    }

    #[test]
    fn test_sanitization() {
        let mut builder = RowBuilder::new();
        builder.add_namespace("a|b");
        builder.add_metric_name("||x");
        assert_eq!(builder.namespace(), b"a_b");
        assert_eq!(builder.metric_name(), b"__x");

        builder.add_metric_name("plain");
        assert_eq!(builder.metric_name(), b"plain");
    }

    #[test]
    fn test_empty_row() {
        let mut builder = RowBuilder::new();
        builder.add_metric_name("cpu");
        builder.add_tag("host", "web1").unwrap();
        let err = builder.build().unwrap_err();
        assert!(matches!(err, FlatrowError::Row(RowError::EmptyRow)));

        builder.add_compound_field_mmsc(1.0, 2.0, 3.0, 2.0).unwrap();
        assert!(!builder.has_compound_field());
        assert!(matches!(
            builder.build().unwrap_err(),
            FlatrowError::Row(RowError::EmptyRow)
        ));
    }

    #[test]
    fn test_round_trip() {
        let mut builder = RowBuilder::new();
        builder.add_namespace("system");
        builder.add_metric_name("disk|io");
        builder.add_timestamp(-5);
        builder.add_tag("dev", "sda").unwrap();
        builder.add_tag("host", "web1").unwrap();
        builder.add_tag("dev", "sdb").unwrap();
        builder.add_simple_field("reads", SimpleFieldType::DeltaSum, 12.0).unwrap();
        builder.add_simple_field("queue", SimpleFieldType::Max, 3.5).unwrap();
        builder.add_compound_field_mmsc(0.5, 40.0, 100.0, 9.0).unwrap();
        builder
            .add_compound_field_data(&[1.0, 10.0, f64::INFINITY], &[2.0, 5.0, 2.0])
            .unwrap();

        let (canonical, kvs_hash) = builder.canonical_tags();
        assert_eq!(canonical, b"dev=sdb,host=web1");
        let name_hash = builder.name_hash();
        assert_eq!(name_hash, XxHash64::oneshot(0, b"system|disk_io"));

        let bytes = builder.build().unwrap().to_vec();
        let view = RowView::new(&bytes).unwrap();
        assert_eq!(view.namespace().unwrap(), b"system");
        assert_eq!(view.name().unwrap(), b"disk_io");
        assert_eq!(view.timestamp().unwrap(), -5);
        assert_eq!(view.name_hash().unwrap(), name_hash);
        assert_eq!(view.kvs_hash().unwrap(), kvs_hash);
        assert_eq!(
            view.key_values().unwrap(),
            vec![(&b"dev"[..], &b"sdb"[..]), (&b"host"[..], &b"web1"[..])]
        );

        let fields = view.simple_fields().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, b"reads");
        assert_eq!(fields[0].field_type, SimpleFieldType::DeltaSum);
        assert_eq!(fields[0].value, 12.0);
        assert_eq!(fields[1].name, b"queue");
        assert_eq!(fields[1].field_type, SimpleFieldType::Max);

        let compound = view.compound_field().unwrap().unwrap();
        assert_eq!((compound.min, compound.max, compound.sum, compound.count), (0.5, 40.0, 100.0, 9.0));
        assert_eq!(compound.explicit_bounds, vec![1.0, 10.0, f64::INFINITY]);
        assert_eq!(compound.values, vec![2.0, 5.0, 2.0]);
    }

    #[test]
    fn test_tagless_row_carries_empty_hash() {
        let mut builder = RowBuilder::new();
        builder.add_simple_field("v", SimpleFieldType::First, 0.0).unwrap();
        let bytes = builder.build().unwrap().to_vec();

        let view = RowView::new(&bytes).unwrap();
        assert_eq!(view.kvs_hash().unwrap(), EMPTY_TAGS_HASH);
        assert!(view.key_values().unwrap().is_empty());
        assert!(view.compound_field().unwrap().is_none());
    }

    #[test]
    fn test_build_to_writer() {
        let mut builder = RowBuilder::new();
        sample(&mut builder);
        let expected = builder.build().unwrap().to_vec();

        let mut out = Vec::new();
        let written = builder.build_to(&mut out).unwrap();
        assert_eq!(written, expected.len());
        assert_eq!(out, expected);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut builder = RowBuilder::with_capacity(16);
        sample(&mut builder);
        builder
            .add_compound_field_data(&[1.0, f64::INFINITY], &[1.0, 1.0])
            .unwrap();
        builder.build().unwrap();

        builder.reset();
        assert_eq!(builder.tags_len(), 0);
        assert_eq!(builder.simple_fields_len(), 0);
        assert!(!builder.has_compound_field());
        assert_eq!(builder.timestamp(), 0);
        assert_eq!(builder.namespace(), b"");
        assert_eq!(builder.metric_name(), b"");
    }

    #[test]
    fn test_buffers_reused_after_warm_up() {
        let mut builder = RowBuilder::with_capacity(0);
        sample(&mut builder);
        builder.build().unwrap();
        let capacity = builder.writer.capacity();

        for _ in 0..10 {
            builder.reset();
            sample(&mut builder);
            builder.build().unwrap();
        }
        assert_eq!(builder.writer.capacity(), capacity);
    }
}
