//! Read-only access to encoded rows.
//!
//! [`RowView`] walks an encoded `Metric` table in place. Every offset is
//! bounds-checked, so malformed input yields a [`DecodeError`] rather than a
//! panic. Absent fields read as their schema defaults (empty string, zero,
//! empty vector).

use crate::error::{DecodeError, Result};
use crate::field::SimpleField;
use crate::schema::{SimpleFieldType, compound_field, key_value, metric, simple_field};
use crate::writer::Scalar;

/// Bounds-checked slice of `len` bytes at `offset`.
fn slice(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
        .ok_or_else(|| {
            DecodeError::OutOfBounds {
                offset,
                length: len,
                buffer_len: buf.len(),
            }
            .into()
        })
}

fn read<T: Scalar>(buf: &[u8], offset: usize) -> Result<T> {
    Ok(T::read_le(slice(buf, offset, T::SIZE)?))
}

/// Follows the forward reference stored at `offset`.
fn follow(buf: &[u8], offset: usize) -> Result<usize> {
    let distance = read::<u32>(buf, offset)? as usize;
    offset.checked_add(distance).ok_or_else(|| {
        DecodeError::OutOfBounds {
            offset,
            length: distance,
            buffer_len: buf.len(),
        }
        .into()
    })
}

/// One table and its vtable.
#[derive(Debug, Clone, Copy)]
struct Table<'a> {
    buf: &'a [u8],
    position: usize,
    vtable: usize,
    vtable_len: usize,
}

impl<'a> Table<'a> {
    fn at(buf: &'a [u8], position: usize) -> Result<Self> {
        let soffset = i64::from(read::<i32>(buf, position)?);
        let vtable = usize::try_from(i64::try_from(position).unwrap_or(i64::MAX) - soffset)
            .map_err(|_| DecodeError::InvalidVTable { offset: position })?;
        let vtable_len = usize::from(read::<u16>(buf, vtable)?);
        if vtable_len < 4 || vtable_len % 2 != 0 {
            return Err(DecodeError::InvalidVTable { offset: vtable }.into());
        }
        slice(buf, vtable, vtable_len)?;

        Ok(Self {
            buf,
            position,
            vtable,
            vtable_len,
        })
    }

    /// Absolute position of a field, or `None` if the slot is absent.
    fn field(&self, slot: u16) -> Result<Option<usize>> {
        let entry = 4 + 2 * usize::from(slot);
        if entry >= self.vtable_len {
            return Ok(None);
        }
        match read::<u16>(self.buf, self.vtable + entry)? {
            0 => Ok(None),
            offset => Ok(Some(self.position + usize::from(offset))),
        }
    }

    fn scalar<T: Scalar>(&self, slot: u16, default: T) -> Result<T> {
        match self.field(slot)? {
            Some(at) => read(self.buf, at),
            None => Ok(default),
        }
    }

    fn bytes(&self, slot: u16) -> Result<&'a [u8]> {
        let Some(at) = self.field(slot)? else {
            return Ok(&[]);
        };
        let start = follow(self.buf, at)?;
        let len = read::<u32>(self.buf, start)? as usize;
        slice(self.buf, start + 4, len)
    }

    /// Start and length of a vector field.
    fn vector(&self, slot: u16) -> Result<Option<(usize, usize)>> {
        let Some(at) = self.field(slot)? else {
            return Ok(None);
        };
        let start = follow(self.buf, at)?;
        let len = read::<u32>(self.buf, start)? as usize;
        Ok(Some((start + 4, len)))
    }

    fn scalars<T: Scalar>(&self, slot: u16) -> Result<Vec<T>> {
        let Some((start, len)) = self.vector(slot)? else {
            return Ok(Vec::new());
        };
        let bytes = slice(self.buf, start, len.saturating_mul(T::SIZE))?;
        Ok(bytes.chunks_exact(T::SIZE).map(T::read_le).collect())
    }

    fn tables(&self, slot: u16) -> Result<Vec<Table<'a>>> {
        let Some((start, len)) = self.vector(slot)? else {
            return Ok(Vec::new());
        };
        slice(self.buf, start, len.saturating_mul(4))?;
        (0..len)
            .map(|i| -> Result<Table<'a>> { Table::at(self.buf, follow(self.buf, start + 4 * i)?) })
            .collect()
    }

    fn table(&self, slot: u16) -> Result<Option<Table<'a>>> {
        match self.field(slot)? {
            Some(at) => Ok(Some(Table::at(self.buf, follow(self.buf, at)?)?)),
            None => Ok(None),
        }
    }
}

/// Decoded compound field. Bucket arrays are copied out of the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundFieldView {
    /// Smallest observed value.
    pub min: f64,
    /// Largest observed value.
    pub max: f64,
    /// Sum of observed values.
    pub sum: f64,
    /// Number of observations.
    pub count: f64,
    /// Bucket upper bounds.
    pub explicit_bounds: Vec<f64>,
    /// Bucket counts.
    pub values: Vec<f64>,
}

/// Zero-copy view over an encoded metric row.
///
/// # Example
///
/// ```rust
/// use flatrow::{RowBuilder, RowView, SimpleFieldType};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut builder = RowBuilder::new();
/// builder.add_metric_name("cpu");
/// builder.add_simple_field("idle", SimpleFieldType::Last, 0.5)?;
/// let bytes = builder.build()?.to_vec();
///
/// let view = RowView::new(&bytes)?;
/// assert_eq!(view.name()?, b"cpu");
/// assert_eq!(view.simple_fields()?[0].value, 0.5);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    root: Table<'a>,
}

impl<'a> RowView<'a> {
    /// Opens a view over an encoded row.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the root reference or root vtable is invalid.
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        let position = follow(buf, 0)?;
        Ok(Self {
            root: Table::at(buf, position)?,
        })
    }

    /// Returns the sanitized namespace.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the field points outside the buffer.
    pub fn namespace(&self) -> Result<&'a [u8]> {
        self.root.bytes(metric::NAMESPACE)
    }

    /// Returns the sanitized metric name.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the field points outside the buffer.
    pub fn name(&self) -> Result<&'a [u8]> {
        self.root.bytes(metric::NAME)
    }

    /// Returns the timestamp in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the field points outside the buffer.
    pub fn timestamp(&self) -> Result<i64> {
        self.root.scalar(metric::TIMESTAMP, 0)
    }

    /// Returns the hash of `namespace|name`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the field points outside the buffer.
    pub fn name_hash(&self) -> Result<u64> {
        self.root.scalar(metric::NAME_HASH, 0)
    }

    /// Returns the canonical tag hash.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the field points outside the buffer.
    pub fn kvs_hash(&self) -> Result<u64> {
        self.root.scalar(metric::KVS_HASH, 0)
    }

    /// Returns the encoded tags, in canonical order.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if any tag table is malformed.
    pub fn key_values(&self) -> Result<Vec<(&'a [u8], &'a [u8])>> {
        self.root
            .tables(metric::KEY_VALUES)?
            .iter()
            .map(|kv| -> Result<(&'a [u8], &'a [u8])> {
                Ok((kv.bytes(key_value::KEY)?, kv.bytes(key_value::VALUE)?))
            })
            .collect()
    }

    /// Returns the simple fields, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if any field table is malformed or carries an
    /// unknown type.
    pub fn simple_fields(&self) -> Result<Vec<SimpleField<'a>>> {
        self.root
            .tables(metric::SIMPLE_FIELDS)?
            .iter()
            .map(|field| -> Result<SimpleField<'a>> {
                let raw = field.scalar(simple_field::TYPE, 0u8)?;
                let field_type =
                    SimpleFieldType::from_u8(raw).ok_or(DecodeError::UnknownFieldType { raw })?;
                Ok(SimpleField {
                    name: field.bytes(simple_field::NAME)?,
                    field_type,
                    value: field.scalar(simple_field::VALUE, 0.0)?,
                })
            })
            .collect()
    }

    /// Returns the compound field, if the row has one.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the compound table is malformed.
    pub fn compound_field(&self) -> Result<Option<CompoundFieldView>> {
        let Some(table) = self.root.table(metric::COMPOUND_FIELD)? else {
            return Ok(None);
        };
        Ok(Some(CompoundFieldView {
            min: table.scalar(compound_field::MIN, 0.0)?,
            max: table.scalar(compound_field::MAX, 0.0)?,
            sum: table.scalar(compound_field::SUM, 0.0)?,
            count: table.scalar(compound_field::COUNT, 0.0)?,
            explicit_bounds: table.scalars(compound_field::EXPLICIT_BOUNDS)?,
            values: table.scalars(compound_field::VALUES)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlatrowError;
    use crate::writer::{BinaryWriter, FlatWriter};

    #[test]
    fn test_truncated_buffer() {
        for bytes in [&b""[..], &[4, 0, 0][..], &[200, 0, 0, 0, 0, 0][..]] {
            let err = RowView::new(bytes).unwrap_err();
            assert!(matches!(err, FlatrowError::Decode(DecodeError::OutOfBounds { .. })));
        }
    }

    #[test]
    fn test_bad_vtable_length() {
        // Root -> table at 8, table -> vtable at 4 with a length of 3.
        let bytes = [8, 0, 0, 0, 3, 0, 4, 0, 4, 0, 0, 0];
        let err = RowView::new(&bytes).unwrap_err();
        assert!(matches!(err, FlatrowError::Decode(DecodeError::InvalidVTable { .. })));
    }

    #[test]
    fn test_absent_fields_read_as_defaults() {
        let mut writer = FlatWriter::new();
        writer.start_table();
        writer.add_scalar(metric::TIMESTAMP, 99i64);
        let root = writer.end_table();
        let bytes = writer.finish(root).to_vec();

        let view = RowView::new(&bytes).unwrap();
        assert_eq!(view.timestamp().unwrap(), 99);
        assert_eq!(view.namespace().unwrap(), b"");
        assert_eq!(view.kvs_hash().unwrap(), 0);
        assert!(view.key_values().unwrap().is_empty());
        assert!(view.simple_fields().unwrap().is_empty());
        assert!(view.compound_field().unwrap().is_none());
    }

    #[test]
    fn test_unknown_field_type() {
        let mut writer = FlatWriter::new();
        let name = writer.create_string(b"f");
        writer.start_table();
        writer.add_offset(simple_field::NAME, name);
        writer.add_scalar(simple_field::TYPE, 42u8);
        let field = writer.end_table();
        let fields = writer.create_offset_vector(&[field]);
        writer.start_table();
        writer.add_offset(metric::SIMPLE_FIELDS, fields);
        let root = writer.end_table();
        let bytes = writer.finish(root).to_vec();

        let err = RowView::new(&bytes).unwrap().simple_fields().unwrap_err();
        assert!(matches!(
            err,
            FlatrowError::Decode(DecodeError::UnknownFieldType { raw: 42 })
        ));
    }
}
