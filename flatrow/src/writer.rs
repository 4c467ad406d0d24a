//! Bottom-up binary writer.
//!
//! Encoded rows use a FlatBuffers-compatible layout, which is built back to
//! front: children (strings, vectors, nested tables) are written before the
//! table that refers to them, and every reference is an unsigned 32-bit
//! distance forward to its target. [`BinaryWriter`] captures the operations an
//! encoder needs; [`FlatWriter`] implements them over one growable buffer that
//! is reused across builds.
//!
//! # Layout
//!
//! ```text
//! root:    [u32 offset to root table] ...
//! table:   [i32 table - vtable] [inline fields, naturally aligned]
//! vtable:  [u16 vtable size] [u16 table size] [u16 field offset; one per slot]
//! vector:  [u32 length] [elements]
//! string:  [u32 length] [bytes] [0]
//! ```
//!
//! All scalars are little-endian. Padding bytes are always zero, and vtables
//! are never shared between tables, so the output is a pure function of the
//! sequence of writer calls since the last [`BinaryWriter::reset`].

/// Default initial capacity of a [`FlatWriter`], in bytes.
pub const DEFAULT_WRITER_CAPACITY: usize = 1024;

/// Smallest buffer a growing writer allocates.
const MIN_GROWTH: usize = 64;

const SIZE_UOFFSET: usize = 4;
const SIZE_SOFFSET: usize = 4;
const SIZE_VOFFSET: usize = 2;

/// Reference to an object already written, measured from the end of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offset(usize);

impl Offset {
    /// Returns the distance of the object from the end of the buffer.
    pub fn value(self) -> usize {
        self.0
    }
}

/// Fixed-size little-endian scalar.
pub trait Scalar: Copy {
    /// Encoded size and natural alignment, in bytes.
    const SIZE: usize;

    /// Writes `self` into `out`, which is exactly [`SIZE`](Self::SIZE) bytes.
    fn write_le(self, out: &mut [u8]);

    /// Reads a value from `bytes`, which is exactly [`SIZE`](Self::SIZE) bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn write_le(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_scalar!(u8, u16, u32, i32, i64, u64, f64);

/// Operations for building a binary table format back to front.
///
/// Between [`start_table`](Self::start_table) and
/// [`end_table`](Self::end_table) only field additions are allowed; strings,
/// vectors and child tables must be finished beforehand.
pub trait BinaryWriter {
    /// Discards everything written so far, keeping allocated capacity.
    fn reset(&mut self);

    /// Writes a length-prefixed, NUL-terminated byte string.
    fn create_string(&mut self, bytes: &[u8]) -> Offset;

    /// Begins a vector of `len` elements of `elem_size` bytes each.
    ///
    /// Elements are then pushed in reverse order, last element first.
    fn start_vector(&mut self, elem_size: usize, len: usize);

    /// Pushes one scalar element of the current vector.
    fn push_scalar<T: Scalar>(&mut self, value: T);

    /// Pushes one reference element of the current vector.
    fn push_offset(&mut self, target: Offset);

    /// Ends the current vector of `len` elements.
    fn end_vector(&mut self, len: usize) -> Offset;

    /// Begins a table.
    fn start_table(&mut self);

    /// Adds an inline scalar field to the current table.
    fn add_scalar<T: Scalar>(&mut self, slot: u16, value: T);

    /// Adds a reference field to the current table.
    fn add_offset(&mut self, slot: u16, target: Offset);

    /// Ends the current table and writes its vtable.
    fn end_table(&mut self) -> Offset;

    /// Writes the root reference and returns the finished buffer.
    fn finish(&mut self, root: Offset) -> &[u8];

    /// Writes a vector of scalars, in slice order.
    fn create_scalar_vector<T: Scalar>(&mut self, items: &[T]) -> Offset {
        self.start_vector(T::SIZE, items.len());
        for &item in items.iter().rev() {
            self.push_scalar(item);
        }
        self.end_vector(items.len())
    }

    /// Writes a vector of references, in slice order.
    fn create_offset_vector(&mut self, items: &[Offset]) -> Offset {
        self.start_vector(SIZE_UOFFSET, items.len());
        for &item in items.iter().rev() {
            self.push_offset(item);
        }
        self.end_vector(items.len())
    }
}

/// [`BinaryWriter`] over a single reusable buffer.
///
/// Data occupies `buf[head..]` and grows towards the front. When the front is
/// reached, the buffer is enlarged and the written bytes are moved to its end.
#[derive(Debug)]
pub struct FlatWriter {
    buf: Vec<u8>,
    head: usize,
    min_align: usize,
    /// `(slot, position)` of each field of the open table.
    fields: Vec<(u16, usize)>,
    table_start: usize,
}

impl FlatWriter {
    /// Creates a writer with [`DEFAULT_WRITER_CAPACITY`] bytes reserved.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_WRITER_CAPACITY)
    }

    /// Creates a writer with `capacity` bytes reserved.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            head: capacity,
            min_align: 1,
            fields: Vec::new(),
            table_start: 0,
        }
    }

    /// Returns the number of bytes written since the last reset.
    pub fn len(&self) -> usize {
        self.buf.len() - self.head
    }

    /// Returns `true` if nothing has been written since the last reset.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the bytes written since the last reset.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.head..]
    }

    /// Returns the size of the backing buffer.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Makes room for at least `needed` more bytes in front of `head`.
    fn ensure_front(&mut self, needed: usize) {
        if self.head >= needed {
            return;
        }
        let used = self.len();
        let old_len = self.buf.len();
        let new_len = (old_len * 2).max(used + needed).max(MIN_GROWTH);
        self.buf.resize(new_len, 0);
        let new_head = new_len - used;
        self.buf.copy_within(self.head..old_len, new_head);
        self.head = new_head;
    }

    /// Pads so that after `additional` more bytes the next `size`-byte value
    /// is naturally aligned, and reserves room for both.
    fn prep(&mut self, size: usize, additional: usize) {
        self.min_align = self.min_align.max(size);
        let padding = (!(self.len() + additional)).wrapping_add(1) & (size - 1);
        self.ensure_front(padding + size + additional);
        self.head -= padding;
        self.buf[self.head..self.head + padding].fill(0);
    }

    /// Copies `bytes` in front of `head`. Room must already be reserved.
    fn place(&mut self, bytes: &[u8]) {
        self.head -= bytes.len();
        self.buf[self.head..self.head + bytes.len()].copy_from_slice(bytes);
    }

    fn push<T: Scalar>(&mut self, value: T) {
        self.prep(T::SIZE, 0);
        self.head -= T::SIZE;
        value.write_le(&mut self.buf[self.head..self.head + T::SIZE]);
    }

    fn push_uoffset(&mut self, target: Offset) {
        self.prep(SIZE_UOFFSET, 0);
        let distance = self.len() + SIZE_UOFFSET - target.0;
        self.push(to_u32(distance));
    }
}

impl Default for FlatWriter {
    /// An unallocated writer; the buffer is created on first use.
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl BinaryWriter for FlatWriter {
    fn reset(&mut self) {
        self.head = self.buf.len();
        self.min_align = 1;
        self.fields.clear();
        self.table_start = 0;
    }

    fn create_string(&mut self, bytes: &[u8]) -> Offset {
        self.prep(SIZE_UOFFSET, bytes.len() + 1);
        self.place(&[0]);
        self.place(bytes);
        self.push(to_u32(bytes.len()));
        Offset(self.len())
    }

    fn start_vector(&mut self, elem_size: usize, len: usize) {
        self.prep(SIZE_UOFFSET, elem_size * len);
        self.prep(elem_size, elem_size * len);
    }

    fn push_scalar<T: Scalar>(&mut self, value: T) {
        self.push(value);
    }

    fn push_offset(&mut self, target: Offset) {
        self.push_uoffset(target);
    }

    fn end_vector(&mut self, len: usize) -> Offset {
        self.push(to_u32(len));
        Offset(self.len())
    }

    fn start_table(&mut self) {
        self.fields.clear();
        self.table_start = self.len();
    }

    fn add_scalar<T: Scalar>(&mut self, slot: u16, value: T) {
        self.push(value);
        self.fields.push((slot, self.len()));
    }

    fn add_offset(&mut self, slot: u16, target: Offset) {
        self.push_uoffset(target);
        self.fields.push((slot, self.len()));
    }

    fn end_table(&mut self) -> Offset {
        // Placeholder for the vtable reference, patched below.
        self.push(0i32);
        let object = self.len();

        let slots = self
            .fields
            .iter()
            .map(|&(slot, _)| usize::from(slot) + 1)
            .max()
            .unwrap_or(0);
        for slot in (0..slots).rev() {
            let field_offset = self
                .fields
                .iter()
                .rev()
                .find(|&&(s, _)| usize::from(s) == slot)
                .map_or(0, |&(_, position)| object - position);
            self.push(to_u16(field_offset));
        }
        self.push(to_u16(object - self.table_start));
        self.push(to_u16((slots + 2) * SIZE_VOFFSET));
        let vtable = self.len();

        let at = self.buf.len() - object;
        let distance = to_i32(vtable - object);
        distance.write_le(&mut self.buf[at..at + SIZE_SOFFSET]);

        self.fields.clear();
        Offset(object)
    }

    fn finish(&mut self, root: Offset) -> &[u8] {
        self.prep(self.min_align, SIZE_UOFFSET);
        self.push_uoffset(root);
        self.data()
    }
}

#[allow(clippy::cast_possible_truncation)] // Rows are far below 4 GiB
fn to_u32(value: usize) -> u32 {
    value as u32
}

#[allow(clippy::cast_possible_truncation)] // Tables have a handful of slots
fn to_u16(value: usize) -> u16 {
    value as u16
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)] // Vtables sit right before their table
fn to_i32(value: usize) -> i32 {
    value as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_layout() {
        let mut writer = FlatWriter::with_capacity(16);
        let offset = writer.create_string(b"abc");
        assert_eq!(offset.value(), 8);
        assert_eq!(writer.data(), &[3, 0, 0, 0, b'a', b'b', b'c', 0]);
    }

    #[test]
    fn test_string_padding_is_zeroed() {
        let mut writer = FlatWriter::with_capacity(64);
        writer.buf.fill(0xAA);
        writer.create_string(b"ab");
        // 4 length + 2 bytes + NUL + 1 padding byte.
        assert_eq!(writer.data(), &[2, 0, 0, 0, b'a', b'b', 0, 0]);
    }

    #[test]
    fn test_scalar_vector_alignment() {
        let mut writer = FlatWriter::with_capacity(8);
        writer.create_string(b"x");
        let vector = writer.create_scalar_vector(&[1.5f64, 2.5]);

        let data = writer.data();
        let start = data.len() - vector.value();
        assert_eq!(u32::read_le(&data[start..start + 4]), 2);
        // Elements are 8-byte aligned relative to the buffer end.
        assert_eq!((data.len() - (start + 4)) % 8, 0);
        assert_eq!(f64::read_le(&data[start + 4..start + 12]), 1.5);
        assert_eq!(f64::read_le(&data[start + 12..start + 20]), 2.5);
    }

    #[test]
    fn test_table_with_vtable() {
        let mut writer = FlatWriter::new();
        let name = writer.create_string(b"idle");
        writer.start_table();
        writer.add_scalar(2, 7.0f64);
        writer.add_offset(0, name);
        writer.add_scalar(1, 4u8);
        let table = writer.end_table();
        let data = writer.finish(table).to_vec();

        let root = u32::read_le(&data[0..4]) as usize;
        let soffset = i32::read_le(&data[root..root + 4]);
        let vtable = root - usize::try_from(soffset).unwrap();
        let vtable_len = u16::read_le(&data[vtable..vtable + 2]);
        assert_eq!(vtable_len, 10);

        let field = |slot: usize| -> usize {
            let at = vtable + 4 + slot * 2;
            root + usize::from(u16::read_le(&data[at..at + 2]))
        };
        assert_eq!(data[field(1)], 4);
        assert_eq!(f64::read_le(&data[field(2)..field(2) + 8]), 7.0);

        let name_at = field(0) + u32::read_le(&data[field(0)..field(0) + 4]) as usize;
        assert_eq!(u32::read_le(&data[name_at..name_at + 4]), 4);
        assert_eq!(&data[name_at + 4..name_at + 8], b"idle");
    }

    #[test]
    fn test_growth_preserves_data() {
        let mut writer = FlatWriter::with_capacity(0);
        let long = vec![b'z'; 300];
        writer.create_string(&long);
        writer.create_string(b"tail");
        assert!(writer.capacity() >= writer.len());

        let data = writer.data();
        assert_eq!(&data[0..4], &[4, 0, 0, 0]);
        assert_eq!(&data[4..8], b"tail");
        assert!(data.ends_with(&[b'z', 0, 0, 0, 0]));
    }

    #[test]
    fn test_reset_gives_identical_output() {
        let mut writer = FlatWriter::with_capacity(4);
        let write = |writer: &mut FlatWriter| {
            writer.reset();
            let values = writer.create_scalar_vector(&[1.0f64, 2.0, 3.0]);
            writer.start_table();
            writer.add_scalar(0, 42i64);
            writer.add_offset(1, values);
            let table = writer.end_table();
            writer.finish(table).to_vec()
        };

        let first = write(&mut writer);
        let second = write(&mut writer);
        assert_eq!(first, second);
        assert_eq!(first, write(&mut FlatWriter::with_capacity(4096)));
    }
}
