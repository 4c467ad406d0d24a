//! Fixed wire schema for encoded metric rows.
//!
//! The row format is a FlatBuffers-compatible table layout. This module pins
//! the field slots of every table, the simple field type discriminants and the
//! reserved characters of the canonical tag string. The schema is a fixed
//! target; nothing here is generated.
//!
//! ```text
//! table KeyValue      { key: string; value: string; }
//! table SimpleField   { name: string; type: ubyte; value: double; }
//! table CompoundField { min: double; max: double; sum: double; count: double;
//!                       explicit_bounds: [double]; values: [double]; }
//! table Metric        { namespace: string; name: string; timestamp: long;
//!                       name_hash: ulong; key_values: [KeyValue];
//!                       kvs_hash: ulong; simple_fields: [SimpleField];
//!                       compound_field: CompoundField; }
//! root_type Metric;
//! ```

use serde::{Deserialize, Serialize};

/// Separator reserved for joining identifiers; replaced in namespaces and names.
pub const RESERVED_SEPARATOR: u8 = b'|';

/// Byte that replaces [`RESERVED_SEPARATOR`] in namespaces and names.
pub const SEPARATOR_REPLACEMENT: u8 = b'_';

/// Separator between `key=value` pairs in the canonical tag string.
pub const TAG_PAIR_SEPARATOR: u8 = b',';

/// Separator between a key and its value in the canonical tag string.
pub const TAG_KV_SEPARATOR: u8 = b'=';

/// Hash reported for a row without tags.
///
/// An empty tag set is not hashed; it maps to this constant so tagless series
/// keep a fixed identity that cannot collide with the hash of empty input.
pub const EMPTY_TAGS_HASH: u64 = 0x9ae1_6a3b_2f90_404f;

/// Slots of the `Metric` root table.
pub mod metric {
    /// `namespace: string`
    pub const NAMESPACE: u16 = 0;
    /// `name: string`
    pub const NAME: u16 = 1;
    /// `timestamp: long` (milliseconds)
    pub const TIMESTAMP: u16 = 2;
    /// `name_hash: ulong`
    pub const NAME_HASH: u16 = 3;
    /// `key_values: [KeyValue]`
    pub const KEY_VALUES: u16 = 4;
    /// `kvs_hash: ulong`
    pub const KVS_HASH: u16 = 5;
    /// `simple_fields: [SimpleField]`
    pub const SIMPLE_FIELDS: u16 = 6;
    /// `compound_field: CompoundField`
    pub const COMPOUND_FIELD: u16 = 7;
}

/// Slots of the `KeyValue` table.
pub mod key_value {
    /// `key: string`
    pub const KEY: u16 = 0;
    /// `value: string`
    pub const VALUE: u16 = 1;
}

/// Slots of the `SimpleField` table.
pub mod simple_field {
    /// `name: string`
    pub const NAME: u16 = 0;
    /// `type: ubyte`
    pub const TYPE: u16 = 1;
    /// `value: double`
    pub const VALUE: u16 = 2;
}

/// Slots of the `CompoundField` table.
pub mod compound_field {
    /// `min: double`
    pub const MIN: u16 = 0;
    /// `max: double`
    pub const MAX: u16 = 1;
    /// `sum: double`
    pub const SUM: u16 = 2;
    /// `count: double`
    pub const COUNT: u16 = 3;
    /// `explicit_bounds: [double]`
    pub const EXPLICIT_BOUNDS: u16 = 4;
    /// `values: [double]`
    pub const VALUES: u16 = 5;
}

/// Aggregation type of a simple field.
///
/// The discriminants are the on-wire byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SimpleFieldType {
    /// Placeholder for a missing type. Never accepted by the builder.
    Unspecified = 0,
    /// Sum of deltas over the reporting interval.
    DeltaSum = 1,
    /// Minimum observed value.
    Min = 2,
    /// Maximum observed value.
    Max = 3,
    /// Most recent value.
    Last = 4,
    /// Earliest value.
    First = 5,
}

impl SimpleFieldType {
    /// Returns the on-wire discriminant.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Maps an on-wire discriminant back to a type, if known.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Unspecified),
            1 => Some(Self::DeltaSum),
            2 => Some(Self::Min),
            3 => Some(Self::Max),
            4 => Some(Self::Last),
            5 => Some(Self::First),
            _ => None,
        }
    }
}
