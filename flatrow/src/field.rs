//! Field validation and accumulation.
//!
//! A row carries any number of simple fields (one scalar aggregate each) and at
//! most one compound field (a histogram: min/max/sum/count plus explicit bucket
//! bounds and per-bucket counts). Every value is validated when it is added, so
//! an error points at the exact call that supplied it and a rejected call
//! leaves the accumulated state untouched.
//!
//! Floating-point checks use the IEEE-754 predicates (`is_nan`, `is_finite`,
//! exact comparison against `f64::INFINITY`), never tolerances.

use crate::error::{Result, RowError};
use crate::schema::SimpleFieldType;

/// Minimum number of histogram buckets: one finite bucket plus the `+Inf` one.
pub const MIN_BUCKETS: usize = 2;

#[derive(Debug, Clone, Copy)]
struct SimpleFieldEntry {
    name_start: usize,
    name_end: usize,
    field_type: SimpleFieldType,
    value: f64,
}

/// A validated simple field, borrowed from a [`FieldSet`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimpleField<'a> {
    /// Field name.
    pub name: &'a [u8],
    /// Aggregation type.
    pub field_type: SimpleFieldType,
    /// Finite value.
    pub value: f64,
}

/// A validated compound (histogram) field, borrowed from a [`FieldSet`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompoundField<'a> {
    /// Smallest observed value.
    pub min: f64,
    /// Largest observed value.
    pub max: f64,
    /// Sum of observed values.
    pub sum: f64,
    /// Number of observations.
    pub count: f64,
    /// Inclusive upper edge of each bucket; the last one is `+Inf`.
    pub bounds: &'a [f64],
    /// Count of each bucket, aligned with `bounds`.
    pub values: &'a [f64],
}

/// Simple and compound fields accumulated for one row.
#[derive(Debug, Default)]
pub struct FieldSet {
    /// Concatenated simple field names.
    names: Vec<u8>,
    simple: Vec<SimpleFieldEntry>,
    bounds: Vec<f64>,
    values: Vec<f64>,
    min: f64,
    max: f64,
    sum: f64,
    count: f64,
}

impl FieldSet {
    /// Creates an empty field set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a simple field.
    ///
    /// Fields keep insertion order; downstream consumers address them by name.
    ///
    /// # Errors
    ///
    /// - [`RowError::InvalidFieldName`] if `name` is empty
    /// - [`RowError::InvalidFieldType`] if `field_type` is [`SimpleFieldType::Unspecified`]
    /// - [`RowError::InvalidFieldValue`] if `value` is NaN or infinite
    pub fn add_simple_field(
        &mut self,
        name: impl AsRef<[u8]>,
        field_type: SimpleFieldType,
        value: f64,
    ) -> Result<()> {
        let name = name.as_ref();
        if name.is_empty() {
            return Err(RowError::InvalidFieldName.into());
        }
        if field_type == SimpleFieldType::Unspecified {
            return Err(RowError::InvalidFieldType {
                field_type: field_type.as_u8(),
            }
            .into());
        }
        check_finite(value)?;

        let name_start = self.names.len();
        self.names.extend_from_slice(name);
        self.simple.push(SimpleFieldEntry {
            name_start,
            name_end: self.names.len(),
            field_type,
            value,
        });
        Ok(())
    }

    /// Sets the bucket data of the compound field, replacing any previous data.
    ///
    /// `bounds[i]` is the inclusive upper edge of bucket `i` and `values[i]` its
    /// count. The last bound must be `+Inf`.
    ///
    /// # Errors
    ///
    /// - [`RowError::InvalidBounds`] if the lengths differ, fewer than
    ///   [`MIN_BUCKETS`] buckets are given, the first bound is negative, the
    ///   bounds are not strictly increasing, or the last bound is not `+Inf`
    /// - [`RowError::InvalidFieldValue`] if a value is NaN, infinite or
    ///   negative, or a bound is NaN or `-Inf`
    pub fn add_compound_field_data(&mut self, bounds: &[f64], values: &[f64]) -> Result<()> {
        if bounds.len() != values.len() {
            return Err(RowError::InvalidBounds {
                reason: "bounds and values have different lengths",
            }
            .into());
        }
        if bounds.len() < MIN_BUCKETS {
            return Err(RowError::InvalidBounds {
                reason: "at least two buckets are required",
            }
            .into());
        }

        for &value in values {
            check_non_negative(value)?;
        }
        for &bound in bounds {
            if bound.is_nan() {
                return Err(RowError::InvalidFieldValue {
                    value: bound,
                    reason: "bucket bound is NaN",
                }
                .into());
            }
            if bound == f64::NEG_INFINITY {
                return Err(RowError::InvalidFieldValue {
                    value: bound,
                    reason: "bucket bound is negative infinity",
                }
                .into());
            }
        }

        if bounds[0] < 0.0 {
            return Err(RowError::InvalidBounds {
                reason: "first bound is negative",
            }
            .into());
        }
        if bounds.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(RowError::InvalidBounds {
                reason: "bounds are not strictly increasing",
            }
            .into());
        }
        if bounds[bounds.len() - 1] != f64::INFINITY {
            return Err(RowError::InvalidBounds {
                reason: "last bound is not +Inf",
            }
            .into());
        }

        self.bounds.clear();
        self.bounds.extend_from_slice(bounds);
        self.values.clear();
        self.values.extend_from_slice(values);
        Ok(())
    }

    /// Sets the min/max/sum/count summary of the compound field.
    ///
    /// The summary is independent of the bucket data and does not by itself
    /// make the compound field present.
    ///
    /// # Errors
    ///
    /// Returns [`RowError::InvalidFieldValue`] if any argument is negative, NaN
    /// or infinite.
    pub fn add_compound_field_mmsc(&mut self, min: f64, max: f64, sum: f64, count: f64) -> Result<()> {
        for value in [min, max, sum, count] {
            check_non_negative(value)?;
        }
        self.min = min;
        self.max = max;
        self.sum = sum;
        self.count = count;
        Ok(())
    }

    /// Returns the number of accumulated simple fields.
    pub fn simple_fields_len(&self) -> usize {
        self.simple.len()
    }

    /// Iterates the simple fields in insertion order.
    pub fn simple_fields(
        &self,
    ) -> impl DoubleEndedIterator<Item = SimpleField<'_>> + ExactSizeIterator + '_ {
        self.simple.iter().map(|entry| SimpleField {
            name: &self.names[entry.name_start..entry.name_end],
            field_type: entry.field_type,
            value: entry.value,
        })
    }

    /// Returns the compound field, or `None` if no bucket data has been set.
    pub fn compound_field(&self) -> Option<CompoundField<'_>> {
        if self.bounds.is_empty() {
            return None;
        }
        Some(CompoundField {
            min: self.min,
            max: self.max,
            sum: self.sum,
            count: self.count,
            bounds: &self.bounds,
            values: &self.values,
        })
    }

    /// Returns `true` if there is no simple field and no compound field.
    pub fn is_empty(&self) -> bool {
        self.simple.is_empty() && self.bounds.is_empty()
    }

    /// Removes every field, retaining allocated capacity.
    pub fn clear(&mut self) {
        self.names.clear();
        self.simple.clear();
        self.bounds.clear();
        self.values.clear();
        self.min = 0.0;
        self.max = 0.0;
        self.sum = 0.0;
        self.count = 0.0;
    }
}

fn check_finite(value: f64) -> Result<()> {
    if value.is_nan() {
        return Err(RowError::InvalidFieldValue {
            value,
            reason: "value is NaN",
        }
        .into());
    }
    if value.is_infinite() {
        return Err(RowError::InvalidFieldValue {
            value,
            reason: "value is infinite",
        }
        .into());
    }
    Ok(())
}

fn check_non_negative(value: f64) -> Result<()> {
    check_finite(value)?;
    if value < 0.0 {
        return Err(RowError::InvalidFieldValue {
            value,
            reason: "value is negative",
        }
        .into());
    }
    Ok(())
}
