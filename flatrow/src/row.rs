//! Owned row descriptions.
//!
//! [`RowSpec`] is a serde-friendly description of one metric row. It is how
//! rows enter the builder from files (the `flatrow` CLI reads them as JSON)
//! and how tests describe rows compactly. [`RowSpec::apply`] replays the
//! description onto a [`RowBuilder`] through the regular `add_*` calls, so it
//! goes through exactly the same validation.
//!
//! JSON has no literal for infinity. In `compound.bounds`, the string
//! `"+Inf"` or `null` stands for `+Inf`.
//!
//! ```json
//! {
//!   "namespace": "system",
//!   "name": "latency",
//!   "timestamp": 1700000000000,
//!   "tags": [["host", "web1"]],
//!   "simple_fields": [{ "name": "p50", "type": "last", "value": 4.2 }],
//!   "compound": {
//!     "min": 0.5, "max": 90.0, "sum": 310.0, "count": 40.0,
//!     "bounds": [1.0, 10.0, 100.0, "+Inf"],
//!     "values": [4.0, 30.0, 6.0, 0.0]
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::builder::RowBuilder;
use crate::error::Result;
use crate::schema::SimpleFieldType;

/// Description of one metric row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowSpec {
    /// Namespace; sanitized when applied.
    pub namespace: String,
    /// Metric name; sanitized when applied.
    pub name: String,
    /// Timestamp in milliseconds.
    pub timestamp: i64,
    /// Tags as `(key, value)` pairs, applied in order.
    pub tags: Vec<(String, String)>,
    /// Simple fields, applied in order.
    pub simple_fields: Vec<SimpleFieldSpec>,
    /// Optional histogram.
    pub compound: Option<CompoundFieldSpec>,
}

/// Description of one simple field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleFieldSpec {
    /// Field name.
    pub name: String,
    /// Aggregation type.
    #[serde(rename = "type")]
    pub field_type: SimpleFieldType,
    /// Field value.
    pub value: f64,
}

/// Description of a compound (histogram) field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompoundFieldSpec {
    /// Smallest observed value.
    pub min: f64,
    /// Largest observed value.
    pub max: f64,
    /// Sum of observed values.
    pub sum: f64,
    /// Number of observations.
    pub count: f64,
    /// Bucket upper bounds; the last one is `+Inf`.
    #[serde(with = "bounds_serde")]
    pub bounds: Vec<f64>,
    /// Bucket counts.
    pub values: Vec<f64>,
}

impl RowSpec {
    /// Replays this description onto `builder`.
    ///
    /// The builder is not reset first; callers normally pass an empty one.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by the builder's `add_*` calls. Calls
    /// made before the failing one stay applied.
    pub fn apply(&self, builder: &mut RowBuilder) -> Result<()> {
        builder.add_namespace(&self.namespace);
        builder.add_metric_name(&self.name);
        builder.add_timestamp(self.timestamp);
        for (key, value) in &self.tags {
            builder.add_tag(key, value)?;
        }
        for field in &self.simple_fields {
            builder.add_simple_field(&field.name, field.field_type, field.value)?;
        }
        if let Some(compound) = &self.compound {
            builder.add_compound_field_mmsc(compound.min, compound.max, compound.sum, compound.count)?;
            builder.add_compound_field_data(&compound.bounds, &compound.values)?;
        }
        Ok(())
    }
}

/// Bucket bounds with `+Inf` spelled as a string.
mod bounds_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

    const INF: &str = "+Inf";

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Bound {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S>(bounds: &[f64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(bounds.iter().map(|&bound| {
            if bound == f64::INFINITY {
                Bound::Text(INF.to_string())
            } else {
                Bound::Number(bound)
            }
        }))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<Option<Bound>>::deserialize(deserializer)?
            .into_iter()
            .map(|bound| match bound {
                None => Ok(f64::INFINITY),
                Some(Bound::Number(value)) => Ok(value),
                Some(Bound::Text(text)) if text == INF || text.eq_ignore_ascii_case("inf") => {
                    Ok(f64::INFINITY)
                }
                Some(Bound::Text(text)) => Err(de::Error::custom(format!(
                    "invalid bucket bound {text:?}: expected a number or \"{INF}\""
                ))),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FlatrowError, RowError};
    use crate::view::RowView;

    const SAMPLE: &str = r#"{
        "namespace": "system",
        "name": "latency",
        "timestamp": 1700000000000,
        "tags": [["host", "web1"], ["dc", "east"]],
        "simple_fields": [{ "name": "p50", "type": "last", "value": 4.2 }],
        "compound": {
            "min": 0.5, "max": 90.0, "sum": 310.0, "count": 40.0,
            "bounds": [1.0, 10.0, 100.0, "+Inf"],
            "values": [4.0, 30.0, 6.0, 0.0]
        }
    }"#;

    #[test]
    fn test_parse_and_apply() {
        let spec: RowSpec = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(spec.tags.len(), 2);
        assert_eq!(spec.simple_fields[0].field_type, SimpleFieldType::Last);

        let mut builder = RowBuilder::new();
        spec.apply(&mut builder).unwrap();
        let bytes = builder.build().unwrap().to_vec();

        let view = RowView::new(&bytes).unwrap();
        assert_eq!(view.name().unwrap(), b"latency");
        assert_eq!(view.timestamp().unwrap(), 1_700_000_000_000);
        assert_eq!(view.key_values().unwrap()[0], (&b"dc"[..], &b"east"[..]));
        let compound = view.compound_field().unwrap().unwrap();
        assert_eq!(compound.explicit_bounds, vec![1.0, 10.0, 100.0, f64::INFINITY]);
        assert_eq!(compound.count, 40.0);
    }

    #[test]
    fn test_null_bound_is_infinity() {
        let compound: CompoundFieldSpec =
            serde_json::from_str(r#"{ "bounds": [2.5, null], "values": [1.0, 1.0] }"#).unwrap();
        assert_eq!(compound.bounds, vec![2.5, f64::INFINITY]);
        assert_eq!(compound.min, 0.0);
    }

    #[test]
    fn test_bad_bound_text_rejected() {
        let result: std::result::Result<CompoundFieldSpec, _> =
            serde_json::from_str(r#"{ "bounds": [1.0, "lots"], "values": [1.0, 1.0] }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_spells_infinity() {
        let compound = CompoundFieldSpec {
            bounds: vec![1.0, f64::INFINITY],
            values: vec![1.0, 2.0],
            ..CompoundFieldSpec::default()
        };
        let json = serde_json::to_value(&compound).unwrap();
        assert_eq!(json["bounds"], serde_json::json!([1.0, "+Inf"]));

        let back: CompoundFieldSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, compound);
    }

    #[test]
    fn test_apply_surfaces_validation_errors() {
        let spec: RowSpec = serde_json::from_str(
            r#"{ "name": "cpu", "simple_fields": [{ "name": "", "type": "max", "value": 1.0 }] }"#,
        )
        .unwrap();
        let mut builder = RowBuilder::new();
        let err = spec.apply(&mut builder).unwrap_err();
        assert!(matches!(err, FlatrowError::Row(RowError::InvalidFieldName)));
    }
}
