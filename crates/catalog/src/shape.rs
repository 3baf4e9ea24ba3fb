//! Shape validation and repair for array-valued rows
//!
//! A descriptor's declared shape is authoritative. Hardware occasionally
//! writes rows that are a pixel or two off along an axis (an overscan
//! column, a clipped edge). Rows within a small per-axis tolerance are
//! repaired — short axes padded by repeating the edge value, long axes
//! trimmed — so a read never fails over a known hardware quirk. Anything
//! past the tolerance is real metadata corruption and raises
//! [`Error::BadShapeMetadata`].
//!
//! Repair is idempotent: a row already at the declared shape passes
//! through untouched, and repairing twice equals repairing once.

use serde_json::Value;

use beamcat_core::{Error, Result};

/// Maximum per-axis difference between declared and actual shape that is
/// repaired rather than rejected
pub const SHAPE_TOLERANCE: u64 = 2;

/// Measure the shape of a nested JSON array
///
/// Descends along first elements; scalars have an empty shape. Ragged
/// input is measured by its leading edge and caught later by the
/// per-element repair walk.
pub fn measure(value: &Value) -> Vec<u64> {
    let mut shape = Vec::new();
    let mut cursor = value;
    while let Value::Array(items) = cursor {
        shape.push(items.len() as u64);
        match items.first() {
            Some(first) => cursor = first,
            None => break,
        }
    }
    shape
}

/// Validate `value` against the declared shape, repairing within
/// tolerance
///
/// - Equal shapes pass through unchanged.
/// - Axes within [`SHAPE_TOLERANCE`] are padded (repeating the edge
///   value) or trimmed to the declared extent.
/// - A rank mismatch, an axis past tolerance, or an empty axis that
///   would need padding raises [`Error::BadShapeMetadata`].
pub fn conform(field: &str, value: Value, declared: &[u64]) -> Result<Value> {
    let actual = measure(&value);
    if actual == declared {
        return Ok(value);
    }

    let bad_shape = || Error::BadShapeMetadata {
        field: field.to_string(),
        declared: declared.to_vec(),
        actual: actual.clone(),
    };

    if actual.len() != declared.len() {
        return Err(bad_shape());
    }
    for (a, d) in actual.iter().zip(declared) {
        if a.abs_diff(*d) > SHAPE_TOLERANCE {
            return Err(bad_shape());
        }
    }

    resize(value, declared).ok_or_else(bad_shape)
}

/// Recursively pad/trim each axis to the declared extent
///
/// Returns None when padding is impossible (an empty axis has no edge
/// value to repeat) or the value is not nested as declared.
fn resize(value: Value, declared: &[u64]) -> Option<Value> {
    let (&extent, rest) = match declared.split_first() {
        Some(split) => split,
        None => return Some(value),
    };
    let mut items = match value {
        Value::Array(items) => items,
        _ => return None,
    };

    let extent = extent as usize;
    if items.len() > extent {
        items.truncate(extent);
    } else if items.len() < extent {
        let edge = items.last()?.clone();
        items.resize(extent, edge);
    }

    items
        .into_iter()
        .map(|item| resize(item, rest))
        .collect::<Option<Vec<Value>>>()
        .map(Value::Array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_measure_scalar_and_nested() {
        assert_eq!(measure(&json!(1.5)), Vec::<u64>::new());
        assert_eq!(measure(&json!([1, 2, 3])), vec![3]);
        assert_eq!(measure(&json!([[1, 2], [3, 4], [5, 6]])), vec![3, 2]);
        assert_eq!(measure(&json!([])), vec![0]);
    }

    #[test]
    fn test_exact_shape_is_untouched() {
        let row = json!([[1, 2], [3, 4]]);
        let out = conform("image", row.clone(), &[2, 2]).unwrap();
        assert_eq!(out, row);
    }

    #[test]
    fn test_trim_long_axis() {
        let row = json!([1, 2, 3, 4, 5]);
        let out = conform("spectrum", row, &[3]).unwrap();
        assert_eq!(out, json!([1, 2, 3]));
    }

    #[test]
    fn test_pad_short_axis_repeats_edge() {
        let row = json!([1, 2, 3]);
        let out = conform("spectrum", row, &[5]).unwrap();
        assert_eq!(out, json!([1, 2, 3, 3, 3]));
    }

    #[test]
    fn test_repair_nested_axes() {
        // One row short and one column long.
        let row = json!([[1, 2, 3], [4, 5, 6]]);
        let out = conform("image", row, &[3, 2]).unwrap();
        assert_eq!(out, json!([[1, 2], [4, 5], [4, 5]]));
    }

    #[test]
    fn test_beyond_tolerance_rejected() {
        let row = json!([1, 2, 3]);
        let err = conform("spectrum", row, &[6]).unwrap_err();
        match err {
            Error::BadShapeMetadata {
                field,
                declared,
                actual,
            } => {
                assert_eq!(field, "spectrum");
                assert_eq!(declared, vec![6]);
                assert_eq!(actual, vec![3]);
            }
            other => panic!("expected BadShapeMetadata, got {:?}", other),
        }
    }

    #[test]
    fn test_rank_mismatch_rejected() {
        assert!(conform("image", json!([1, 2]), &[2, 2]).is_err());
        assert!(conform("image", json!(7), &[2]).is_err());
    }

    #[test]
    fn test_empty_axis_cannot_pad() {
        assert!(conform("spectrum", json!([]), &[2]).is_err());
    }

    #[test]
    fn test_repair_is_idempotent() {
        let row = json!([1, 2, 3]);
        let once = conform("spectrum", row, &[5]).unwrap();
        let twice = conform("spectrum", once.clone(), &[5]).unwrap();
        assert_eq!(once, twice);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Repairing within tolerance always lands on the declared
            /// shape, and repairing again is a no-op.
            #[test]
            fn conform_reaches_declared_shape(
                actual_len in 1u64..20,
                delta in -2i64..=2,
            ) {
                let declared_len = (actual_len as i64 + delta).max(1) as u64;
                let row = Value::Array(
                    (0..actual_len).map(|i| json!(i)).collect()
                );
                let out = conform("f", row, &[declared_len]).unwrap();
                prop_assert_eq!(measure(&out), vec![declared_len]);
                let again = conform("f", out.clone(), &[declared_len]).unwrap();
                prop_assert_eq!(again, out);
            }
        }
    }
}
