//! Filter and sort surface for catalog queries
//!
//! A [`Filter`] is a conjoined (AND) set of predicates over RunStart
//! fields. Catalog search composes filters by conjunction; they accumulate
//! and are never replaced. The predicate vocabulary is the minimum the
//! catalog compiles to: equality, set membership, numeric range,
//! regex-prefix, and the keyset-pagination continuation predicate.
//!
//! Malformed filters are rejected by [`Filter::validate`] before any I/O.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::documents::RunStart;
use crate::error::{Error, Result};

// ============================================================================
// Sort specification
// ============================================================================

/// Sort direction for one sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Smallest first
    Ascending,
    /// Largest first
    Descending,
}

/// One component of a catalog ordering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// RunStart field to sort on
    pub field: String,
    /// Direction
    pub order: SortOrder,
}

impl SortKey {
    /// Convenience constructor
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        SortKey {
            field: field.into(),
            order,
        }
    }

    /// Descending sort on `field`
    pub fn descending(field: impl Into<String>) -> Self {
        SortKey::new(field, SortOrder::Descending)
    }

    /// Ascending sort on `field`
    pub fn ascending(field: impl Into<String>) -> Self {
        SortKey::new(field, SortOrder::Ascending)
    }
}

/// Compare two JSON values for sorting purposes
///
/// Numbers compare numerically, strings lexicographically, booleans
/// false-before-true. Mixed or non-scalar types are incomparable and
/// return None; callers treat incomparable as "does not sort after".
pub fn cmp_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

// ============================================================================
// Predicates
// ============================================================================

/// Continuation key for keyset pagination
///
/// Records the last-seen value of every sort key plus the uid tie-break.
/// A document matches when it sorts strictly after this key under the
/// recorded ordering, so a fresh bounded query resumes exactly where the
/// previous batch stopped without a numeric offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeekKey {
    /// (sort key, last-seen value) in sort-spec order
    pub keys: Vec<(SortKey, Value)>,
    /// Uid of the last-seen document; the ascending tie-break
    pub uid: String,
}

impl SeekKey {
    /// True when `doc` sorts strictly after this key
    ///
    /// Lexicographic over the sort keys: a document strictly past a key
    /// value matches regardless of later keys; a tie defers to the next
    /// key and finally to the uid tie-break. A document missing a sort
    /// field, or carrying an incomparable value, never matches.
    pub fn sorts_after(&self, doc: &RunStart) -> bool {
        for (sort_key, last) in &self.keys {
            let value = match doc.field(&sort_key.field) {
                Some(v) => v,
                None => return false,
            };
            let ordering = match cmp_values(&value, last) {
                Some(o) => o,
                None => return false,
            };
            let after = match sort_key.order {
                SortOrder::Ascending => Ordering::Greater,
                SortOrder::Descending => Ordering::Less,
            };
            if ordering == after {
                return true;
            }
            if ordering != Ordering::Equal {
                return false;
            }
        }
        doc.uid > self.uid
    }
}

/// One predicate over RunStart fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Field equals value
    Eq {
        /// Field name
        field: String,
        /// Value to match
        value: Value,
    },
    /// Field value is a member of the set
    In {
        /// Field name
        field: String,
        /// Accepted values; must be non-empty
        values: Vec<Value>,
    },
    /// Numeric half-open range: `min <= value < max`
    Range {
        /// Field name
        field: String,
        /// Inclusive lower bound
        min: Option<f64>,
        /// Exclusive upper bound
        max: Option<f64>,
    },
    /// String field starts with the given prefix (the regex-prefix
    /// surface; compiles to an anchored `^prefix` match downstream)
    Prefix {
        /// Field name
        field: String,
        /// Required prefix
        prefix: String,
    },
    /// Keyset-pagination continuation: document sorts strictly after the
    /// recorded key
    SeekAfter(SeekKey),
}

impl Predicate {
    /// Evaluate this predicate against one RunStart
    pub fn matches(&self, doc: &RunStart) -> bool {
        match self {
            Predicate::Eq { field, value } => doc.field(field).as_ref() == Some(value),
            Predicate::In { field, values } => match doc.field(field) {
                Some(v) => values.contains(&v),
                None => false,
            },
            Predicate::Range { field, min, max } => {
                let v = match doc.field(field).and_then(|v| v.as_f64()) {
                    Some(v) => v,
                    None => return false,
                };
                if let Some(min) = min {
                    if v < *min {
                        return false;
                    }
                }
                if let Some(max) = max {
                    if v >= *max {
                        return false;
                    }
                }
                true
            }
            Predicate::Prefix { field, prefix } => doc
                .field(field)
                .and_then(|v| v.as_str().map(|s| s.starts_with(prefix.as_str())))
                .unwrap_or(false),
            Predicate::SeekAfter(seek) => seek.sorts_after(doc),
        }
    }

    fn validate(&self, sort: &[SortKey]) -> Result<()> {
        let field = match self {
            Predicate::Eq { field, .. }
            | Predicate::In { field, .. }
            | Predicate::Range { field, .. }
            | Predicate::Prefix { field, .. } => field.as_str(),
            Predicate::SeekAfter(seek) => {
                let seek_spec: Vec<&SortKey> = seek.keys.iter().map(|(k, _)| k).collect();
                if seek_spec.len() != sort.len()
                    || seek_spec.iter().zip(sort).any(|(a, b)| **a != *b)
                {
                    return Err(Error::MalformedFilter(
                        "seek key does not match the catalog sort specification".to_string(),
                    ));
                }
                return Ok(());
            }
        };
        if field.is_empty() {
            return Err(Error::MalformedFilter("empty field name".to_string()));
        }
        match self {
            Predicate::In { values, .. } if values.is_empty() => Err(Error::MalformedFilter(
                format!("empty membership set for field '{}'", field),
            )),
            Predicate::Range {
                min: Some(min),
                max: Some(max),
                ..
            } if min >= max => Err(Error::MalformedFilter(format!(
                "inverted range for field '{}': {} >= {}",
                field, min, max
            ))),
            Predicate::Range {
                min: None,
                max: None,
                ..
            } => Err(Error::MalformedFilter(format!(
                "unbounded range for field '{}'",
                field
            ))),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Filter
// ============================================================================

/// Conjoined (AND) set of predicates over RunStart fields
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    /// The empty filter; matches everything
    pub fn empty() -> Self {
        Filter::default()
    }

    /// Filter from a predicate list
    pub fn new(predicates: Vec<Predicate>) -> Self {
        Filter { predicates }
    }

    /// Single-predicate filter
    pub fn from_predicate(predicate: Predicate) -> Self {
        Filter {
            predicates: vec![predicate],
        }
    }

    /// Point filter on the uid field
    pub fn uid(uid: impl Into<String>) -> Self {
        Filter::from_predicate(Predicate::Eq {
            field: "uid".to_string(),
            value: Value::String(uid.into()),
        })
    }

    /// Conjoin another filter onto this one. Filters accumulate; nothing
    /// is ever replaced.
    pub fn and(mut self, other: Filter) -> Self {
        self.predicates.extend(other.predicates);
        self
    }

    /// Append one predicate
    pub fn push(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    /// The predicates, in conjunction order
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// True when no predicates are present
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Evaluate the conjunction against one RunStart
    pub fn matches(&self, doc: &RunStart) -> bool {
        self.predicates.iter().all(|p| p.matches(doc))
    }

    /// Reject unsupported predicate shapes before any I/O
    ///
    /// `sort` is the catalog's sort specification; a `SeekAfter` predicate
    /// must agree with it key-for-key.
    pub fn validate(&self, sort: &[SortKey]) -> Result<()> {
        for predicate in &self.predicates {
            predicate.validate(sort)?;
        }
        Ok(())
    }
}
