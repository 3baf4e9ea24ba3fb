//! Read-only merged metadata view
//!
//! Some deployments shadow stored RunStart/RunStop fields with corrected
//! values (a typo in a sample name, a recalibrated temperature) without
//! ever touching the stored document. The overlay models that as an
//! explicit merged view: a base mapping plus an optional override mapping,
//! looked up override-first. The base is never mutated.

use serde_json::{Map, Value};

/// Base metadata plus an optional override layer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Overlay {
    base: Map<String, Value>,
    overrides: Map<String, Value>,
}

impl Overlay {
    /// View over `base` with no overrides
    pub fn new(base: Map<String, Value>) -> Self {
        Overlay {
            base,
            overrides: Map::new(),
        }
    }

    /// View over `base` shadowed by `overrides`
    pub fn with_overrides(base: Map<String, Value>, overrides: Map<String, Value>) -> Self {
        Overlay { base, overrides }
    }

    /// Look up a key, override-first
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.overrides.get(key).or_else(|| self.base.get(key))
    }

    /// True when the key exists in either layer
    pub fn contains_key(&self, key: &str) -> bool {
        self.overrides.contains_key(key) || self.base.contains_key(key)
    }

    /// Iterate merged entries: every base entry with its effective value,
    /// then override-only entries, each key exactly once
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.base
            .iter()
            .map(move |(k, v)| (k, self.overrides.get(k).unwrap_or(v)))
            .chain(
                self.overrides
                    .iter()
                    .filter(move |(k, _)| !self.base.contains_key(k.as_str())),
            )
    }

    /// Materialize the merged view as one owned map
    pub fn to_map(&self) -> Map<String, Value> {
        self.iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// The untouched base layer
    pub fn base(&self) -> &Map<String, Value> {
        &self.base
    }
}
