//! Build-on-first-access, then memoize
//!
//! A [`LazyTable`] is a map with a fixed key set declared at construction
//! whose values are built by a factory closure on first access and
//! memoized thereafter. It stands in for the dynamic attribute-style
//! mappings of duck-typed catalogs: streams within a run, dataset views
//! within a stream.
//!
//! Failed builds are never memoized, so a transient store error on first
//! access does not poison the slot. The factory runs outside the table
//! lock; two threads racing on the same cold key may both build, and the
//! first insert wins — acceptable because built values are derived, not
//! authoritative.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use beamcat_core::Result;

/// Lazily-populated ordered map keyed by string
pub struct LazyTable<V> {
    keys: Vec<String>,
    built: Mutex<HashMap<String, Arc<V>>>,
    factory: Box<dyn Fn(&str) -> Result<V> + Send + Sync>,
}

impl<V> LazyTable<V> {
    /// Table over `keys`, each built on first access by `factory`
    pub fn new<F>(keys: Vec<String>, factory: F) -> Self
    where
        F: Fn(&str) -> Result<V> + Send + Sync + 'static,
    {
        LazyTable {
            keys,
            built: Mutex::new(HashMap::new()),
            factory: Box::new(factory),
        }
    }

    /// The declared keys, in declaration order
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// True when `key` was declared at construction
    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    /// Fetch the value for `key`, building and memoizing it on first
    /// access. Returns None for undeclared keys; the caller maps that to
    /// its own not-found error.
    pub fn get(&self, key: &str) -> Option<Result<Arc<V>>> {
        if !self.contains(key) {
            return None;
        }
        if let Some(value) = self.built.lock().get(key) {
            return Some(Ok(value.clone()));
        }
        let value = match (self.factory)(key) {
            Ok(v) => Arc::new(v),
            Err(e) => return Some(Err(e)),
        };
        let mut built = self.built.lock();
        let slot = built.entry(key.to_string()).or_insert_with(|| value);
        Some(Ok(slot.clone()))
    }

    /// Number of values built so far
    pub fn built_len(&self) -> usize {
        self.built.lock().len()
    }
}

impl<V> fmt::Debug for LazyTable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyTable")
            .field("keys", &self.keys)
            .field("built", &self.built_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamcat_core::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_builds_on_first_access_only() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let table = LazyTable::new(vec!["a".to_string(), "b".to_string()], move |key| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(key.to_uppercase())
        });

        assert_eq!(table.built_len(), 0);
        assert_eq!(*table.get("a").unwrap().unwrap(), "A");
        assert_eq!(*table.get("a").unwrap().unwrap(), "A");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(*table.get("b").unwrap().unwrap(), "B");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(table.built_len(), 2);
    }

    #[test]
    fn test_unknown_key_is_none_and_never_built() {
        let table: LazyTable<String> =
            LazyTable::new(vec!["a".to_string()], |_| Ok(String::new()));
        assert!(table.get("z").is_none());
        assert_eq!(table.built_len(), 0);
    }

    #[test]
    fn test_failed_build_not_memoized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let table = LazyTable::new(vec!["a".to_string()], move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(Error::Store("transient".to_string()))
            } else {
                Ok(42u32)
            }
        });

        assert!(table.get("a").unwrap().is_err());
        assert_eq!(table.built_len(), 0);
        // Second access retries and succeeds.
        assert_eq!(*table.get("a").unwrap().unwrap(), 42);
        assert_eq!(table.built_len(), 1);
    }

    #[test]
    fn test_keys_preserve_declaration_order() {
        let table: LazyTable<()> = LazyTable::new(
            vec!["primary".to_string(), "baseline".to_string()],
            |_| Ok(()),
        );
        assert_eq!(table.keys(), ["primary", "baseline"]);
        assert!(table.contains("primary"));
        assert!(!table.contains("monitor"));
    }

    #[test]
    fn test_concurrent_cold_access_single_value() {
        use std::thread;

        let table = Arc::new(LazyTable::new(vec!["a".to_string()], |_| Ok(7u32)));
        let mut handles = vec![];
        for _ in 0..8 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                *table.get("a").unwrap().unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 7);
        }
        assert_eq!(table.built_len(), 1);
    }
}
