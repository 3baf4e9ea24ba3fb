//! Catalog configuration
//!
//! Everything that used to live in process-wide singletons in older
//! catalog stacks — handler registries, cache tuning, ordering — is an
//! explicit configuration object here, with lifecycle tied to the
//! [`crate::Catalog`] instance that receives it.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Map, Value};

use beamcat_core::SortKey;

use crate::resolver::HandlerRegistry;

/// Default TTL for runs still being written
pub const DEFAULT_PARTIAL_TTL: Duration = Duration::from_secs(10);
/// Default TTL for finished, immutable runs
pub const DEFAULT_COMPLETE_TTL: Duration = Duration::from_secs(300);
/// Default capacity of the partial-run cache tier
pub const DEFAULT_PARTIAL_CAPACITY: usize = 64;
/// Default capacity of the complete-run cache tier
pub const DEFAULT_COMPLETE_CAPACITY: usize = 256;
/// Internal keyset-pagination batch size, independent of caller limits
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Default export page size for the document batcher
pub const DEFAULT_PAGE_SIZE: usize = 5000;

/// Tuning and collaborators for one catalog instance
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// TTL for cached runs with no RunStop yet; short, because new events
    /// keep arriving and the cutoff must be revalidated
    pub partial_ttl: Duration,
    /// TTL for cached runs with a RunStop; long, because they are
    /// immutable
    pub complete_ttl: Duration,
    /// Maximum entries in the partial tier
    pub partial_capacity: usize,
    /// Maximum entries in the complete tier
    pub complete_capacity: usize,
    /// How many RunStarts each internal keyset batch requests
    pub batch_size: usize,
    /// Default rows per page when re-serializing a run's documents
    pub page_size: usize,
    /// Result ordering; the ascending uid tie-break is appended
    /// implicitly wherever this is applied
    pub sort: Vec<SortKey>,
    /// Format handlers for externally-stored values, keyed by resource
    /// spec
    pub handlers: HandlerRegistry,
    /// Metadata overrides by run uid, shadowing stored RunStart fields
    /// without mutating them
    pub overrides: HashMap<String, Map<String, Value>>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        CatalogConfig {
            partial_ttl: DEFAULT_PARTIAL_TTL,
            complete_ttl: DEFAULT_COMPLETE_TTL,
            partial_capacity: DEFAULT_PARTIAL_CAPACITY,
            complete_capacity: DEFAULT_COMPLETE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            sort: vec![SortKey::descending("time")],
            handlers: HandlerRegistry::new(),
            overrides: HashMap::new(),
        }
    }
}
