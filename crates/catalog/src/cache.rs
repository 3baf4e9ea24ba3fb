//! Two-tier run cache with TTL and capacity eviction
//!
//! Assembled runs are cached in one of two independently configured
//! tiers: partial runs (no RunStop yet) expire quickly because their
//! cutoff grows as events arrive; complete runs are immutable and can be
//! held much longer. There is no explicit invalidation API — staleness is
//! bounded by TTL alone.
//!
//! The cache is the only shared mutable state in the read layer. Two
//! callers racing on the same cache miss may both assemble the run; the
//! last insert wins and both results are semantically equivalent, since
//! runs are derived, not authoritative.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::config::CatalogConfig;
use crate::run::Run;

/// One cached value plus its expiry bookkeeping
struct Entry<V> {
    value: Arc<V>,
    expires_at: Instant,
    stamp: u64,
}

/// Map plus expiry index, guarded together by one lock
struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    /// (expiry instant, insertion stamp) -> key; the stamp disambiguates
    /// entries expiring at the same instant
    expiry: BTreeMap<(Instant, u64), String>,
    counter: u64,
}

/// TTL + capacity cache keyed by uid
///
/// Expiry is logical: expired entries are dropped when touched or when an
/// insert purges them; no background sweeper runs. Capacity eviction
/// removes the soonest-expiring entries first.
pub struct TtlCache<V> {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<Inner<V>>,
}

impl<V> TtlCache<V> {
    /// Cache holding at most `capacity` entries for `ttl` each
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        TtlCache {
            ttl,
            capacity,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                expiry: BTreeMap::new(),
                counter: 0,
            }),
        }
    }

    /// Fetch a live entry
    pub fn get(&self, uid: &str) -> Option<Arc<V>> {
        self.get_at(uid, Instant::now())
    }

    /// Insert or replace an entry, refreshing its TTL
    pub fn insert(&self, uid: String, value: Arc<V>) {
        self.insert_at(uid, value, Instant::now());
    }

    /// Drop an entry outright (tier promotion)
    pub fn remove(&self, uid: &str) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.remove(uid) {
            inner.expiry.remove(&(entry.expires_at, entry.stamp));
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.len_at(Instant::now())
    }

    /// True when no live entries remain
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_at(&self, uid: &str, now: Instant) -> Option<Arc<V>> {
        let mut inner = self.inner.lock();
        match inner.entries.get(uid) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                // Logically expired; drop it on touch.
                if let Some(entry) = inner.entries.remove(uid) {
                    inner.expiry.remove(&(entry.expires_at, entry.stamp));
                }
                None
            }
            None => None,
        }
    }

    fn insert_at(&self, uid: String, value: Arc<V>, now: Instant) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        if let Some(old) = inner.entries.remove(&uid) {
            inner.expiry.remove(&(old.expires_at, old.stamp));
        }
        Self::purge_expired(&mut inner, now);
        while inner.entries.len() >= self.capacity {
            // Evict the soonest-expiring entry.
            let victim = match inner.expiry.iter().next() {
                Some((key, uid)) => (*key, uid.clone()),
                None => break,
            };
            inner.expiry.remove(&victim.0);
            inner.entries.remove(&victim.1);
            trace!(target: "beamcat::cache", uid = %victim.1, "capacity eviction");
        }
        let expires_at = now + self.ttl;
        inner.counter += 1;
        let stamp = inner.counter;
        inner.expiry.insert((expires_at, stamp), uid.clone());
        inner.entries.insert(
            uid,
            Entry {
                value,
                expires_at,
                stamp,
            },
        );
    }

    fn len_at(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock();
        Self::purge_expired(&mut inner, now);
        inner.entries.len()
    }

    fn purge_expired(inner: &mut Inner<V>, now: Instant) {
        loop {
            let key = match inner.expiry.iter().next() {
                Some(((expires_at, stamp), uid)) if *expires_at <= now => {
                    ((*expires_at, *stamp), uid.clone())
                }
                _ => break,
            };
            inner.expiry.remove(&key.0);
            inner.entries.remove(&key.1);
        }
    }
}

/// The two-tier run cache
///
/// Lookup checks the complete tier, then the partial tier (a logical
/// union view). Insert classifies by RunStop presence and lands in
/// exactly one tier; a run promoted to complete is dropped from the
/// partial tier so at most one entry exists per uid.
pub struct RunCache {
    partial: TtlCache<Run>,
    complete: TtlCache<Run>,
}

impl RunCache {
    /// Cache tiers sized and timed per the catalog configuration
    pub fn from_config(config: &CatalogConfig) -> Self {
        RunCache {
            partial: TtlCache::new(config.partial_ttl, config.partial_capacity),
            complete: TtlCache::new(config.complete_ttl, config.complete_capacity),
        }
    }

    /// Fetch a cached run: complete tier first, then partial
    pub fn get(&self, uid: &str) -> Option<Arc<Run>> {
        self.complete.get(uid).or_else(|| self.partial.get(uid))
    }

    /// Cache an assembled run in the tier matching its lifecycle state
    pub fn insert(&self, run: Arc<Run>) {
        let uid = run.uid().to_string();
        if run.is_complete() {
            self.partial.remove(&uid);
            self.complete.insert(uid, run);
        } else {
            self.complete.remove(&uid);
            self.partial.insert(uid, run);
        }
    }

    /// Live entries in the partial tier
    pub fn partial_len(&self) -> usize {
        self.partial.len()
    }

    /// Live entries in the complete tier
    pub fn complete_len(&self) -> usize {
        self.complete.len()
    }
}
