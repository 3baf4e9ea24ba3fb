//! Catalog: filtered, ordered, cached access to runs
//!
//! A catalog is a view over the store: an accumulated filter, a sort
//! specification, and a shared run cache. [`Catalog::search`] narrows the
//! view by conjunction and returns a new catalog sharing the same cache,
//! so runs assembled through one view are visible to every derived view.
//!
//! Listing never issues an unbounded query. Pagination is keyset-based:
//! each internal batch is a fresh bounded query whose continuation
//! predicate records the last-seen sort values and uid, so concurrent
//! inserts shift no rows and nothing is skipped or repeated.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use beamcat_core::{Error, Filter, Predicate, Result, RunStart, SeekKey, SortKey};
use beamcat_store::DocumentStore;

use crate::cache::RunCache;
use crate::config::CatalogConfig;
use crate::run::{self, Run};

/// A filtered, ordered view over the runs in a store
pub struct Catalog {
    store: Arc<dyn DocumentStore>,
    filter: Filter,
    cache: Arc<RunCache>,
    config: Arc<CatalogConfig>,
}

impl Catalog {
    /// Root catalog over a store: empty filter, configured sort, fresh
    /// cache
    pub fn new(store: Arc<dyn DocumentStore>, config: CatalogConfig) -> Self {
        let cache = Arc::new(RunCache::from_config(&config));
        Catalog {
            store,
            filter: Filter::empty(),
            cache,
            config: Arc::new(config),
        }
    }

    /// Narrow the view by conjoining `filter` onto the accumulated one
    ///
    /// The derived catalog shares this catalog's cache and configuration.
    /// Malformed filters are rejected here, before any query is issued.
    pub fn search(&self, filter: Filter) -> Result<Catalog> {
        filter.validate(&self.config.sort)?;
        Ok(Catalog {
            store: self.store.clone(),
            filter: self.filter.clone().and(filter),
            cache: self.cache.clone(),
            config: self.config.clone(),
        })
    }

    /// Narrow to runs whose start time falls in the half-open range
    pub fn between(&self, times: Range<f64>) -> Result<Catalog> {
        self.search(Filter::from_predicate(Predicate::Range {
            field: "time".to_string(),
            min: Some(times.start),
            max: Some(times.end),
        }))
    }

    /// [`Catalog::between`] over wall-clock datetimes, converted to the
    /// epoch-seconds convention RunStart times use
    pub fn between_datetimes(&self, times: Range<DateTime<Utc>>) -> Result<Catalog> {
        let start = times.start.timestamp_micros() as f64 / 1e6;
        let end = times.end.timestamp_micros() as f64 / 1e6;
        self.between(start..end)
    }

    /// The accumulated filter
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// The sort specification every listing follows
    pub fn sort(&self) -> &[SortKey] {
        &self.config.sort
    }

    /// The shared run cache (visible for inspection and tests)
    pub fn cache(&self) -> &RunCache {
        &self.cache
    }

    /// Fetch one run by exact uid, assembling it on cache miss
    ///
    /// The uid must also satisfy the accumulated filter: a run outside the
    /// view is reported as not found, not leaked through it.
    pub fn get(&self, uid: &str) -> Result<Arc<Run>> {
        if let Some(run) = self.cache.get(uid) {
            // Cached runs are checked against the view's filter too; the
            // cache is shared across differently-filtered catalogs.
            if self.filter.matches(run.start()) {
                debug!(target: "beamcat::catalog", uid = %uid, "run cache hit");
                return Ok(run);
            }
            return Err(Error::RunNotFound(uid.to_string()));
        }
        debug!(target: "beamcat::catalog", uid = %uid, "run cache miss");

        let lookup = self.filter.clone().and(Filter::uid(uid));
        let start = self
            .store
            .find_run_start(&lookup)?
            .ok_or_else(|| Error::RunNotFound(uid.to_string()))?;
        let overrides = self
            .config
            .overrides
            .get(uid)
            .cloned()
            .unwrap_or_default();
        let run = Arc::new(run::assemble(
            self.store.clone(),
            self.config.handlers.clone(),
            overrides,
            start,
        )?);
        self.cache.insert(run.clone());
        Ok(run)
    }

    /// Fetch one run by uid prefix
    ///
    /// Zero matches is [`Error::RunNotFound`]; more than one is
    /// [`Error::AmbiguousMatch`] listing the candidate uids.
    pub fn get_by_prefix(&self, prefix: &str) -> Result<Arc<Run>> {
        let lookup = self
            .filter
            .clone()
            .and(Filter::from_predicate(Predicate::Prefix {
                field: "uid".to_string(),
                prefix: prefix.to_string(),
            }));
        // Two rows decide unique vs. ambiguous; fetch a few more so the
        // error can name the candidates.
        let matches = self.store.find_run_starts(&lookup, &self.config.sort, 10)?;
        match matches.len() {
            0 => Err(Error::RunNotFound(prefix.to_string())),
            1 => self.get(&matches[0].uid),
            _ => Err(Error::AmbiguousMatch {
                needle: prefix.to_string(),
                candidates: matches.into_iter().map(|d| d.uid).collect(),
            }),
        }
    }

    /// Exact number of runs in the view
    pub fn len(&self) -> Result<u64> {
        self.store.count_run_starts(&self.filter)
    }

    /// True when the view holds no runs
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Cheap, possibly approximate count of runs in the view
    pub fn len_estimate(&self) -> Result<u64> {
        self.store.estimate_run_starts(&self.filter)
    }

    /// Page through the view's RunStarts, `limit` per page
    pub fn pages(&self, limit: usize) -> Pages {
        Pages {
            batches: Batches::new(
                self.store.clone(),
                self.filter.clone(),
                self.config.sort.clone(),
                self.config.batch_size,
            ),
            buffer: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// One page of RunStarts, skipping `skip` documents first
    ///
    /// Offset semantics layered over keyset batches: the skipped prefix is
    /// walked with continuation queries, never with a numeric offset in
    /// the store.
    pub fn page_of(&self, skip: usize, limit: usize) -> Result<Vec<RunStart>> {
        let mut pages = self.pages(limit);
        pages.skip(skip)?;
        Ok(pages.next_page()?.unwrap_or_default())
    }

    /// Every RunStart in the view, in sort order
    ///
    /// Materialized through the same bounded keyset batches as paging.
    pub fn run_starts(&self) -> Result<Vec<RunStart>> {
        let mut batches = Batches::new(
            self.store.clone(),
            self.filter.clone(),
            self.config.sort.clone(),
            self.config.batch_size,
        );
        let mut out = Vec::new();
        while let Some(batch) = batches.next_batch()? {
            out.extend(batch);
        }
        Ok(out)
    }

    /// Every run uid in the view, in sort order
    pub fn uids(&self) -> Result<Vec<String>> {
        Ok(self.run_starts()?.into_iter().map(|d| d.uid).collect())
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("filter", &self.filter)
            .field("sort", &self.config.sort)
            .finish()
    }
}

/// Bounded keyset batches over the view's RunStarts
///
/// Each batch is an independent bounded query: the base filter conjoined
/// with a `SeekAfter` continuation recording the previous batch's last
/// document. A short batch means the scan is finished.
struct Batches {
    store: Arc<dyn DocumentStore>,
    filter: Filter,
    sort: Vec<SortKey>,
    batch_size: usize,
    seek: Option<SeekKey>,
    done: bool,
}

impl Batches {
    fn new(
        store: Arc<dyn DocumentStore>,
        filter: Filter,
        sort: Vec<SortKey>,
        batch_size: usize,
    ) -> Self {
        Batches {
            store,
            filter,
            sort,
            batch_size: batch_size.max(1),
            seek: None,
            done: false,
        }
    }

    fn next_batch(&mut self) -> Result<Option<Vec<RunStart>>> {
        if self.done {
            return Ok(None);
        }
        let mut filter = self.filter.clone();
        if let Some(seek) = &self.seek {
            filter.push(Predicate::SeekAfter(seek.clone()));
        }
        let batch = self
            .store
            .find_run_starts(&filter, &self.sort, self.batch_size)?;
        if batch.len() < self.batch_size {
            self.done = true;
        }
        if let Some(last) = batch.last() {
            self.seek = Some(seek_key(&self.sort, last));
        }
        debug!(
            target: "beamcat::catalog",
            rows = batch.len(),
            done = self.done,
            "keyset batch"
        );
        if batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }
}

/// Continuation key recording `last`'s position under `sort`
fn seek_key(sort: &[SortKey], last: &RunStart) -> SeekKey {
    SeekKey {
        keys: sort
            .iter()
            .map(|key| {
                let value = last.field(&key.field).unwrap_or(Value::Null);
                (key.clone(), value)
            })
            .collect(),
        uid: last.uid.clone(),
    }
}

/// Caller-facing pager over the view's RunStarts
///
/// Decouples the caller's page size from the internal batch size: pages
/// are cut from a buffer refilled by keyset batches, so a limit larger or
/// smaller than the batch size still yields exact, gapless pages.
pub struct Pages {
    batches: Batches,
    buffer: VecDeque<RunStart>,
    limit: usize,
}

impl Pages {
    /// The next page, or None when the view is exhausted
    ///
    /// Every page but the last holds exactly `limit` documents.
    pub fn next_page(&mut self) -> Result<Option<Vec<RunStart>>> {
        self.fill(self.limit)?;
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let take = self.limit.min(self.buffer.len());
        Ok(Some(self.buffer.drain(..take).collect()))
    }

    /// Discard the next `count` documents
    pub fn skip(&mut self, count: usize) -> Result<()> {
        let mut remaining = count;
        while remaining > 0 {
            self.fill(remaining)?;
            if self.buffer.is_empty() {
                break;
            }
            let drop = remaining.min(self.buffer.len());
            self.buffer.drain(..drop);
            remaining -= drop;
        }
        Ok(())
    }

    /// Refill the buffer until it holds `want` documents or the scan ends
    fn fill(&mut self, want: usize) -> Result<()> {
        while self.buffer.len() < want {
            match self.batches.next_batch()? {
                Some(batch) => self.buffer.extend(batch),
                None => break,
            }
        }
        Ok(())
    }
}
