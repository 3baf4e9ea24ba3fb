//! The DocumentStore contract
//!
//! This trait is the boundary between the catalog and whatever query
//! backend holds the documents. It is the contract any backend must
//! satisfy: point lookups, bounded sorted scans, counts, and the two
//! grouping aggregations the read path relies on (max seq_num and the
//! last-wins columnar event projection).
//!
//! Thread safety: all methods must be safe to call concurrently from
//! multiple threads (requires Send + Sync). Every method is synchronous
//! request/response; no method holds a long-lived server-side cursor.

use std::collections::BTreeMap;
use std::ops::Range;

use beamcat_core::{Datum, Descriptor, Event, Filter, Resource, Result, RunStart, RunStop, SortKey};
use serde_json::Value;

/// Result of the columnar event aggregation
///
/// Parallel arrays in seq_num order after last-time-wins de-duplication.
/// Every column has exactly `seq_nums.len()` entries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventTable {
    /// Row sequence numbers, strictly increasing
    pub seq_nums: Vec<u64>,
    /// Measurement time of the surviving event per row
    pub times: Vec<f64>,
    /// Uid of the surviving event per row
    pub uids: Vec<String>,
    /// Field -> column of values
    pub data: BTreeMap<String, Vec<Value>>,
    /// Field -> column of reading timestamps
    pub timestamps: BTreeMap<String, Vec<f64>>,
}

impl EventTable {
    /// Number of rows
    pub fn len(&self) -> usize {
        self.seq_nums.len()
    }

    /// True when the table holds no rows
    pub fn is_empty(&self) -> bool {
        self.seq_nums.is_empty()
    }

    /// Append another table's rows after this one's
    ///
    /// Used to concatenate per-descriptor results in descriptor time
    /// order. Both tables are expected to carry the same columns; a
    /// column missing on one side is padded with nulls (or zero
    /// timestamps) to keep every column the same length.
    pub fn append(&mut self, other: EventTable) {
        let old_len = self.len();
        let added = other.len();

        for field in other.data.keys() {
            self.data
                .entry(field.clone())
                .or_insert_with(|| vec![Value::Null; old_len]);
        }
        for field in other.timestamps.keys() {
            self.timestamps
                .entry(field.clone())
                .or_insert_with(|| vec![0.0; old_len]);
        }

        self.seq_nums.extend(other.seq_nums);
        self.times.extend(other.times);
        self.uids.extend(other.uids);
        for (field, column) in self.data.iter_mut() {
            match other.data.get(field) {
                Some(values) => column.extend(values.iter().cloned()),
                None => column.extend(std::iter::repeat(Value::Null).take(added)),
            }
        }
        for (field, column) in self.timestamps.iter_mut() {
            match other.timestamps.get(field) {
                Some(values) => column.extend(values.iter().copied()),
                None => column.extend(std::iter::repeat(0.0).take(added)),
            }
        }
    }
}

/// Query backend for the six stored document kinds
///
/// The catalog owns which queries are issued and in what order; the store
/// owns how they are answered. Implementations must not mutate documents:
/// the entire layer is read-only with respect to stored data.
pub trait DocumentStore: Send + Sync {
    /// Point lookup: first RunStart matching the filter, if any
    fn find_run_start(&self, filter: &Filter) -> Result<Option<RunStart>>;

    /// Bounded sorted scan over RunStarts
    ///
    /// Returns at most `limit` documents matching `filter`, ordered by
    /// `sort` with the ascending uid tie-break appended. This is the only
    /// scan surface; unbounded iteration is built on top of it with
    /// keyset continuation filters.
    fn find_run_starts(
        &self,
        filter: &Filter,
        sort: &[SortKey],
        limit: usize,
    ) -> Result<Vec<RunStart>>;

    /// Exact count of RunStarts matching the filter
    fn count_run_starts(&self, filter: &Filter) -> Result<u64>;

    /// Cheap, possibly approximate count of RunStarts matching the filter
    fn estimate_run_starts(&self, filter: &Filter) -> Result<u64>;

    /// The RunStop closing the given run, if the run has finished
    fn find_run_stop(&self, run_start_uid: &str) -> Result<Option<RunStop>>;

    /// Descriptors referencing the given run, in creation-time order,
    /// optionally restricted to one stream name
    fn find_descriptors(
        &self,
        run_start_uid: &str,
        stream: Option<&str>,
    ) -> Result<Vec<Descriptor>>;

    /// Distinct stream names declared by the run's descriptors, in
    /// first-declared order
    fn stream_names(&self, run_start_uid: &str) -> Result<Vec<String>>;

    /// Grouping aggregation: largest seq_num over every Event whose
    /// descriptor is in the given set; None when no such Event exists
    fn max_seq_num(&self, descriptor_uids: &[String]) -> Result<Option<u64>>;

    /// Columnar event aggregation for one descriptor
    ///
    /// Pipeline semantics: match events with `seq_num` in `rows`, sort by
    /// time, collapse duplicate seq_nums keeping the chronologically last
    /// event, re-sort by seq_num, project `fields` into parallel arrays.
    /// An empty `fields` slice projects every field present.
    fn event_table(
        &self,
        descriptor_uid: &str,
        fields: &[String],
        rows: Range<u64>,
    ) -> Result<EventTable>;

    /// Every Event for one descriptor in time order, undeduplicated
    /// (export path)
    fn events_for_descriptor(&self, descriptor_uid: &str) -> Result<Vec<Event>>;

    /// Point lookup of a Resource by its resolved identifier
    fn find_resource(&self, resource_id: &str) -> Result<Option<Resource>>;

    /// Point lookup of a Datum by datum id
    fn find_datum(&self, datum_id: &str) -> Result<Option<Datum>>;

    /// Every Datum belonging to one Resource, in one fetch
    fn datums_for_resource(&self, resource_id: &str) -> Result<Vec<Datum>>;
}
