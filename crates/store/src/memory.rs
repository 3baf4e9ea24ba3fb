//! MemoryStore: reference DocumentStore backend
//!
//! This module implements the DocumentStore trait using:
//! - `BTreeMap`/`HashMap` collections behind `parking_lot::RwLock`
//! - Secondary indices (descriptors-by-run, events-by-descriptor,
//!   datums-by-resource) so per-run queries are O(run size), not O(total)
//!
//! Every test suite runs against this backend, and it doubles as the
//! fixture write surface via the `insert_*` methods. Writes only add
//! documents; nothing here ever mutates a stored document.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

use beamcat_core::{
    cmp_values, Datum, DefaultResourceId, Descriptor, Document, Error, Event, Filter, Resource,
    ResourceIdResolver, Result, RunStart, RunStop, SortKey, SortOrder,
};

use crate::traits::{DocumentStore, EventTable};

/// In-memory document store with secondary indices
pub struct MemoryStore {
    /// RunStart by uid, iterated in uid order
    starts: RwLock<BTreeMap<String, RunStart>>,
    /// RunStop keyed by the uid of the RunStart it closes
    stops: RwLock<HashMap<String, RunStop>>,
    /// Descriptor by uid
    descriptors: RwLock<HashMap<String, Descriptor>>,
    /// Secondary index: run uid -> descriptor uids in insertion order
    descriptors_by_run: RwLock<HashMap<String, Vec<String>>>,
    /// Events grouped by descriptor uid, in insertion order
    events: RwLock<HashMap<String, Vec<Event>>>,
    /// Resource by resolved identifier
    resources: RwLock<HashMap<String, Resource>>,
    /// Datum by datum id
    datums: RwLock<HashMap<String, Datum>>,
    /// Secondary index: resource id -> datum ids in insertion order
    datums_by_resource: RwLock<HashMap<String, Vec<String>>>,
    /// Identity strategy for legacy resources without a uid
    id_resolver: Box<dyn ResourceIdResolver>,
}

impl MemoryStore {
    /// Create an empty store with the default resource identity strategy
    pub fn new() -> Self {
        Self::with_id_resolver(Box::new(DefaultResourceId))
    }

    /// Create an empty store with a custom resource identity strategy
    pub fn with_id_resolver(id_resolver: Box<dyn ResourceIdResolver>) -> Self {
        MemoryStore {
            starts: RwLock::new(BTreeMap::new()),
            stops: RwLock::new(HashMap::new()),
            descriptors: RwLock::new(HashMap::new()),
            descriptors_by_run: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
            resources: RwLock::new(HashMap::new()),
            datums: RwLock::new(HashMap::new()),
            datums_by_resource: RwLock::new(HashMap::new()),
            id_resolver,
        }
    }

    // ------------------------------------------------------------------
    // Fixture write surface
    // ------------------------------------------------------------------

    /// Add a RunStart
    pub fn insert_run_start(&self, start: RunStart) {
        self.starts.write().insert(start.uid.clone(), start);
    }

    /// Add a RunStop
    pub fn insert_run_stop(&self, stop: RunStop) {
        self.stops.write().insert(stop.run_start.clone(), stop);
    }

    /// Add a Descriptor and index it under its run
    pub fn insert_descriptor(&self, descriptor: Descriptor) {
        self.descriptors_by_run
            .write()
            .entry(descriptor.run_start.clone())
            .or_default()
            .push(descriptor.uid.clone());
        self.descriptors
            .write()
            .insert(descriptor.uid.clone(), descriptor);
    }

    /// Add an Event under its descriptor
    pub fn insert_event(&self, event: Event) {
        self.events
            .write()
            .entry(event.descriptor.clone())
            .or_default()
            .push(event);
    }

    /// Add a Resource, returning the identifier it was filed under
    ///
    /// # Errors
    ///
    /// Returns an error when the identity strategy cannot produce an
    /// identifier for the record.
    pub fn insert_resource(&self, resource: Resource) -> Result<String> {
        let id = self
            .id_resolver
            .resource_id(&resource)
            .ok_or_else(|| Error::Store("resource carries no usable identity".to_string()))?;
        self.resources.write().insert(id.clone(), resource);
        Ok(id)
    }

    /// Add a Datum and index it under its resource
    pub fn insert_datum(&self, datum: Datum) {
        self.datums_by_resource
            .write()
            .entry(datum.resource.clone())
            .or_default()
            .push(datum.datum_id.clone());
        self.datums.write().insert(datum.datum_id.clone(), datum);
    }

    /// Replay one document of any individual kind into the store
    ///
    /// Page documents are unpacked into their rows first.
    pub fn insert_document(&self, document: Document) -> Result<()> {
        match document {
            Document::Start(d) => self.insert_run_start(d),
            Document::Stop(d) => self.insert_run_stop(d),
            Document::Descriptor(d) => self.insert_descriptor(d),
            Document::Event(d) => self.insert_event(d),
            Document::Resource(d) => {
                self.insert_resource(d)?;
            }
            Document::Datum(d) => self.insert_datum(d),
            Document::EventPage(page) => {
                for event in page.unpack() {
                    self.insert_event(event);
                }
            }
            Document::DatumPage(page) => {
                for datum in page.unpack() {
                    self.insert_datum(datum);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Query helpers
    // ------------------------------------------------------------------

    /// Sort matching RunStarts by the spec with the uid tie-break
    fn sorted_matches(&self, filter: &Filter, sort: &[SortKey]) -> Vec<RunStart> {
        let starts = self.starts.read();
        let mut matches: Vec<RunStart> = starts
            .values()
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            for key in sort {
                let va = a.field(&key.field);
                let vb = b.field(&key.field);
                let ordering = match (va, vb) {
                    (Some(va), Some(vb)) => {
                        cmp_values(&va, &vb).unwrap_or(std::cmp::Ordering::Equal)
                    }
                    // Documents missing the sort field rank last.
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                };
                let ordering = match key.order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                };
                if ordering != std::cmp::Ordering::Equal {
                    return ordering;
                }
            }
            a.uid.cmp(&b.uid)
        });
        matches
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn find_run_start(&self, filter: &Filter) -> Result<Option<RunStart>> {
        let starts = self.starts.read();
        Ok(starts.values().find(|doc| filter.matches(doc)).cloned())
    }

    fn find_run_starts(
        &self,
        filter: &Filter,
        sort: &[SortKey],
        limit: usize,
    ) -> Result<Vec<RunStart>> {
        let mut matches = self.sorted_matches(filter, sort);
        matches.truncate(limit);
        trace!(
            target: "beamcat::store",
            matched = matches.len(),
            limit,
            "run start scan"
        );
        Ok(matches)
    }

    fn count_run_starts(&self, filter: &Filter) -> Result<u64> {
        let starts = self.starts.read();
        Ok(starts.values().filter(|doc| filter.matches(doc)).count() as u64)
    }

    fn estimate_run_starts(&self, filter: &Filter) -> Result<u64> {
        // The in-memory backend can afford an exact answer.
        self.count_run_starts(filter)
    }

    fn find_run_stop(&self, run_start_uid: &str) -> Result<Option<RunStop>> {
        Ok(self.stops.read().get(run_start_uid).cloned())
    }

    fn find_descriptors(
        &self,
        run_start_uid: &str,
        stream: Option<&str>,
    ) -> Result<Vec<Descriptor>> {
        let by_run = self.descriptors_by_run.read();
        let descriptors = self.descriptors.read();
        let mut found: Vec<Descriptor> = by_run
            .get(run_start_uid)
            .into_iter()
            .flatten()
            .filter_map(|uid| descriptors.get(uid))
            .filter(|d| stream.map_or(true, |name| d.name == name))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(std::cmp::Ordering::Equal));
        Ok(found)
    }

    fn stream_names(&self, run_start_uid: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for descriptor in self.find_descriptors(run_start_uid, None)? {
            if !names.contains(&descriptor.name) {
                names.push(descriptor.name);
            }
        }
        Ok(names)
    }

    fn max_seq_num(&self, descriptor_uids: &[String]) -> Result<Option<u64>> {
        let events = self.events.read();
        Ok(descriptor_uids
            .iter()
            .filter_map(|uid| events.get(uid))
            .flatten()
            .map(|e| e.seq_num)
            .max())
    }

    fn event_table(
        &self,
        descriptor_uid: &str,
        fields: &[String],
        rows: Range<u64>,
    ) -> Result<EventTable> {
        let events = self.events.read();
        let mut in_range: Vec<&Event> = events
            .get(descriptor_uid)
            .into_iter()
            .flatten()
            .filter(|e| rows.contains(&e.seq_num))
            .collect();

        // Sort by time, then collapse duplicate seq_nums keeping the
        // chronologically last event for each.
        in_range
            .sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(std::cmp::Ordering::Equal));
        let mut by_seq: BTreeMap<u64, &Event> = BTreeMap::new();
        for event in in_range {
            by_seq.insert(event.seq_num, event);
        }

        // Empty projection means every field present.
        let fields: Vec<String> = if fields.is_empty() {
            let mut all = Vec::new();
            for event in by_seq.values() {
                for field in event.data.keys() {
                    if !all.contains(field) {
                        all.push(field.clone());
                    }
                }
            }
            all
        } else {
            fields.to_vec()
        };

        let mut table = EventTable::default();
        for (seq_num, event) in &by_seq {
            table.seq_nums.push(*seq_num);
            table.times.push(event.time);
            table.uids.push(event.uid.clone());
        }
        for field in &fields {
            let values = by_seq
                .values()
                .map(|e| e.data.get(field).cloned().unwrap_or(Value::Null))
                .collect();
            let stamps = by_seq
                .values()
                .map(|e| e.timestamps.get(field).copied().unwrap_or(0.0))
                .collect();
            table.data.insert(field.clone(), values);
            table.timestamps.insert(field.clone(), stamps);
        }
        Ok(table)
    }

    fn events_for_descriptor(&self, descriptor_uid: &str) -> Result<Vec<Event>> {
        let events = self.events.read();
        let mut found: Vec<Event> = events
            .get(descriptor_uid)
            .map(|v| v.to_vec())
            .unwrap_or_default();
        found.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(std::cmp::Ordering::Equal));
        Ok(found)
    }

    fn find_resource(&self, resource_id: &str) -> Result<Option<Resource>> {
        Ok(self.resources.read().get(resource_id).cloned())
    }

    fn find_datum(&self, datum_id: &str) -> Result<Option<Datum>> {
        Ok(self.datums.read().get(datum_id).cloned())
    }

    fn datums_for_resource(&self, resource_id: &str) -> Result<Vec<Datum>> {
        let by_resource = self.datums_by_resource.read();
        let datums = self.datums.read();
        Ok(by_resource
            .get(resource_id)
            .into_iter()
            .flatten()
            .filter_map(|id| datums.get(id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamcat_core::Predicate;
    use serde_json::json;

    fn start(uid: &str, time: f64) -> RunStart {
        serde_json::from_value(json!({ "uid": uid, "time": time })).unwrap()
    }

    fn descriptor(uid: &str, run: &str, name: &str, time: f64) -> Descriptor {
        serde_json::from_value(json!({
            "uid": uid,
            "run_start": run,
            "name": name,
            "time": time,
            "data_keys": { "x": {"dtype": "number", "shape": []} }
        }))
        .unwrap()
    }

    fn event(uid: &str, descriptor: &str, seq_num: u64, time: f64, x: f64) -> Event {
        serde_json::from_value(json!({
            "uid": uid,
            "descriptor": descriptor,
            "time": time,
            "seq_num": seq_num,
            "data": { "x": x },
            "timestamps": { "x": time }
        }))
        .unwrap()
    }

    fn populated() -> MemoryStore {
        let store = MemoryStore::new();
        for (uid, time) in [("r1", 1.0), ("r2", 2.0), ("r3", 3.0)] {
            store.insert_run_start(start(uid, time));
        }
        store.insert_descriptor(descriptor("d1", "r1", "primary", 1.1));
        store.insert_descriptor(descriptor("d2", "r1", "baseline", 1.2));
        store.insert_event(event("e1", "d1", 1, 1.3, 10.0));
        store.insert_event(event("e2", "d1", 2, 1.4, 20.0));
        store
    }

    #[test]
    fn test_find_run_start_point_lookup() {
        let store = populated();
        let found = store.find_run_start(&Filter::uid("r2")).unwrap();
        assert_eq!(found.unwrap().uid, "r2");
        assert!(store.find_run_start(&Filter::uid("nope")).unwrap().is_none());
    }

    #[test]
    fn test_find_run_starts_sorted_descending() {
        let store = populated();
        let sort = vec![SortKey::descending("time")];
        let found = store.find_run_starts(&Filter::empty(), &sort, 10).unwrap();
        let uids: Vec<&str> = found.iter().map(|s| s.uid.as_str()).collect();
        assert_eq!(uids, vec!["r3", "r2", "r1"]);
    }

    #[test]
    fn test_find_run_starts_respects_limit() {
        let store = populated();
        let sort = vec![SortKey::descending("time")];
        let found = store.find_run_starts(&Filter::empty(), &sort, 2).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].uid, "r3");
    }

    #[test]
    fn test_uid_tie_break_on_equal_sort_key() {
        let store = MemoryStore::new();
        store.insert_run_start(start("b", 1.0));
        store.insert_run_start(start("a", 1.0));
        let sort = vec![SortKey::descending("time")];
        let found = store.find_run_starts(&Filter::empty(), &sort, 10).unwrap();
        let uids: Vec<&str> = found.iter().map(|s| s.uid.as_str()).collect();
        assert_eq!(uids, vec!["a", "b"]);
    }

    #[test]
    fn test_counts() {
        let store = populated();
        assert_eq!(store.count_run_starts(&Filter::empty()).unwrap(), 3);
        let range = Filter::from_predicate(Predicate::Range {
            field: "time".to_string(),
            min: Some(2.0),
            max: None,
        });
        assert_eq!(store.count_run_starts(&range).unwrap(), 2);
        assert_eq!(store.estimate_run_starts(&range).unwrap(), 2);
    }

    #[test]
    fn test_descriptors_and_stream_names() {
        let store = populated();
        let all = store.find_descriptors("r1", None).unwrap();
        assert_eq!(all.len(), 2);
        let primary = store.find_descriptors("r1", Some("primary")).unwrap();
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].uid, "d1");
        assert_eq!(store.stream_names("r1").unwrap(), vec!["primary", "baseline"]);
        assert!(store.stream_names("r9").unwrap().is_empty());
    }

    #[test]
    fn test_max_seq_num() {
        let store = populated();
        assert_eq!(store.max_seq_num(&["d1".to_string()]).unwrap(), Some(2));
        assert_eq!(store.max_seq_num(&["d2".to_string()]).unwrap(), None);
        assert_eq!(store.max_seq_num(&[]).unwrap(), None);
    }

    #[test]
    fn test_event_table_last_wins_dedup() {
        let store = populated();
        // A rewrite of seq 1 with a later time supersedes the original.
        store.insert_event(event("e1b", "d1", 1, 1.9, 15.0));
        let table = store
            .event_table("d1", &["x".to_string()], 1..3)
            .unwrap();
        assert_eq!(table.seq_nums, vec![1, 2]);
        assert_eq!(table.data["x"], vec![json!(15.0), json!(20.0)]);
        assert_eq!(table.uids, vec!["e1b", "e2"]);
    }

    #[test]
    fn test_event_table_row_range() {
        let store = populated();
        let table = store.event_table("d1", &[], 2..3).unwrap();
        assert_eq!(table.seq_nums, vec![2]);
        assert_eq!(table.data["x"], vec![json!(20.0)]);
    }

    #[test]
    fn test_event_table_empty_descriptor() {
        let store = populated();
        let table = store.event_table("d2", &[], 1..100).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_resource_datum_round_trip() {
        let store = MemoryStore::new();
        let resource: Resource = serde_json::from_value(json!({
            "uid": "res-1",
            "spec": "AD_HDF5",
            "resource_path": "f.h5"
        }))
        .unwrap();
        let id = store.insert_resource(resource).unwrap();
        assert_eq!(id, "res-1");

        for i in 0..3 {
            store.insert_datum(Datum {
                datum_id: format!("res-1/{}", i),
                resource: "res-1".to_string(),
                datum_kwargs: Default::default(),
            });
        }
        assert!(store.find_resource("res-1").unwrap().is_some());
        assert!(store.find_datum("res-1/1").unwrap().is_some());
        assert_eq!(store.datums_for_resource("res-1").unwrap().len(), 3);
        assert!(store.datums_for_resource("res-9").unwrap().is_empty());
    }

    #[test]
    fn test_insert_resource_without_identity_fails() {
        let store = MemoryStore::new();
        let resource: Resource = serde_json::from_value(json!({
            "spec": "AD_HDF5",
            "resource_path": "f.h5"
        }))
        .unwrap();
        assert!(store.insert_resource(resource).is_err());
    }
}
