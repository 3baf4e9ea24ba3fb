//! End-to-end assembly tests: store documents in flat form, read them
//! back as runs, streams, and datasets.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use beamcat_catalog::{Catalog, CatalogConfig, DocumentBatcher, ExternalHandler, FillMode};
use beamcat_core::{Datum, Document, DocumentKind, Error, Event, Resource, Result};
use beamcat_store::MemoryStore;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("beamcat=trace")
        .with_test_writer()
        .try_init();
}

/// Handler that reads the datum's "index" kwarg and returns it as a
/// two-element row, matching the declared [2] shape
struct IndexHandler;

impl ExternalHandler for IndexHandler {
    fn read(&self, _resource: &Resource, datum: &Datum) -> Result<Value> {
        let index = datum
            .datum_kwargs
            .get("index")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(json!([index, index]))
    }
}

fn event(
    uid: &str,
    descriptor: &str,
    seq_num: u64,
    time: f64,
    data: Vec<(&str, Value)>,
) -> Event {
    let data: BTreeMap<String, Value> =
        data.into_iter().map(|(f, v)| (f.to_string(), v)).collect();
    let timestamps = data.keys().map(|f| (f.clone(), time)).collect();
    Event {
        uid: uid.to_string(),
        descriptor: descriptor.to_string(),
        time,
        seq_num,
        data,
        timestamps,
    }
}

/// One run, one "primary" descriptor, three events with a duplicated
/// seq_num, and an external image field backed by one resource.
///
/// seq_num 1 is written twice (t=101.0 then t=101.5); the later write
/// wins in every dataset view.
fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();

    store.insert_run_start(
        serde_json::from_value(json!({
            "uid": "r1",
            "time": 100.0,
            "scan_id": 42,
            "plan_name": "count"
        }))
        .unwrap(),
    );
    store.insert_descriptor(
        serde_json::from_value(json!({
            "uid": "d1",
            "run_start": "r1",
            "name": "primary",
            "time": 100.5,
            "data_keys": {
                "motor": {"dtype": "number", "shape": []},
                "spectrum": {"dtype": "array", "shape": [3]},
                "image": {"dtype": "array", "shape": [2], "external": "FILESTORE:"}
            },
            "configuration": {
                "camera": {
                    "data": {"gain": 2},
                    "timestamps": {"gain": 100.4}
                }
            }
        }))
        .unwrap(),
    );

    store.insert_event(event(
        "e1",
        "d1",
        1,
        101.0,
        vec![
            ("motor", json!(10.0)),
            ("spectrum", json!([1, 2, 3])),
            ("image", json!("res-1/0")),
        ],
    ));
    // Re-written row: same seq_num, later time. This one survives.
    store.insert_event(event(
        "e1b",
        "d1",
        1,
        101.5,
        vec![
            ("motor", json!(11.0)),
            ("spectrum", json!([1, 2])), // one short; padded to [3]
            ("image", json!("res-1/0")),
        ],
    ));
    store.insert_event(event(
        "e2",
        "d1",
        2,
        102.0,
        vec![
            ("motor", json!(20.0)),
            ("spectrum", json!([9, 9, 9, 9])), // one long; trimmed to [3]
            ("image", json!("res-1/1")),
        ],
    ));

    store
        .insert_resource(
            serde_json::from_value(json!({
                "uid": "res-1",
                "spec": "TEST",
                "resource_path": "images.dat",
                "run_start": "r1"
            }))
            .unwrap(),
        )
        .unwrap();
    for i in 0..2 {
        store.insert_datum(Datum {
            datum_id: format!("res-1/{}", i),
            resource: "res-1".to_string(),
            datum_kwargs: serde_json::from_value(json!({"index": i})).unwrap(),
        });
    }

    Arc::new(store)
}

fn catalog_over(store: Arc<MemoryStore>) -> Catalog {
    let config = CatalogConfig::default();
    config.handlers.register("TEST", Arc::new(IndexHandler));
    Catalog::new(store, config)
}

#[test]
fn test_cutoff_and_latest_wins() {
    init_tracing();
    let catalog = catalog_over(seeded_store());
    let run = catalog.get("r1").unwrap();
    let stream = run.stream("primary").unwrap();

    // max seq_num is 2, so rows cover the half-open [1, 3).
    assert_eq!(stream.cutoff(), 3);

    let data = stream.dataset("data").unwrap();
    let columns = data.read(Some(&["motor".to_string()]), None).unwrap();
    assert_eq!(columns["motor"], vec![json!(11.0), json!(20.0)]);
}

#[test]
fn test_shape_repair_within_tolerance() {
    let catalog = catalog_over(seeded_store());
    let run = catalog.get("r1").unwrap();
    let data = run.stream("primary").unwrap().dataset("data").unwrap();

    let columns = data.read(Some(&["spectrum".to_string()]), None).unwrap();
    assert_eq!(
        columns["spectrum"],
        vec![json!([1, 2, 2]), json!([9, 9, 9])]
    );
}

#[test]
fn test_external_field_resolved_on_read() {
    let catalog = catalog_over(seeded_store());
    let run = catalog.get("r1").unwrap();
    let data = run.stream("primary").unwrap().dataset("data").unwrap();

    let columns = data.read(Some(&["image".to_string()]), None).unwrap();
    assert_eq!(columns["image"], vec![json!([0, 0]), json!([1, 1])]);
}

#[test]
fn test_row_range_is_clipped_to_cutoff() {
    let catalog = catalog_over(seeded_store());
    let run = catalog.get("r1").unwrap();
    let data = run.stream("primary").unwrap().dataset("data").unwrap();

    let columns = data
        .read(Some(&["motor".to_string()]), Some(1..2))
        .unwrap();
    assert_eq!(columns["motor"], vec![json!(11.0)]);

    // A range reaching past the cutoff is clipped, not an error.
    let columns = data
        .read(Some(&["motor".to_string()]), Some(2..100))
        .unwrap();
    assert_eq!(columns["motor"], vec![json!(20.0)]);
}

#[test]
fn test_timestamps_dataset() {
    let catalog = catalog_over(seeded_store());
    let run = catalog.get("r1").unwrap();
    let stamps = run
        .stream("primary")
        .unwrap()
        .dataset("timestamps")
        .unwrap();

    let columns = stamps.read(Some(&["motor".to_string()]), None).unwrap();
    assert_eq!(columns["motor"], vec![json!(101.5), json!(102.0)]);
}

#[test]
fn test_config_datasets_one_row_per_descriptor() {
    let catalog = catalog_over(seeded_store());
    let run = catalog.get("r1").unwrap();
    let stream = run.stream("primary").unwrap();

    let config = stream.dataset("config").unwrap().read(None, None).unwrap();
    assert_eq!(config["gain"], vec![json!(2)]);

    let stamps = stream
        .dataset("config_timestamps")
        .unwrap()
        .read(None, None)
        .unwrap();
    assert_eq!(stamps["gain"], vec![json!(100.4)]);
}

#[test]
fn test_unknown_stream_and_field_are_errors() {
    let catalog = catalog_over(seeded_store());
    let run = catalog.get("r1").unwrap();

    assert!(matches!(
        run.stream("baseline"),
        Err(Error::StreamNotFound { .. })
    ));

    let data = run.stream("primary").unwrap().dataset("data").unwrap();
    assert!(data.read(Some(&["nonexistent".to_string()]), None).is_err());
}

#[test]
fn test_cutoff_grows_with_new_events() {
    let store = seeded_store();
    let catalog = catalog_over(store.clone());
    let before = catalog
        .get("r1")
        .unwrap()
        .stream("primary")
        .unwrap()
        .cutoff();

    store.insert_event(event("e7", "d1", 7, 107.0, vec![("motor", json!(70.0))]));

    // A fresh catalog (fresh cache) re-assembles and sees more rows.
    let reread = catalog_over(store)
        .get("r1")
        .unwrap()
        .stream("primary")
        .unwrap()
        .cutoff();
    assert!(reread > before);
    assert_eq!(reread, 8);
}

#[test]
fn test_metadata_overrides_shadow_without_mutating() {
    let store = seeded_store();
    let mut config = CatalogConfig::default();
    config.overrides.insert("r1".to_string(), {
        let mut map = serde_json::Map::new();
        map.insert("plan_name".to_string(), json!("corrected"));
        map
    });
    let catalog = Catalog::new(store.clone(), config);

    let run = catalog.get("r1").unwrap();
    let metadata = run.metadata().unwrap();
    assert_eq!(metadata.get("plan_name"), Some(&json!("corrected")));
    assert_eq!(metadata.get("scan_id"), Some(&json!(42)));

    // The stored document itself is untouched.
    assert_eq!(
        run.start().extra.get("plan_name"),
        Some(&json!("count"))
    );
}

#[test]
fn test_run_completion_and_cache_tiers() {
    let store = seeded_store();
    let catalog = catalog_over(store.clone());

    let run = catalog.get("r1").unwrap();
    assert!(!run.is_complete());
    assert_eq!(catalog.cache().partial_len(), 1);
    assert_eq!(catalog.cache().complete_len(), 0);

    store.insert_run_stop(
        serde_json::from_value(json!({
            "uid": "s1",
            "run_start": "r1",
            "time": 110.0,
            "exit_status": "success"
        }))
        .unwrap(),
    );

    // A fresh catalog sees the stop and caches in the complete tier.
    let catalog = catalog_over(store);
    let run = catalog.get("r1").unwrap();
    assert!(run.is_complete());
    assert_eq!(catalog.cache().complete_len(), 1);
    assert_eq!(catalog.cache().partial_len(), 0);
}

#[test]
fn test_documents_export_canonical_order() {
    let store = seeded_store();
    store.insert_run_stop(
        serde_json::from_value(json!({
            "uid": "s1",
            "run_start": "r1",
            "time": 110.0,
            "exit_status": "success"
        }))
        .unwrap(),
    );
    let catalog = catalog_over(store);
    let run = catalog.get("r1").unwrap();

    let documents = run.documents(FillMode::No).unwrap();
    let kinds: Vec<DocumentKind> = documents.iter().map(|d| d.kind()).collect();
    // Resource and datum land just before the first event referencing
    // them; the second datum id appears first at e2.
    assert_eq!(
        kinds,
        vec![
            DocumentKind::Start,
            DocumentKind::Descriptor,
            DocumentKind::Resource,
            DocumentKind::Datum, // res-1/0, referenced by e1
            DocumentKind::Event, // e1 (seq 1, t=101.0)
            DocumentKind::Event, // e1b (seq 1, t=101.5)
            DocumentKind::Datum, // res-1/1, referenced by e2
            DocumentKind::Event, // e2
            DocumentKind::Stop,
        ]
    );
}

#[test]
fn test_documents_export_filled_suppresses_references() {
    let catalog = catalog_over(seeded_store());
    let run = catalog.get("r1").unwrap();

    let documents = run.documents(FillMode::Yes).unwrap();
    let kinds: Vec<DocumentKind> = documents.iter().map(|d| d.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            DocumentKind::Start,
            DocumentKind::Descriptor,
            DocumentKind::Event,
            DocumentKind::Event,
            DocumentKind::Event,
        ]
    );
    // External values are inlined.
    match &documents[2] {
        Document::Event(e) => assert_eq!(e.data["image"], json!([0, 0])),
        other => panic!("expected event, got {:?}", other.kind()),
    }
}

#[test]
fn test_paged_export_bounds_page_size() {
    let catalog = catalog_over(seeded_store());
    let run = catalog.get("r1").unwrap();

    let paged = run.paged_documents(FillMode::Yes, 2).unwrap();
    let kinds: Vec<DocumentKind> = paged.iter().map(|d| d.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            DocumentKind::Start,
            DocumentKind::Descriptor,
            DocumentKind::EventPage, // e1, e1b
            DocumentKind::EventPage, // e2
        ]
    );
    match &paged[2] {
        Document::EventPage(page) => assert_eq!(page.len(), 2),
        other => panic!("expected event page, got {:?}", other.kind()),
    }
}

#[test]
fn test_export_round_trips_through_batcher() {
    let store = seeded_store();
    store.insert_run_stop(
        serde_json::from_value(json!({
            "uid": "s1",
            "run_start": "r1",
            "time": 110.0,
            "exit_status": "success"
        }))
        .unwrap(),
    );
    let catalog = catalog_over(store);
    let run = catalog.get("r1").unwrap();

    let flat = run.documents(FillMode::No).unwrap();
    let paged: Vec<Document> =
        DocumentBatcher::new(flat.clone().into_iter(), 100).collect();

    let mut unpacked = Vec::new();
    for document in paged {
        match document {
            Document::EventPage(page) => {
                unpacked.extend(page.unpack().into_iter().map(Document::Event));
            }
            Document::DatumPage(page) => {
                unpacked.extend(page.unpack().into_iter().map(Document::Datum));
            }
            other => unpacked.push(other),
        }
    }
    assert_eq!(unpacked, flat);
}
