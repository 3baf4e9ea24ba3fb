//! Smoke test for the top-level facade: everything a typical consumer
//! touches is reachable from the `beamcat` crate root.

use std::sync::Arc;

use serde_json::json;

use beamcat::{Catalog, CatalogConfig, Error, Filter, MemoryStore};

#[test]
fn test_catalog_round_trip_through_facade() {
    let store = Arc::new(MemoryStore::new());
    store.insert_run_start(
        serde_json::from_value(json!({
            "uid": "r1",
            "time": 100.0,
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
            "data_keys": { "motor": {"dtype": "number", "shape": []} }
        }))
        .unwrap(),
    );

    let catalog = Catalog::new(store, CatalogConfig::default());
    assert_eq!(catalog.len().unwrap(), 1);

    let run = catalog.get("r1").unwrap();
    assert_eq!(run.stream_names(), ["primary"]);
    assert_eq!(run.stream("primary").unwrap().cutoff(), 1);

    let empty = catalog.search(Filter::uid("other")).unwrap();
    assert!(matches!(empty.get("r1"), Err(Error::RunNotFound(_))));
}
