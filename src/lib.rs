//! Beamcat - read-side catalog over a flat experiment document store
//!
//! Beamcat reconstructs logical experiment runs from six flat document kinds
//! (RunStart, RunStop, Descriptor, Event, Resource, Datum), caches the
//! assembled runs, and pages through unbounded result sets with keyset
//! pagination.
//!
//! # Quick Start
//!
//! ```ignore
//! use beamcat::{Catalog, CatalogConfig, MemoryStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let catalog = Catalog::new(store, CatalogConfig::default());
//!
//! // Fetch a run and read its primary stream
//! let run = catalog.get("run-uid")?;
//! let stream = run.stream("primary")?;
//! let columns = stream.dataset("data")?.read(None, None)?;
//! ```
//!
//! # Architecture
//!
//! The [`Catalog`] is the root object: lookups go through the run cache to
//! the assemblers, which query the backing [`DocumentStore`]. Export and
//! replay go through the document batcher. Internal crates (core document
//! model, store backends) are re-exported here for convenience.

pub use beamcat_catalog::*;
pub use beamcat_core::{Document, DocumentKind, Error, Filter, Predicate, Result};
pub use beamcat_store::{DocumentStore, MemoryStore};
