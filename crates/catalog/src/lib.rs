//! Read-side run assembly, caching, and pagination
//!
//! This crate turns the flat documents behind a [`beamcat_store::DocumentStore`]
//! into navigable [`Run`]s: filtered catalog views with keyset pagination,
//! lazily-assembled streams and datasets, external reference resolution,
//! shape repair, a two-tier TTL run cache, and canonical document export
//! with bounded re-paging.
//!
//! Everything here is derived state. Nothing in this crate writes to the
//! store; staleness is bounded by cache TTLs alone.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod batcher;
mod cache;
mod catalog;
mod config;
mod dataset;
mod lazy;
mod resolver;
mod run;
pub mod shape;
mod stream;

pub use batcher::DocumentBatcher;
pub use cache::{RunCache, TtlCache};
pub use catalog::{Catalog, Pages};
pub use config::{
    CatalogConfig, DEFAULT_BATCH_SIZE, DEFAULT_COMPLETE_CAPACITY, DEFAULT_COMPLETE_TTL,
    DEFAULT_PAGE_SIZE, DEFAULT_PARTIAL_CAPACITY, DEFAULT_PARTIAL_TTL,
};
pub use dataset::{Columns, Dataset, DatasetKind};
pub use lazy::LazyTable;
pub use resolver::{ExternalHandler, ExternalResolver, HandlerRegistry};
pub use run::{FillMode, Run};
pub use stream::Stream;
