//! Core types for the beamcat catalog
//!
//! This crate defines the foundational types used throughout the system:
//! - The six stored document kinds (RunStart, RunStop, Descriptor, Event,
//!   Resource, Datum) and the two columnar page kinds
//! - DocumentKind: stable kind names at the wire boundary
//! - Filter/Predicate/SortKey: the query surface the catalog compiles to
//! - Overlay: read-only merged metadata view
//! - Error: the error taxonomy for the read layer

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod documents;
pub mod error;
pub mod filter;
pub mod overlay;

pub use documents::{
    Configuration, DataKey, Datum, DatumPage, DefaultResourceId, Descriptor, Document,
    DocumentKind, Dtype, Event, EventPage, ExitStatus, Resource, ResourceIdResolver, RunStart,
    RunStop,
};
pub use error::{Error, Result};
pub use filter::{cmp_values, Filter, Predicate, SeekKey, SortKey, SortOrder};
pub use overlay::Overlay;
