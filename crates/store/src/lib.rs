//! Document store backends for the beamcat catalog
//!
//! Defines the [`DocumentStore`] contract the catalog queries against and
//! ships [`MemoryStore`], an in-memory reference backend used by every
//! test suite and as the fixture write surface.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::{DocumentStore, EventTable};
