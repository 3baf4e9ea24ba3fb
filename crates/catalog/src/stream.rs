//! Stream assembly
//!
//! A stream is the set of descriptors sharing one name within a run,
//! plus the row-count boundary every dataset in the stream shares: the
//! cutoff, `1 + max(seq_num)` over the stream's events, with rows
//! numbered in the half-open range `[1, cutoff)`.
//!
//! The cutoff is computed fresh on every stream assembly and never
//! carried across rebuilds of the same run: a partial run's cutoff grows
//! as events arrive, so a re-assembled stream may see more rows than its
//! predecessor, never fewer.

use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use beamcat_core::{Descriptor, Error, Result};
use beamcat_store::DocumentStore;

use crate::dataset::{Dataset, DatasetKind};
use crate::lazy::LazyTable;
use crate::resolver::HandlerRegistry;

/// One named measurement stream within a run
pub struct Stream {
    name: String,
    run_start: String,
    descriptors: Arc<Vec<Descriptor>>,
    cutoff: u64,
    datasets: LazyTable<Dataset>,
}

impl Stream {
    /// Assemble the stream named `name` within run `run_start_uid`
    ///
    /// A stream with zero descriptors is never constructed: stream names
    /// are derived from existing descriptors, so an empty set here means
    /// the caller asked for a stream the run does not have.
    pub(crate) fn assemble(
        store: Arc<dyn DocumentStore>,
        run_start_uid: &str,
        name: &str,
        handlers: HandlerRegistry,
    ) -> Result<Stream> {
        let descriptors = store.find_descriptors(run_start_uid, Some(name))?;
        if descriptors.is_empty() {
            return Err(Error::StreamNotFound {
                run: run_start_uid.to_string(),
                stream: name.to_string(),
            });
        }
        let descriptor_uids: Vec<String> =
            descriptors.iter().map(|d| d.uid.clone()).collect();
        let cutoff = 1 + store.max_seq_num(&descriptor_uids)?.unwrap_or(0);
        debug!(
            target: "beamcat::stream",
            run = %run_start_uid,
            stream = %name,
            descriptors = descriptors.len(),
            cutoff,
            "assembled stream"
        );

        let descriptors = Arc::new(descriptors);
        let datasets = {
            let store = store.clone();
            let descriptors = descriptors.clone();
            let stream_name = name.to_string();
            LazyTable::new(
                DatasetKind::ALL.iter().map(|k| k.as_str().to_string()).collect(),
                move |key| {
                    let kind = DatasetKind::from_str(key)?;
                    Ok(Dataset::new(
                        kind,
                        stream_name.clone(),
                        descriptors.clone(),
                        cutoff,
                        store.clone(),
                        handlers.clone(),
                    ))
                },
            )
        };

        Ok(Stream {
            name: name.to_string(),
            run_start: run_start_uid.to_string(),
            descriptors,
            cutoff,
            datasets,
        })
    }

    /// Stream name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Uid of the owning run
    pub fn run_start(&self) -> &str {
        &self.run_start
    }

    /// The stream's descriptors in creation-time order
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    /// Exclusive upper bound on row numbers: `1 + max(seq_num)`, or 1
    /// when the stream has no events yet
    pub fn cutoff(&self) -> u64 {
        self.cutoff
    }

    /// One of the four sub-views (`data`, `timestamps`, `config`,
    /// `config_timestamps`), built on first access
    pub fn dataset(&self, key: &str) -> Result<Arc<Dataset>> {
        // Parse first so an unknown key reports itself rather than
        // falling through as an absent table entry.
        DatasetKind::from_str(key)?;
        match self.datasets.get(key) {
            Some(dataset) => dataset,
            None => Err(Error::Store(format!("unknown dataset view '{}'", key))),
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("name", &self.name)
            .field("run_start", &self.run_start)
            .field("descriptors", &self.descriptors.len())
            .field("cutoff", &self.cutoff)
            .finish()
    }
}
