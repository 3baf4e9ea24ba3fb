//! Run assembly and canonical document export
//!
//! A run is the composition of one RunStart, zero-or-one RunStop, and a
//! lazily-built map of stream name to [`Stream`]. Runs are assembled on
//! cache miss, cached, and become immutable once a RunStop exists; they
//! are never explicitly destroyed, only evicted by cache expiry.
//!
//! The export path walks the run back out as its canonical document
//! sequence: one `start`, descriptors and events interleaved in time
//! order with each resource/datum emitted just before the first event
//! referencing it, and the optional `stop` last.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use beamcat_core::{
    Descriptor, Document, Error, Event, Overlay, Result, RunStart, RunStop,
};
use beamcat_store::DocumentStore;

use crate::batcher::DocumentBatcher;
use crate::lazy::LazyTable;
use crate::resolver::{ExternalResolver, HandlerRegistry};
use crate::stream::Stream;

/// Whether export resolves external references before emitting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Resolve external fields; resource/datum documents are suppressed
    /// because the consumer no longer needs them
    Yes,
    /// Leave datum ids in place and emit the resource/datum documents so
    /// the consumer can resolve them itself
    No,
}

/// One logical experiment run
pub struct Run {
    start: RunStart,
    stop: Option<RunStop>,
    overrides: Map<String, Value>,
    streams: LazyTable<Stream>,
    store: Arc<dyn DocumentStore>,
    handlers: HandlerRegistry,
}

/// Assemble a run from its RunStart
///
/// Looks up the (possibly absent) RunStop and the distinct stream names
/// declared by the run's descriptors. Streams themselves are built only
/// on first access.
pub(crate) fn assemble(
    store: Arc<dyn DocumentStore>,
    handlers: HandlerRegistry,
    overrides: Map<String, Value>,
    start: RunStart,
) -> Result<Run> {
    let stop = store.find_run_stop(&start.uid)?;
    let names = store.stream_names(&start.uid)?;
    debug!(
        target: "beamcat::run",
        run = %start.uid,
        complete = stop.is_some(),
        streams = names.len(),
        "assembled run"
    );

    let streams = {
        let store = store.clone();
        let handlers = handlers.clone();
        let run_uid = start.uid.clone();
        LazyTable::new(names, move |name| {
            Stream::assemble(store.clone(), &run_uid, name, handlers.clone())
        })
    };

    Ok(Run {
        start,
        stop,
        overrides,
        streams,
        store,
        handlers,
    })
}

impl Run {
    /// The run's identifier (its RunStart uid)
    pub fn uid(&self) -> &str {
        &self.start.uid
    }

    /// The opening document
    pub fn start(&self) -> &RunStart {
        &self.start
    }

    /// The closing document, when the run has finished
    pub fn stop(&self) -> Option<&RunStop> {
        self.stop.as_ref()
    }

    /// True once a RunStop exists; complete runs are immutable
    pub fn is_complete(&self) -> bool {
        self.stop.is_some()
    }

    /// Merged metadata view: the stored RunStart fields, shadowed by any
    /// configured overrides, never mutating the stored document
    pub fn metadata(&self) -> Result<Overlay> {
        let base = match serde_json::to_value(&self.start)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(Overlay::with_overrides(base, self.overrides.clone()))
    }

    /// Names of the run's streams, in first-declared order
    pub fn stream_names(&self) -> &[String] {
        self.streams.keys()
    }

    /// Fetch one stream, assembling it on first access
    pub fn stream(&self, name: &str) -> Result<Arc<Stream>> {
        match self.streams.get(name) {
            Some(stream) => stream,
            None => Err(Error::StreamNotFound {
                run: self.start.uid.clone(),
                stream: name.to_string(),
            }),
        }
    }

    /// The run's canonical document sequence
    ///
    /// One `start`; descriptors and events merged in time order (a
    /// descriptor precedes events sharing its timestamp); each
    /// resource/datum emitted immediately before the first event
    /// referencing it; the `stop` last when present.
    pub fn documents(&self, fill: FillMode) -> Result<Vec<Document>> {
        let descriptors = self.store.find_descriptors(&self.start.uid, None)?;
        let by_uid: HashMap<String, Descriptor> = descriptors
            .iter()
            .map(|d| (d.uid.clone(), d.clone()))
            .collect();

        enum Entry {
            Descriptor(Descriptor),
            Event(Event),
        }
        let mut timeline: Vec<(f64, u8, Entry)> = Vec::new();
        for descriptor in descriptors {
            let events = self.store.events_for_descriptor(&descriptor.uid)?;
            timeline.push((descriptor.time, 0, Entry::Descriptor(descriptor)));
            for event in events {
                timeline.push((event.time, 1, Entry::Event(event)));
            }
        }
        timeline.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });

        let mut resolver = ExternalResolver::new(self.store.clone(), self.handlers.clone());
        let mut emitted_resources: HashSet<String> = HashSet::new();
        let mut emitted_datums: HashSet<String> = HashSet::new();

        let mut out: Vec<Document> = Vec::with_capacity(timeline.len() + 2);
        out.push(Document::Start(self.start.clone()));
        for (_, _, entry) in timeline {
            match entry {
                Entry::Descriptor(descriptor) => {
                    out.push(Document::Descriptor(descriptor));
                }
                Entry::Event(event) => {
                    let descriptor = by_uid.get(&event.descriptor).ok_or_else(|| {
                        Error::Store(format!(
                            "event {} references unknown descriptor {}",
                            event.uid, event.descriptor
                        ))
                    })?;
                    match fill {
                        FillMode::Yes => {
                            out.push(Document::Event(resolver.fill(&event, descriptor)?));
                        }
                        FillMode::No => {
                            self.emit_references(
                                &event,
                                descriptor,
                                &mut emitted_resources,
                                &mut emitted_datums,
                                &mut out,
                            )?;
                            out.push(Document::Event(event));
                        }
                    }
                }
            }
        }
        if let Some(stop) = &self.stop {
            out.push(Document::Stop(stop.clone()));
        }
        Ok(out)
    }

    /// The canonical sequence re-paged into bounded event_page and
    /// datum_page documents
    pub fn paged_documents(&self, fill: FillMode, page_size: usize) -> Result<Vec<Document>> {
        let documents = self.documents(fill)?;
        Ok(DocumentBatcher::new(documents.into_iter(), page_size).collect())
    }

    /// Emit the resource/datum documents an event depends on, once each
    fn emit_references(
        &self,
        event: &Event,
        descriptor: &Descriptor,
        emitted_resources: &mut HashSet<String>,
        emitted_datums: &mut HashSet<String>,
        out: &mut Vec<Document>,
    ) -> Result<()> {
        for field in descriptor.external_fields() {
            let datum_id = match event.data.get(field).and_then(|v| v.as_str()) {
                Some(id) => id,
                None => continue,
            };
            if emitted_datums.contains(datum_id) {
                continue;
            }
            let datum = self
                .store
                .find_datum(datum_id)?
                .ok_or_else(|| Error::DatumNotFound(datum_id.to_string()))?;
            if !emitted_resources.contains(&datum.resource) {
                let resource = self
                    .store
                    .find_resource(&datum.resource)?
                    .ok_or_else(|| Error::ResourceNotFound(datum.resource.clone()))?;
                emitted_resources.insert(datum.resource.clone());
                out.push(Document::Resource(resource));
            }
            emitted_datums.insert(datum_id.to_string());
            out.push(Document::Datum(datum));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("uid", &self.start.uid)
            .field("complete", &self.is_complete())
            .field("streams", &self.streams.keys())
            .finish()
    }
}
