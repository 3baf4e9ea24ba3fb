//! On-demand resolution of externally-stored field values
//!
//! An event's external fields hold datum ids instead of inline values.
//! The resolver replaces those ids with real values by locating the
//! owning Resource, bulk-registering every Datum of that Resource in one
//! fetch, and handing the (resource, datum) pair to a format handler.
//!
//! Resolution is an iterative retry loop, not recursion: attempt the
//! fill, register the one Resource blocking it, retry. The cycle guard
//! raises when the same datum id is unresolvable twice in a row, which
//! means a missing or corrupt Resource/Datum rather than a transient gap.
//! Resolution is idempotent and re-entrant; an abandoned fill leaves no
//! inconsistent state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use beamcat_core::{Datum, Descriptor, Error, Event, Resource, Result};
use beamcat_store::DocumentStore;

// ============================================================================
// Handlers
// ============================================================================

/// Reads one externally-stored value out of its container
///
/// Implementations are format-specific (one per resource `spec` string)
/// and must be pure reads: the same (resource, datum) pair always yields
/// the same value.
pub trait ExternalHandler: Send + Sync {
    /// Produce the value the datum points at
    fn read(&self, resource: &Resource, datum: &Datum) -> Result<Value>;
}

/// Registry mapping resource spec strings to handlers
///
/// Explicit configuration passed to the catalog constructor; there is no
/// process-wide handler state. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn ExternalHandler>>>>,
}

impl HandlerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a resource spec, replacing any previous one
    pub fn register(&self, spec: impl Into<String>, handler: Arc<dyn ExternalHandler>) {
        self.handlers.write().insert(spec.into(), handler);
    }

    /// Handler for a spec, if registered
    pub fn get(&self, spec: &str) -> Option<Arc<dyn ExternalHandler>> {
        self.handlers.read().get(spec).cloned()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let specs: Vec<String> = self.handlers.read().keys().cloned().collect();
        f.debug_struct("HandlerRegistry").field("specs", &specs).finish()
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Resolves external field values with per-resource amortization
///
/// Registered Resources and Datums persist for the life of the resolver,
/// so filling many events against the same resource costs one Resource
/// fetch plus one bulk Datum fetch in total.
pub struct ExternalResolver {
    store: Arc<dyn DocumentStore>,
    handlers: HandlerRegistry,
    resources: HashMap<String, Resource>,
    datums: HashMap<String, Datum>,
}

impl ExternalResolver {
    /// Resolver over `store` using `handlers` for the actual reads
    pub fn new(store: Arc<dyn DocumentStore>, handlers: HandlerRegistry) -> Self {
        ExternalResolver {
            store,
            handlers,
            resources: HashMap::new(),
            datums: HashMap::new(),
        }
    }

    /// Number of resources registered so far
    pub fn registered_resources(&self) -> usize {
        self.resources.len()
    }

    /// Replace every external field value of `event` with its resolved
    /// value. Non-external fields pass through untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::UnresolvableReference`] when a datum id stays
    ///   unresolvable across two consecutive attempts
    /// - [`Error::ResourceNotFound`] when a datum's resource record is
    ///   absent
    /// - [`Error::Store`] when an external field value is not a datum id
    ///   string, or no handler is registered for a resource spec
    pub fn fill(&mut self, event: &Event, descriptor: &Descriptor) -> Result<Event> {
        let external_fields = descriptor.external_fields();
        if external_fields.is_empty() {
            return Ok(event.clone());
        }

        // Every external value must be a datum id string.
        let mut datum_ids: Vec<(String, String)> = Vec::new();
        for field in external_fields {
            let value = event.data.get(field).and_then(|v| v.as_str()).ok_or_else(|| {
                Error::Store(format!(
                    "external field '{}' of event {} does not hold a datum id",
                    field, event.uid
                ))
            })?;
            datum_ids.push((field.to_string(), value.to_string()));
        }

        // Retry loop: register the one resource blocking the fill, then
        // try again. Same id blocking twice in a row means the backing
        // records are missing, not still inbound.
        let mut last_missing: Option<String> = None;
        loop {
            let missing = datum_ids
                .iter()
                .map(|(_, id)| id)
                .find(|id| !self.datums.contains_key(*id));
            let missing = match missing {
                None => break,
                Some(id) => id.clone(),
            };
            if last_missing.as_deref() == Some(missing.as_str()) {
                return Err(Error::UnresolvableReference(missing));
            }
            self.register_resource_for(&missing)?;
            last_missing = Some(missing);
        }

        let mut filled = event.clone();
        for (field, datum_id) in &datum_ids {
            let value = self.read_registered(datum_id)?;
            filled.data.insert(field.clone(), value);
        }
        Ok(filled)
    }

    /// Resolve one datum id to its value
    ///
    /// Columnar reads use this directly, one call per external cell; the
    /// per-resource registries make every call after the first for a
    /// given resource a pure map lookup.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`ExternalResolver::fill`]; an id whose backing
    /// records cannot be registered raises
    /// [`Error::UnresolvableReference`] after one registration attempt.
    pub fn resolve(&mut self, datum_id: &str) -> Result<Value> {
        if !self.datums.contains_key(datum_id) {
            self.register_resource_for(datum_id)?;
            if !self.datums.contains_key(datum_id) {
                return Err(Error::UnresolvableReference(datum_id.to_string()));
            }
        }
        self.read_registered(datum_id)
    }

    /// Locate the Resource owning `datum_id` and register it along with
    /// every Datum it owns (one bulk fetch)
    ///
    /// Fast path: the `/`-delimited prefix of the id names the resource.
    /// When that fails validation against the store, fall back to a Datum
    /// lookup by id. A dead end registers nothing; the caller's retry
    /// loop then trips the cycle guard.
    fn register_resource_for(&mut self, datum_id: &str) -> Result<()> {
        let mut resource_id: Option<String> = None;

        if let Some((prefix, _)) = datum_id.split_once('/') {
            if self.store.find_resource(prefix)?.is_some() {
                resource_id = Some(prefix.to_string());
            }
        }
        if resource_id.is_none() {
            if let Some(datum) = self.store.find_datum(datum_id)? {
                resource_id = Some(datum.resource);
            }
        }
        let resource_id = match resource_id {
            Some(id) => id,
            None => return Ok(()),
        };

        let resource = match self.store.find_resource(&resource_id)? {
            Some(r) => r,
            None => return Ok(()),
        };
        let datums = self.store.datums_for_resource(&resource_id)?;
        debug!(
            target: "beamcat::resolver",
            resource = %resource_id,
            datums = datums.len(),
            "registered resource"
        );
        self.resources.insert(resource_id, resource);
        for datum in datums {
            self.datums.insert(datum.datum_id.clone(), datum);
        }
        Ok(())
    }

    /// Read a value through the handler for an already-registered datum
    fn read_registered(&self, datum_id: &str) -> Result<Value> {
        let datum = self
            .datums
            .get(datum_id)
            .ok_or_else(|| Error::DatumNotFound(datum_id.to_string()))?;
        let resource = self
            .resources
            .get(&datum.resource)
            .ok_or_else(|| Error::ResourceNotFound(datum.resource.clone()))?;
        let handler = self.handlers.get(&resource.spec).ok_or_else(|| {
            Error::Store(format!("no handler registered for spec '{}'", resource.spec))
        })?;
        handler.read(resource, datum)
    }
}
