//! On-demand columnar views over one stream
//!
//! Each stream exposes four sub-views: `data` (measurement values, with
//! external resolution and shape repair), `timestamps` (per-field reading
//! times), and `config`/`config_timestamps` (one row per descriptor from
//! its configuration blocks). Views are materialized from Events and
//! Descriptors at read time and never persisted.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;

use beamcat_core::{Descriptor, Error, Result};
use beamcat_store::DocumentStore;

use crate::resolver::{ExternalResolver, HandlerRegistry};
use crate::shape;

/// Field name -> column of row values, all columns the same length
pub type Columns = BTreeMap<String, Vec<Value>>;

/// The four sub-views of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetKind {
    /// Measurement values
    Data,
    /// Per-field reading timestamps
    Timestamps,
    /// Configuration readings, one row per descriptor
    Config,
    /// Configuration reading timestamps, one row per descriptor
    ConfigTimestamps,
}

impl DatasetKind {
    /// Every kind, in canonical order
    pub const ALL: [DatasetKind; 4] = [
        DatasetKind::Data,
        DatasetKind::Timestamps,
        DatasetKind::Config,
        DatasetKind::ConfigTimestamps,
    ];

    /// Key under which the view is exposed
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Data => "data",
            DatasetKind::Timestamps => "timestamps",
            DatasetKind::Config => "config",
            DatasetKind::ConfigTimestamps => "config_timestamps",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "data" => Ok(DatasetKind::Data),
            "timestamps" => Ok(DatasetKind::Timestamps),
            "config" => Ok(DatasetKind::Config),
            "config_timestamps" => Ok(DatasetKind::ConfigTimestamps),
            other => Err(Error::Store(format!("unknown dataset view '{}'", other))),
        }
    }
}

/// One materializable sub-view of a stream
pub struct Dataset {
    kind: DatasetKind,
    stream_name: String,
    descriptors: Arc<Vec<Descriptor>>,
    cutoff: u64,
    store: Arc<dyn DocumentStore>,
    handlers: HandlerRegistry,
}

impl Dataset {
    pub(crate) fn new(
        kind: DatasetKind,
        stream_name: String,
        descriptors: Arc<Vec<Descriptor>>,
        cutoff: u64,
        store: Arc<dyn DocumentStore>,
        handlers: HandlerRegistry,
    ) -> Self {
        Dataset {
            kind,
            stream_name,
            descriptors,
            cutoff,
            store,
            handlers,
        }
    }

    /// Which of the four views this is
    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    /// Materialize columns for the requested fields and row range
    ///
    /// `fields: None` reads every declared field. `rows: None` reads the
    /// whole half-open `[1, cutoff)` range; an explicit range is clipped
    /// to it. Results from the stream's descriptors are concatenated in
    /// descriptor time order. Row ranges do not apply to the config
    /// views, which have exactly one row per descriptor.
    pub fn read(&self, fields: Option<&[String]>, rows: Option<Range<u64>>) -> Result<Columns> {
        match self.kind {
            DatasetKind::Data => self.read_events(fields, rows, true),
            DatasetKind::Timestamps => self.read_events(fields, rows, false),
            DatasetKind::Config => self.read_config(fields, false),
            DatasetKind::ConfigTimestamps => self.read_config(fields, true),
        }
    }

    /// Fields declared for this stream, in declaration order
    fn declared_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        for descriptor in self.descriptors.iter() {
            for field in descriptor.data_keys.keys() {
                if !fields.contains(field) {
                    fields.push(field.clone());
                }
            }
        }
        fields
    }

    fn clip(&self, rows: Option<Range<u64>>) -> Range<u64> {
        let full = 1..self.cutoff.max(1);
        match rows {
            None => full,
            Some(range) => {
                let start = range.start.max(full.start);
                let end = range.end.min(full.end);
                start..end.max(start)
            }
        }
    }

    fn read_events(
        &self,
        fields: Option<&[String]>,
        rows: Option<Range<u64>>,
        values: bool,
    ) -> Result<Columns> {
        let fields: Vec<String> = match fields {
            Some(requested) => {
                for field in requested {
                    if !self
                        .descriptors
                        .iter()
                        .any(|d| d.data_keys.contains_key(field))
                    {
                        return Err(Error::Store(format!(
                            "field '{}' not declared in stream '{}'",
                            field, self.stream_name
                        )));
                    }
                }
                requested.to_vec()
            }
            None => self.declared_fields(),
        };
        let range = self.clip(rows);

        let mut resolver = ExternalResolver::new(self.store.clone(), self.handlers.clone());
        let mut out: Columns = fields.iter().map(|f| (f.clone(), Vec::new())).collect();

        for descriptor in self.descriptors.iter() {
            let table = self.store.event_table(&descriptor.uid, &fields, range.clone())?;
            for field in &fields {
                let column = out.entry(field.clone()).or_default();
                if values {
                    let data_key = descriptor.data_keys.get(field);
                    let raw = table.data.get(field).cloned().unwrap_or_default();
                    for value in raw {
                        column.push(self.finish_value(field, value, data_key, &mut resolver)?);
                    }
                } else {
                    let stamps = table.timestamps.get(field).cloned().unwrap_or_default();
                    for stamp in stamps {
                        column.push(float_value(stamp));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Resolve external references and enforce declared shapes on one cell
    fn finish_value(
        &self,
        field: &str,
        value: Value,
        data_key: Option<&beamcat_core::DataKey>,
        resolver: &mut ExternalResolver,
    ) -> Result<Value> {
        let data_key = match data_key {
            Some(k) => k,
            None => return Ok(value),
        };
        let value = if data_key.is_external() {
            let datum_id = value.as_str().ok_or_else(|| {
                Error::Store(format!(
                    "external field '{}' in stream '{}' does not hold a datum id",
                    field, self.stream_name
                ))
            })?;
            resolver.resolve(datum_id)?
        } else {
            value
        };
        if data_key.is_scalar() {
            Ok(value)
        } else {
            shape::conform(field, value, &data_key.shape)
        }
    }

    fn read_config(&self, fields: Option<&[String]>, timestamps: bool) -> Result<Columns> {
        // Union of configuration fields across descriptors and objects,
        // in declaration order.
        let mut all_fields: Vec<String> = Vec::new();
        for descriptor in self.descriptors.iter() {
            for config in descriptor.configuration.values() {
                let names: Vec<&String> = if timestamps {
                    config.timestamps.keys().collect()
                } else {
                    config.data.keys().collect()
                };
                for name in names {
                    if !all_fields.contains(name) {
                        all_fields.push(name.clone());
                    }
                }
            }
        }
        let fields: Vec<String> = match fields {
            Some(requested) => requested.to_vec(),
            None => all_fields,
        };

        let mut out: Columns = fields.iter().map(|f| (f.clone(), Vec::new())).collect();
        for descriptor in self.descriptors.iter() {
            for field in &fields {
                let cell = descriptor
                    .configuration
                    .values()
                    .find_map(|config| {
                        if timestamps {
                            config.timestamps.get(field).map(|t| float_value(*t))
                        } else {
                            config.data.get(field).cloned()
                        }
                    })
                    .unwrap_or(Value::Null);
                if let Some(column) = out.get_mut(field) {
                    column.push(cell);
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("kind", &self.kind)
            .field("stream", &self.stream_name)
            .field("descriptors", &self.descriptors.len())
            .field("cutoff", &self.cutoff)
            .finish()
    }
}

/// JSON number from a float; non-finite readings degrade to null
fn float_value(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
