//! The six stored document kinds plus the two page kinds
//!
//! Documents are immutable once written upstream; this layer never mutates
//! them. Free-form metadata beyond the required fields is captured with
//! `#[serde(flatten)]` into a `serde_json::Map`, so round-tripping a
//! document preserves everything the writer put there.
//!
//! Kind names at the boundary are stable strings: `start`, `stop`,
//! `descriptor`, `event`, `event_page`, `resource`, `datum`, `datum_page`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

// ============================================================================
// Kind names
// ============================================================================

/// Discriminates the eight document kinds at the wire boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// RunStart: opens a run's lifecycle
    Start,
    /// RunStop: closes a run; at most one per start
    Stop,
    /// Descriptor: schema declaration for a stream segment
    Descriptor,
    /// Event: one measurement row
    Event,
    /// EventPage: columnar batch of events sharing one descriptor
    EventPage,
    /// Resource: one external data container
    Resource,
    /// Datum: pointer into a resource
    Datum,
    /// DatumPage: columnar batch of datums sharing one resource
    DatumPage,
}

impl DocumentKind {
    /// Stable boundary name for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Start => "start",
            DocumentKind::Stop => "stop",
            DocumentKind::Descriptor => "descriptor",
            DocumentKind::Event => "event",
            DocumentKind::EventPage => "event_page",
            DocumentKind::Resource => "resource",
            DocumentKind::Datum => "datum",
            DocumentKind::DatumPage => "datum_page",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(DocumentKind::Start),
            "stop" => Ok(DocumentKind::Stop),
            "descriptor" => Ok(DocumentKind::Descriptor),
            "event" => Ok(DocumentKind::Event),
            "event_page" => Ok(DocumentKind::EventPage),
            "resource" => Ok(DocumentKind::Resource),
            "datum" => Ok(DocumentKind::Datum),
            "datum_page" => Ok(DocumentKind::DatumPage),
            other => Err(Error::Store(format!("unknown document kind '{}'", other))),
        }
    }
}

// ============================================================================
// Stored documents
// ============================================================================

/// Opens a run. Created once; never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStart {
    /// Unique run identifier
    pub uid: String,
    /// Creation time, epoch seconds
    pub time: f64,
    /// Optional operator-facing scan number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<u64>,
    /// Free-form metadata supplied by the writer
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunStart {
    /// Look up a field by name, covering both the fixed fields and the
    /// free-form metadata. Filters evaluate against this view.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "uid" => Some(Value::String(self.uid.clone())),
            "time" => serde_json::Number::from_f64(self.time).map(Value::Number),
            "scan_id" => self.scan_id.map(|s| Value::Number(s.into())),
            other => self.extra.get(other).cloned(),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitStatus {
    /// Ran to completion
    Success,
    /// Stopped deliberately before completion
    Abort,
    /// Stopped by an error
    Fail,
}

/// Closes a run. Its absence means the run is still in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStop {
    /// Unique identifier of this stop document
    pub uid: String,
    /// Uid of the RunStart this stop closes
    pub run_start: String,
    /// Close time, epoch seconds
    pub time: f64,
    /// How the run ended
    pub exit_status: ExitStatus,
    /// Free-form metadata
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Scalar type of a data field as declared by a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    /// Floating point
    Number,
    /// Integer
    Integer,
    /// Text
    String,
    /// Truth value
    Boolean,
    /// Nested array
    Array,
}

/// Per-field schema entry in a descriptor's `data_keys`
///
/// The declared shape/dtype is authoritative for every row of that field
/// in the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataKey {
    /// Scalar type of the field
    pub dtype: Dtype,
    /// Declared shape; empty for scalars
    #[serde(default)]
    pub shape: Vec<u64>,
    /// Present when the value is stored externally; the stored value is
    /// then a datum id, not an inline value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<String>,
    /// Engineering units, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    /// Hardware source string, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Anything else the writer declared
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DataKey {
    /// True when rows of this field live outside the event document
    pub fn is_external(&self) -> bool {
        self.external.is_some()
    }

    /// True for zero-rank fields; shape repair never applies to these
    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }
}

/// Per-object configuration block inside a descriptor
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Configuration readings taken when the descriptor was created
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    /// Per-field reading timestamps, epoch seconds
    #[serde(default)]
    pub timestamps: BTreeMap<String, f64>,
    /// Schema for the configuration readings
    #[serde(default)]
    pub data_keys: BTreeMap<String, DataKey>,
}

/// Schema declaration for a stream segment
///
/// Several descriptors may share one stream `name` (the schema was
/// re-declared mid-run); all of them must declare compatible `data_keys`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Unique identifier of this descriptor
    pub uid: String,
    /// Uid of the owning RunStart
    pub run_start: String,
    /// Stream name, e.g. "primary" or "baseline"
    pub name: String,
    /// Creation time, epoch seconds
    pub time: f64,
    /// Authoritative per-field schema
    pub data_keys: BTreeMap<String, DataKey>,
    /// Hardware object name -> field names produced by that object
    #[serde(default)]
    pub object_keys: BTreeMap<String, Vec<String>>,
    /// Per-object configuration snapshots
    #[serde(default)]
    pub configuration: BTreeMap<String, Configuration>,
}

impl Descriptor {
    /// Names of the fields whose values are stored externally
    pub fn external_fields(&self) -> Vec<&str> {
        self.data_keys
            .iter()
            .filter(|(_, k)| k.is_external())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// One measurement row
///
/// `seq_num` is a per-descriptor sequence counter, not a unique key: when
/// it repeats, the chronologically last write for that seq_num wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier of this event
    pub uid: String,
    /// Uid of the owning descriptor
    pub descriptor: String,
    /// Measurement time, epoch seconds
    pub time: f64,
    /// Row number within the stream, starting at 1
    pub seq_num: u64,
    /// Field -> value; external fields hold a datum id string
    pub data: BTreeMap<String, Value>,
    /// Field -> reading timestamp, epoch seconds
    pub timestamps: BTreeMap<String, f64>,
}

/// Identifies one external data container (e.g. a file)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique identifier; may be absent on legacy records (see
    /// [`ResourceIdResolver`])
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Handler spec naming the format of the container
    pub spec: String,
    /// Mount-point portion of the container path
    #[serde(default)]
    pub root: String,
    /// Path of the container relative to `root`
    pub resource_path: String,
    /// Handler construction arguments
    #[serde(default)]
    pub resource_kwargs: Map<String, Value>,
    /// Owning run, when recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_start: Option<String>,
    /// Free-form metadata, including legacy store-assigned keys
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Pointer to one value inside a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datum {
    /// Unique identifier; conventionally `<resource-id>/<counter>`
    pub datum_id: String,
    /// Identifier of the owning resource
    pub resource: String,
    /// Handler read arguments selecting the value within the resource
    #[serde(default)]
    pub datum_kwargs: Map<String, Value>,
}

// ============================================================================
// Resource identity
// ============================================================================

/// Strategy for identifying a resource when the `uid` field is absent
///
/// Legacy records carry only a store-assigned primary key. Which key that
/// is depends on the backend, so the fallback is pluggable rather than
/// hard-coded.
pub trait ResourceIdResolver: Send + Sync {
    /// Return the identifier to file this resource under, or None if the
    /// record carries no usable identity
    fn resource_id(&self, resource: &Resource) -> Option<String>;
}

/// Default identity strategy: `uid` when present, else the store-assigned
/// `_id` carried in the record's free-form metadata
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResourceId;

impl ResourceIdResolver for DefaultResourceId {
    fn resource_id(&self, resource: &Resource) -> Option<String> {
        if let Some(uid) = &resource.uid {
            return Some(uid.clone());
        }
        resource
            .extra
            .get("_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

// ============================================================================
// Page documents
// ============================================================================

/// Columnar batch of events sharing one descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPage {
    /// Uid of the descriptor every row belongs to
    pub descriptor: String,
    /// Per-row event uids
    pub uid: Vec<String>,
    /// Per-row measurement times
    pub time: Vec<f64>,
    /// Per-row sequence numbers
    pub seq_num: Vec<u64>,
    /// Field -> column of values
    pub data: BTreeMap<String, Vec<Value>>,
    /// Field -> column of reading timestamps
    pub timestamps: BTreeMap<String, Vec<f64>>,
}

impl EventPage {
    /// Pack individual events into one page. All events must share a
    /// descriptor; the caller (the batcher) guarantees this.
    pub fn pack(events: &[Event]) -> Self {
        let descriptor = events
            .first()
            .map(|e| e.descriptor.clone())
            .unwrap_or_default();

        let mut fields: Vec<&String> = Vec::new();
        for event in events {
            for field in event.data.keys() {
                if !fields.contains(&field) {
                    fields.push(field);
                }
            }
        }

        let mut data: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        let mut timestamps: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for field in &fields {
            let values = events
                .iter()
                .map(|e| e.data.get(*field).cloned().unwrap_or(Value::Null))
                .collect();
            let stamps = events
                .iter()
                .map(|e| e.timestamps.get(*field).copied().unwrap_or(0.0))
                .collect();
            data.insert((*field).clone(), values);
            timestamps.insert((*field).clone(), stamps);
        }

        EventPage {
            descriptor,
            uid: events.iter().map(|e| e.uid.clone()).collect(),
            time: events.iter().map(|e| e.time).collect(),
            seq_num: events.iter().map(|e| e.seq_num).collect(),
            data,
            timestamps,
        }
    }

    /// Number of rows in the page
    pub fn len(&self) -> usize {
        self.uid.len()
    }

    /// True when the page holds no rows
    pub fn is_empty(&self) -> bool {
        self.uid.is_empty()
    }

    /// Unpack the page back into individual events, in row order
    pub fn unpack(&self) -> Vec<Event> {
        (0..self.len())
            .map(|i| Event {
                uid: self.uid[i].clone(),
                descriptor: self.descriptor.clone(),
                time: self.time[i],
                seq_num: self.seq_num[i],
                data: self
                    .data
                    .iter()
                    .map(|(f, col)| (f.clone(), col[i].clone()))
                    .collect(),
                timestamps: self
                    .timestamps
                    .iter()
                    .map(|(f, col)| (f.clone(), col[i]))
                    .collect(),
            })
            .collect()
    }
}

/// Columnar batch of datums sharing one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatumPage {
    /// Identifier of the resource every row points into
    pub resource: String,
    /// Per-row datum ids
    pub datum_id: Vec<String>,
    /// Per-row handler read arguments
    pub datum_kwargs: Vec<Map<String, Value>>,
}

impl DatumPage {
    /// Pack individual datums into one page. All datums must share a
    /// resource; the caller guarantees this.
    pub fn pack(datums: &[Datum]) -> Self {
        DatumPage {
            resource: datums
                .first()
                .map(|d| d.resource.clone())
                .unwrap_or_default(),
            datum_id: datums.iter().map(|d| d.datum_id.clone()).collect(),
            datum_kwargs: datums.iter().map(|d| d.datum_kwargs.clone()).collect(),
        }
    }

    /// Number of rows in the page
    pub fn len(&self) -> usize {
        self.datum_id.len()
    }

    /// True when the page holds no rows
    pub fn is_empty(&self) -> bool {
        self.datum_id.is_empty()
    }

    /// Unpack the page back into individual datums, in row order
    pub fn unpack(&self) -> Vec<Datum> {
        (0..self.len())
            .map(|i| Datum {
                datum_id: self.datum_id[i].clone(),
                resource: self.resource.clone(),
                datum_kwargs: self.datum_kwargs[i].clone(),
            })
            .collect()
    }
}

// ============================================================================
// Unified document
// ============================================================================

/// One document of any kind, as yielded by the export surface
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Document {
    /// A RunStart
    Start(RunStart),
    /// A RunStop
    Stop(RunStop),
    /// A Descriptor
    Descriptor(Descriptor),
    /// An Event
    Event(Event),
    /// An EventPage
    EventPage(EventPage),
    /// A Resource
    Resource(Resource),
    /// A Datum
    Datum(Datum),
    /// A DatumPage
    DatumPage(DatumPage),
}

impl Document {
    /// Kind discriminant of this document
    pub fn kind(&self) -> DocumentKind {
        match self {
            Document::Start(_) => DocumentKind::Start,
            Document::Stop(_) => DocumentKind::Stop,
            Document::Descriptor(_) => DocumentKind::Descriptor,
            Document::Event(_) => DocumentKind::Event,
            Document::EventPage(_) => DocumentKind::EventPage,
            Document::Resource(_) => DocumentKind::Resource,
            Document::Datum(_) => DocumentKind::Datum,
            Document::DatumPage(_) => DocumentKind::DatumPage,
        }
    }

    /// Emission time used for canonical ordering
    pub fn time(&self) -> Option<f64> {
        match self {
            Document::Start(d) => Some(d.time),
            Document::Stop(d) => Some(d.time),
            Document::Descriptor(d) => Some(d.time),
            Document::Event(d) => Some(d.time),
            _ => None,
        }
    }

    /// Parse a document of a known kind from its JSON value. The kind tag
    /// travels separately on the wire, so deserialization is by-kind rather
    /// than self-describing.
    pub fn from_kind_value(kind: DocumentKind, value: Value) -> Result<Self> {
        let doc = match kind {
            DocumentKind::Start => Document::Start(serde_json::from_value(value)?),
            DocumentKind::Stop => Document::Stop(serde_json::from_value(value)?),
            DocumentKind::Descriptor => Document::Descriptor(serde_json::from_value(value)?),
            DocumentKind::Event => Document::Event(serde_json::from_value(value)?),
            DocumentKind::EventPage => Document::EventPage(serde_json::from_value(value)?),
            DocumentKind::Resource => Document::Resource(serde_json::from_value(value)?),
            DocumentKind::Datum => Document::Datum(serde_json::from_value(value)?),
            DocumentKind::DatumPage => Document::DatumPage(serde_json::from_value(value)?),
        };
        Ok(doc)
    }
}
