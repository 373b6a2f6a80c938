//! Provenance event records as seen by a feed processor aggregate.
//!
//! Records are created by the provenance pipeline and shared as
//! [`SharedEvent`]. Identity fields never change after construction; the
//! classification and end-of-job marker are written only by this crate.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lineage::LineageId;

/// Shared handle to an event record.
pub type SharedEvent = Arc<EventRecord>;

/// Provenance event types emitted by the flow engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Create,
    Receive,
    Fetch,
    Send,
    Download,
    Drop,
    Expire,
    Fork,
    Join,
    Clone,
    ContentModified,
    AttributesModified,
    Route,
    #[serde(rename = "ADDINFO")]
    AddInfo,
    Replay,
    Unknown,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "CREATE",
            Self::Receive => "RECEIVE",
            Self::Fetch => "FETCH",
            Self::Send => "SEND",
            Self::Download => "DOWNLOAD",
            Self::Drop => "DROP",
            Self::Expire => "EXPIRE",
            Self::Fork => "FORK",
            Self::Join => "JOIN",
            Self::Clone => "CLONE",
            Self::ContentModified => "CONTENT_MODIFIED",
            Self::AttributesModified => "ATTRIBUTES_MODIFIED",
            Self::Route => "ROUTE",
            Self::AddInfo => "ADDINFO",
            Self::Replay => "REPLAY",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Stream/batch classification of a single event.
///
/// An event leaves `Undecided` exactly once. `Stream` may still become
/// `Batch` when its lineage is reconciled, never the other way round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    Undecided,
    Stream,
    Batch,
}

impl Classification {
    fn as_u8(self) -> u8 {
        match self {
            Self::Undecided => 0,
            Self::Stream => 1,
            Self::Batch => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Stream,
            2 => Self::Batch,
            _ => Self::Undecided,
        }
    }
}

/// A single provenance event observed for a feed processor.
#[derive(Debug)]
pub struct EventRecord {
    event_id: i64,
    job_unit_id: String,
    lineage: LineageId,
    component_id: String,
    component_name: Option<String>,
    event_type: EventType,
    event_time: DateTime<Utc>,
    failure: bool,
    start_of_job: bool,
    end_of_job: AtomicBool,
    classification: AtomicU8,
}

impl EventRecord {
    /// Start building an event for `job_unit_id` whose lineage root is `lineage`.
    pub fn builder(
        event_id: i64,
        job_unit_id: impl Into<String>,
        lineage: LineageId,
    ) -> EventRecordBuilder {
        EventRecordBuilder::new(event_id, job_unit_id, lineage)
    }

    /// Provenance event id; the record's identity.
    pub fn event_id(&self) -> i64 {
        self.event_id
    }

    /// The job unit (flow file) this event belongs to.
    pub fn job_unit_id(&self) -> &str {
        &self.job_unit_id
    }

    /// Handle of the job unit's lineage root.
    pub fn lineage(&self) -> LineageId {
        self.lineage
    }

    /// Processor that emitted the event.
    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    /// Display name of the processor, if known.
    pub fn component_name(&self) -> Option<&str> {
        self.component_name.as_deref()
    }

    /// Provenance event type.
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// When the event happened.
    pub fn event_time(&self) -> DateTime<Utc> {
        self.event_time
    }

    /// Whether the event reports a failure.
    pub fn is_failure(&self) -> bool {
        self.failure
    }

    /// Whether the event starts a job.
    pub fn is_start_of_job(&self) -> bool {
        self.start_of_job
    }

    /// Whether the event ends a job.
    pub fn is_end_of_job(&self) -> bool {
        self.end_of_job.load(Ordering::Acquire)
    }

    /// Current stream/batch classification.
    pub fn classification(&self) -> Classification {
        Classification::from_u8(self.classification.load(Ordering::Acquire))
    }

    /// Whether the event is classified as a stream.
    pub fn is_stream(&self) -> bool {
        self.classification() == Classification::Stream
    }

    /// Whether the event is classified as a batch.
    pub fn is_batch_job(&self) -> bool {
        self.classification() == Classification::Batch
    }

    pub(crate) fn mark_end_of_job(&self) {
        self.end_of_job.store(true, Ordering::Release);
    }

    pub(crate) fn set_classification(&self, classification: Classification) {
        self.classification
            .store(classification.as_u8(), Ordering::Release);
    }

    /// Composite key used to keep one marker per logical completion.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            job_unit_id: self.job_unit_id.clone(),
            event_type: self.event_type,
            end_of_job: self.is_end_of_job(),
            start_of_job: self.start_of_job,
            component_id: self.component_id.clone(),
            failure: self.failure,
        }
    }
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "event {} [{}] job unit {} component {} at {} ({:?})",
            self.event_id,
            self.event_type,
            self.job_unit_id,
            self.component_id,
            self.event_time.to_rfc3339(),
            self.classification()
        )
    }
}

/// Identifies a logical completion within a job.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DedupKey {
    pub job_unit_id: String,
    pub event_type: EventType,
    pub end_of_job: bool,
    pub start_of_job: bool,
    pub component_id: String,
    pub failure: bool,
}

/// Builder for [`EventRecord`].
#[derive(Debug)]
pub struct EventRecordBuilder {
    event_id: i64,
    job_unit_id: String,
    lineage: LineageId,
    component_id: String,
    component_name: Option<String>,
    event_type: EventType,
    event_time: Option<DateTime<Utc>>,
    failure: bool,
    start_of_job: bool,
    end_of_job: bool,
}

impl EventRecordBuilder {
    /// Start a record with its identity and lineage.
    pub fn new(event_id: i64, job_unit_id: impl Into<String>, lineage: LineageId) -> Self {
        Self {
            event_id,
            job_unit_id: job_unit_id.into(),
            lineage,
            component_id: String::new(),
            component_name: None,
            event_type: EventType::Unknown,
            event_time: None,
            failure: false,
            start_of_job: false,
            end_of_job: false,
        }
    }

    /// Set the emitting component (processor).
    pub fn component(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.component_id = id.into();
        self.component_name = Some(name.into());
        self
    }

    /// Set the emitting processor id.
    pub fn component_id(mut self, id: impl Into<String>) -> Self {
        self.component_id = id.into();
        self
    }

    /// Set the event type.
    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }

    /// Set the event time. Defaults to now.
    pub fn event_time(mut self, time: DateTime<Utc>) -> Self {
        self.event_time = Some(time);
        self
    }

    /// Flag the event as a failure.
    pub fn failure(mut self, failure: bool) -> Self {
        self.failure = failure;
        self
    }

    /// Flag the event as the start of a job.
    pub fn start_of_job(mut self, start: bool) -> Self {
        self.start_of_job = start;
        self
    }

    /// Flag the event as the end of a job.
    pub fn end_of_job(mut self, end: bool) -> Self {
        self.end_of_job = end;
        self
    }

    /// Build the record. Missing event time defaults to now.
    pub fn build(self) -> EventRecord {
        EventRecord {
            event_id: self.event_id,
            job_unit_id: self.job_unit_id,
            lineage: self.lineage,
            component_id: self.component_id,
            component_name: self.component_name,
            event_type: self.event_type,
            event_time: self.event_time.unwrap_or_else(Utc::now),
            failure: self.failure,
            start_of_job: self.start_of_job,
            end_of_job: AtomicBool::new(self.end_of_job),
            classification: AtomicU8::new(Classification::Undecided.as_u8()),
        }
    }

    /// Build the record behind an `Arc`.
    pub fn build_shared(self) -> SharedEvent {
        Arc::new(self.build())
    }
}
