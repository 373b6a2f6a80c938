//! # feedflow-provenance
//!
//! Per-(feed, processor) classification of provenance completion events.
//!
//! The provenance pipeline feeds every event it observes for a processor into
//! a [`FeedProcessorAggregate`]. The aggregate decides from event timing
//! whether the job behind those events runs as a high-frequency stream or as
//! discrete batches, and a periodic drain hands a deduplicated set of
//! completion markers to the downstream notification channel.
//!
//! ```text
//!   pipeline ──add()──▶ FeedProcessorAggregate ──drain──▶ DispatchSink
//!                          │  potential ─┬─▶ stream ─▶ dedup map
//!                          │             └─▶ batch  ─▶ dispatch set
//!                          ▼
//!                     LineageGraph (job-wide Unset/Stream/Batch)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use feedflow_provenance::{
//!     EventRecord, EventType, FeedProcessorAggregate, LineageGraph,
//!     ProvenanceEventStats, StreamConfig,
//! };
//!
//! let graph = Arc::new(LineageGraph::new());
//! let aggregate = FeedProcessorAggregate::new(
//!     "category.feed",
//!     "processor-1",
//!     StreamConfig::new(1000, 3).unwrap(),
//!     graph.clone(),
//! )
//! .unwrap();
//!
//! let root = graph.insert_root("flowfile-1");
//! let event = EventRecord::builder(1, "flowfile-1", root)
//!     .component("processor-1", "PutFile")
//!     .event_type(EventType::Drop)
//!     .build_shared();
//! aggregate.add(&ProvenanceEventStats::new("category.feed", "processor-1"), &event);
//!
//! let _pending = aggregate.collect_events_to_be_sent_downstream();
//! ```

#![deny(unsafe_code)]

pub mod aggregate;
pub mod clock;
pub mod completion;
pub mod config;
pub mod error;
pub mod event;
pub mod lineage;
pub mod sink;
pub mod stats;

// ── Re-exports ──────────────────────────────────────────────────────────

pub use aggregate::{AggregateSnapshot, FeedProcessorAggregate};
pub use clock::{Clock, ManualClock, SystemClock};
pub use completion::{is_completion_event, CompletionPredicate};
pub use config::StreamConfig;
pub use error::{StreamError, StreamResult};
pub use event::{
    Classification, DedupKey, EventRecord, EventRecordBuilder, EventType, SharedEvent,
};
pub use lineage::{FirstEventType, LineageGraph, LineageId};
pub use sink::{DispatchSink, MemoryDispatchSink, PublishedBatch};
pub use stats::{AggregatedProcessorStatistics, ProvenanceEventStats};
