//! Feed processor aggregate: the stream/batch classifier.
//!
//! One aggregate exists per (feed, processor). It looks at the time between
//! consecutive completion events: a run of `stream_threshold_count` events
//! each closer than `allowed_gap_millis` to the previous one is a stream,
//! anything slower is a batch. Batch events are queued for downstream
//! dispatch; stream events are collapsed into one marker per logical
//! completion and only forwarded once their lineage turns out to be a batch.
//!
//! Ingestion ([`FeedProcessorAggregate::add`]) and the periodic drain
//! ([`FeedProcessorAggregate::collect_events_to_be_sent_downstream`]) share a
//! single mutex. Every critical section ends with a fair unlock so a steady
//! stream of ingestion calls cannot starve the drain. The counters are atomics
//! readable without the lock.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::clock::{Clock, SystemClock};
use crate::completion::{is_completion_event, CompletionPredicate};
use crate::config::StreamConfig;
use crate::error::StreamResult;
use crate::event::{Classification, DedupKey, SharedEvent};
use crate::lineage::LineageGraph;
use crate::sink::DispatchSink;
use crate::stats::{AggregatedProcessorStatistics, ProvenanceEventStats};

/// Mutable classification state, only touched under the aggregate lock.
#[derive(Debug, Default)]
struct AggregateState {
    /// Time of the most recent event, completion or not.
    last_event_time: Option<DateTime<Utc>>,
    /// Whether the most recent event ended up classified as a stream.
    last_event_was_stream: bool,
    /// Events inside the gap window that have not reached the threshold yet.
    potential: Vec<SharedEvent>,
    /// Events confirmed as stream during this drain epoch.
    stream_buffer: Vec<SharedEvent>,
    /// Latest event per logical completion.
    dedup: HashMap<DedupKey, SharedEvent>,
    /// Events pending hand-off, keyed by event id. Provenance event ids are
    /// assigned once per record by the repository, so the id is the record's
    /// identity.
    dispatch: BTreeMap<i64, SharedEvent>,
}

/// Point-in-time view of an aggregate, taken under its lock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub feed_name: String,
    pub processor_id: String,
    pub processor_name: Option<String>,
    pub event_count: u64,
    pub batch_count: u64,
    pub stream_count: u64,
    pub streaming_run_length: u32,
    pub last_event_time: Option<DateTime<Utc>>,
    pub last_event_was_stream: bool,
    /// Ids of undecided events, in arrival order.
    pub potential: Vec<i64>,
    /// Ids of events confirmed as stream this epoch.
    pub streaming: Vec<i64>,
    /// Ids of events queued for the next drain.
    pub pending_dispatch: Vec<i64>,
    pub dedup_entries: usize,
    pub init_time: DateTime<Utc>,
}

/// Stream/batch classifier and dispatch buffer for one feed processor.
pub struct FeedProcessorAggregate {
    feed_name: String,
    processor_id: String,
    processor_name: OnceLock<String>,
    config: StreamConfig,
    graph: Arc<LineageGraph>,
    clock: Arc<dyn Clock>,
    is_completion: CompletionPredicate,
    state: Mutex<AggregateState>,
    stats: Mutex<AggregatedProcessorStatistics>,
    event_count: AtomicU64,
    batch_count: AtomicU64,
    stream_count: AtomicU64,
    streaming_run_length: AtomicU32,
    init_time: DateTime<Utc>,
}

impl FeedProcessorAggregate {
    /// Create an aggregate for `processor_id` in `feed_name`.
    ///
    /// Fails if the configuration has a zero gap or threshold.
    pub fn new(
        feed_name: impl Into<String>,
        processor_id: impl Into<String>,
        config: StreamConfig,
        graph: Arc<LineageGraph>,
    ) -> StreamResult<Self> {
        config.validate()?;
        let feed_name = feed_name.into();
        let processor_id = processor_id.into();
        let init_time = Utc::now();
        info!(
            feed = %feed_name,
            processor = %processor_id,
            allowed_gap_millis = config.allowed_gap_millis,
            stream_threshold_count = config.stream_threshold_count,
            %init_time,
            "new feed processor aggregate"
        );
        Ok(Self {
            stats: Mutex::new(AggregatedProcessorStatistics::new(
                processor_id.clone(),
                feed_name.clone(),
            )),
            feed_name,
            processor_id,
            processor_name: OnceLock::new(),
            config,
            graph,
            clock: Arc::new(SystemClock),
            is_completion: is_completion_event,
            state: Mutex::new(AggregateState::default()),
            event_count: AtomicU64::new(0),
            batch_count: AtomicU64::new(0),
            stream_count: AtomicU64::new(0),
            streaming_run_length: AtomicU32::new(0),
            init_time,
        })
    }

    /// Replace the clock used by the drain's inactivity timeout.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the completion predicate.
    pub fn with_completion_predicate(mut self, predicate: CompletionPredicate) -> Self {
        self.is_completion = predicate;
        self
    }

    // ── Ingestion ───────────────────────────────────────────────────────

    /// Classify `event` and merge `stats` into the running statistics.
    pub fn add(&self, stats: &ProvenanceEventStats, event: &SharedEvent) {
        if let Some(name) = event.component_name() {
            let _ = self.processor_name.set(name.to_string());
        }

        let mut state = self.state.lock();
        self.classify(&mut state, event, stats.is_job_finished());
        // every event moves the window, completion or not
        state.last_event_time = Some(event.event_time());
        state.last_event_was_stream = event.is_stream();
        MutexGuard::unlock_fair(state);

        self.stats.lock().add(stats);
    }

    /// Classify the event that completes a job's root lineage.
    ///
    /// Returns `true` if the event was classified and should still be emitted
    /// for reconciliation, `false` if a marker with the same dedup key is
    /// already held for this drain epoch.
    pub fn add_root_lineage_completion_event(&self, event: &SharedEvent) -> bool {
        // the marker is stored under the key the event has once classified
        let mut key = event.dedup_key();
        key.end_of_job |= self.finishes_job(event, true);

        let mut state = self.state.lock();
        if state.dedup.contains_key(&key) {
            MutexGuard::unlock_fair(state);
            return false;
        }
        self.classify(&mut state, event, true);
        MutexGuard::unlock_fair(state);
        true
    }

    fn classify(&self, state: &mut AggregateState, event: &SharedEvent, job_finished: bool) {
        let last_event_time = *state
            .last_event_time
            .get_or_insert_with(|| event.event_time());

        if !(self.is_completion)(event) {
            return;
        }
        self.event_count.fetch_add(1, Ordering::Relaxed);

        if self.finishes_job(event, job_finished) {
            event.mark_end_of_job();
        }

        if self.graph.is_stream(event.lineage()) {
            self.move_to_stream(state, event);
            return;
        }

        let within_gap = match last_event_time.checked_add_signed(self.config.allowed_gap()) {
            Some(window_end) => event.event_time() < window_end,
            // a window reaching past the representable range never closes
            None => true,
        };
        if within_gap || state.last_event_was_stream {
            let run = self.streaming_run_length.fetch_add(1, Ordering::Relaxed) + 1;
            if run >= self.config.stream_threshold_count {
                self.move_potential_to_stream(state);
                self.move_to_stream(state, event);
            } else {
                state.potential.push(Arc::clone(event));
            }
        } else {
            state.potential.push(Arc::clone(event));
            self.move_potential_to_batch(state);
            self.streaming_run_length.store(0, Ordering::Relaxed);
        }
    }

    /// Whether a completion with `job_finished` ends a non-root job unit.
    fn finishes_job(&self, event: &SharedEvent, job_finished: bool) -> bool {
        job_finished
            && !self
                .graph
                .is_root_job_unit(event.lineage(), event.job_unit_id())
    }

    fn move_to_stream(&self, state: &mut AggregateState, event: &SharedEvent) {
        event.set_classification(Classification::Stream);
        if event.is_start_of_job() {
            let first = self.graph.mark_stream(event.lineage());
            debug!(event = %event, lineage = %event.lineage(), ?first, "start of job is a stream");
        }
        state.dedup.insert(event.dedup_key(), Arc::clone(event));
        self.reconcile_with_batch_siblings(state, event);
        state.stream_buffer.push(Arc::clone(event));
        self.stream_count.fetch_add(1, Ordering::Relaxed);
    }

    fn move_potential_to_stream(&self, state: &mut AggregateState) {
        for event in std::mem::take(&mut state.potential) {
            self.move_to_stream(state, &event);
        }
    }

    fn move_potential_to_batch(&self, state: &mut AggregateState) {
        if state.potential.is_empty() {
            return;
        }
        let moved = std::mem::take(&mut state.potential);
        let count = moved.len() as u64;
        for event in moved {
            if event.is_start_of_job() {
                self.graph.mark_batch(event.lineage());
                debug!(event = %event, lineage = %event.lineage(), "start of job is a batch");
            }
            event.set_classification(Classification::Batch);
            state.dispatch.insert(event.event_id(), event);
        }
        self.batch_count.fetch_add(count, Ordering::Relaxed);
    }

    /// A burst that looks like a stream but whose lineage is related to a
    /// batch sibling is reported as a batch, along with everything the
    /// lineage already completed.
    fn reconcile_with_batch_siblings(&self, state: &mut AggregateState, event: &SharedEvent) {
        let Some(completed) = self.graph.override_stream_with_batch_sibling(event.lineage())
        else {
            return;
        };
        let redelivered = completed.len() + 1;
        for e in completed.iter().chain(std::iter::once(event)) {
            state.dedup.insert(e.dedup_key(), Arc::clone(e));
        }
        event.set_classification(Classification::Batch);
        info!(
            feed = %self.feed_name,
            processor = %self.processor_id,
            lineage = %event.lineage(),
            job_unit = event.job_unit_id(),
            redelivered,
            "stream lineage has a batch sibling, reclassifying as batch"
        );
    }

    // ── Drain ───────────────────────────────────────────────────────────

    /// Snapshot and clear everything pending for downstream dispatch.
    ///
    /// Undecided events older than the allowed gap are flushed to batch
    /// first, and stream markers whose lineage is now a batch are included.
    /// Every returned event carries the batch classification. Returns an
    /// empty vector when nothing is pending.
    pub fn collect_events_to_be_sent_downstream(&self) -> Vec<SharedEvent> {
        let mut state = self.state.lock();

        if let Some(last) = state.last_event_time {
            let expired = last
                .checked_add_signed(self.config.allowed_gap())
                .is_some_and(|window_end| self.clock.now() > window_end);
            if expired {
                trace!(
                    feed = %self.feed_name,
                    processor = %self.processor_id,
                    pending = state.potential.len(),
                    "inactivity timeout, flushing undecided events to batch"
                );
                self.streaming_run_length.store(0, Ordering::Relaxed);
                self.move_potential_to_batch(&mut state);
            }
        }

        let reconciled: Vec<SharedEvent> = state
            .dedup
            .values()
            .filter(|e| self.graph.is_batch(e.lineage()))
            .cloned()
            .collect();
        for event in reconciled {
            state.dispatch.insert(event.event_id(), event);
        }

        for event in state.dispatch.values() {
            event.set_classification(Classification::Batch);
        }

        let events: Vec<SharedEvent> = std::mem::take(&mut state.dispatch).into_values().collect();
        state.stream_buffer.clear();
        state.dedup.clear();
        MutexGuard::unlock_fair(state);

        if !events.is_empty() {
            debug!(
                feed = %self.feed_name,
                processor = %self.processor_id,
                count = events.len(),
                "collected events for downstream dispatch"
            );
        }
        events
    }

    /// Drain and hand the result to `sink`. Returns how many events were
    /// published. Drained events are not retained if the sink fails.
    pub async fn drain_to(&self, sink: &dyn DispatchSink) -> StreamResult<usize> {
        let events = self.collect_events_to_be_sent_downstream();
        if events.is_empty() {
            return Ok(0);
        }
        let count = events.len();
        sink.publish(&self.feed_name, &self.processor_id, events)
            .await?;
        Ok(count)
    }

    // ── Accessors ───────────────────────────────────────────────────────

    /// Feed this aggregate belongs to.
    pub fn feed_name(&self) -> &str {
        &self.feed_name
    }

    /// Processor whose events are classified.
    pub fn processor_id(&self) -> &str {
        &self.processor_id
    }

    /// Component name learned from the first event that carried one.
    pub fn processor_name(&self) -> Option<&str> {
        self.processor_name.get().map(String::as_str)
    }

    /// Thresholds the aggregate was built with.
    pub fn config(&self) -> StreamConfig {
        self.config
    }

    /// When the aggregate was created.
    pub fn init_time(&self) -> DateTime<Utc> {
        self.init_time
    }

    /// Copy of the running statistics.
    pub fn stats(&self) -> AggregatedProcessorStatistics {
        self.stats.lock().clone()
    }

    /// One-line rendering of the running statistics.
    pub fn summary(&self) -> String {
        self.stats.lock().to_string()
    }

    /// Completion events seen.
    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }

    /// Completion events classified as batch.
    pub fn batch_count(&self) -> u64 {
        self.batch_count.load(Ordering::Relaxed)
    }

    /// Completion events classified as stream.
    pub fn stream_count(&self) -> u64 {
        self.stream_count.load(Ordering::Relaxed)
    }

    /// Length of the current run of closely spaced events.
    pub fn streaming_run_length(&self) -> u32 {
        self.streaming_run_length.load(Ordering::Relaxed)
    }

    /// Point-in-time view of buffers and counters.
    pub fn snapshot(&self) -> AggregateSnapshot {
        let state = self.state.lock();
        let snapshot = AggregateSnapshot {
            feed_name: self.feed_name.clone(),
            processor_id: self.processor_id.clone(),
            processor_name: self.processor_name().map(str::to_string),
            event_count: self.event_count(),
            batch_count: self.batch_count(),
            stream_count: self.stream_count(),
            streaming_run_length: self.streaming_run_length(),
            last_event_time: state.last_event_time,
            last_event_was_stream: state.last_event_was_stream,
            potential: state.potential.iter().map(|e| e.event_id()).collect(),
            streaming: state.stream_buffer.iter().map(|e| e.event_id()).collect(),
            pending_dispatch: state.dispatch.keys().copied().collect(),
            dedup_entries: state.dedup.len(),
            init_time: self.init_time,
        };
        MutexGuard::unlock_fair(state);
        snapshot
    }
}

impl fmt::Display for FeedProcessorAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FeedProcessorAggregate {{ feed_name: '{}', processor_id: '{}', summary: '{}' }}",
            self.feed_name,
            self.processor_id,
            self.summary()
        )
    }
}

impl fmt::Debug for FeedProcessorAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedProcessorAggregate")
            .field("feed_name", &self.feed_name)
            .field("processor_id", &self.processor_id)
            .field("config", &self.config)
            .field("event_count", &self.event_count())
            .field("batch_count", &self.batch_count())
            .field("stream_count", &self.stream_count())
            .finish_non_exhaustive()
    }
}
