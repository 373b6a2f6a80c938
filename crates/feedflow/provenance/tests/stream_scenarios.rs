//! End-to-end classification scenarios for a single feed processor.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use feedflow_provenance::{
    Classification, DispatchSink, EventRecord, EventType, FeedProcessorAggregate, FirstEventType,
    LineageGraph, LineageId, ManualClock, MemoryDispatchSink, ProvenanceEventStats, SharedEvent,
    StreamConfig, StreamError, StreamResult,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const FEED: &str = "ops.orders";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

fn at(millis: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::milliseconds(millis)
}

fn aggregate(
    processor: &str,
    graph: &Arc<LineageGraph>,
    clock: &Arc<ManualClock>,
) -> FeedProcessorAggregate {
    FeedProcessorAggregate::new(
        FEED,
        processor,
        StreamConfig::new(1000, 3).unwrap(),
        graph.clone(),
    )
    .unwrap()
    .with_clock(clock.clone())
}

fn completion(
    id: i64,
    job_unit: &str,
    lineage: LineageId,
    processor: &str,
    millis: i64,
) -> SharedEvent {
    EventRecord::builder(id, job_unit, lineage)
        .component(processor, "PutDatabaseRecord")
        .event_type(EventType::Drop)
        .event_time(at(millis))
        .build_shared()
}

fn job_start(
    id: i64,
    job_unit: &str,
    lineage: LineageId,
    processor: &str,
    millis: i64,
) -> SharedEvent {
    EventRecord::builder(id, job_unit, lineage)
        .component(processor, "GetFile")
        .event_type(EventType::Create)
        .event_time(at(millis))
        .start_of_job(true)
        .build_shared()
}

fn stats(processor: &str) -> ProvenanceEventStats {
    ProvenanceEventStats::new(FEED, processor)
}

fn ids(events: &[SharedEvent]) -> Vec<i64> {
    events.iter().map(|e| e.event_id()).collect()
}

/// Classify a lone job start on its own processor and let it time out, which
/// leaves its lineage classified as a batch.
fn batch_lineage(graph: &Arc<LineageGraph>, clock: &Arc<ManualClock>) -> LineageId {
    let batch_root = graph.insert_root("ff-batch");
    let ingest = aggregate("proc-ingest", graph, clock);
    ingest.add(
        &stats("proc-ingest"),
        &job_start(900, "ff-batch", batch_root, "proc-ingest", -60_000),
    );
    clock.set(at(-50_000));
    assert_eq!(ingest.collect_events_to_be_sent_downstream().len(), 1);
    assert!(graph.is_batch(batch_root));
    batch_root
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn closely_spaced_events_reach_the_stream_threshold() {
    let graph = Arc::new(LineageGraph::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let agg = aggregate("proc-1", &graph, &clock);
    let root = graph.insert_root("ff-1");

    let events: Vec<SharedEvent> = (0..3)
        .map(|i| completion(i + 1, "ff-1", root, "proc-1", i * 100))
        .collect();

    agg.add(&stats("proc-1"), &events[0]);
    agg.add(&stats("proc-1"), &events[1]);
    assert_eq!(agg.snapshot().potential, vec![1, 2]);
    assert!(events[0..2]
        .iter()
        .all(|e| e.classification() == Classification::Undecided));

    agg.add(&stats("proc-1"), &events[2]);

    assert!(events.iter().all(|e| e.is_stream()));
    assert_eq!(agg.stream_count(), 3);
    assert_eq!(agg.batch_count(), 0);
    assert_eq!(agg.event_count(), 3);
    assert_eq!(agg.streaming_run_length(), 3);

    let snap = agg.snapshot();
    assert!(snap.potential.is_empty());
    assert_eq!(snap.streaming, vec![1, 2, 3]);
    assert!(snap.last_event_was_stream);
}

#[test]
fn slow_event_flushes_the_window_to_batch() {
    let graph = Arc::new(LineageGraph::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let agg = aggregate("proc-1", &graph, &clock);
    let root = graph.insert_root("ff-1");

    let events = [
        completion(1, "ff-1", root, "proc-1", 0),
        completion(2, "ff-1", root, "proc-1", 100),
        completion(3, "ff-1", root, "proc-1", 5100),
    ];
    for e in &events {
        agg.add(&stats("proc-1"), e);
    }

    assert!(events.iter().all(|e| e.is_batch_job()));
    assert_eq!(agg.batch_count(), 3);
    assert_eq!(agg.stream_count(), 0);
    assert_eq!(agg.streaming_run_length(), 0);
    assert_eq!(agg.snapshot().pending_dispatch, vec![1, 2, 3]);

    clock.set(at(5200));
    let drained = agg.collect_events_to_be_sent_downstream();
    assert_eq!(ids(&drained), vec![1, 2, 3]);
    assert!(agg.collect_events_to_be_sent_downstream().is_empty());
}

#[test]
fn drain_returns_a_reconciled_stream_run_once() {
    let graph = Arc::new(LineageGraph::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let batch_root = batch_lineage(&graph, &clock);

    let root = graph.insert_root("ff-a");
    graph.relate(root, batch_root);

    let agg = aggregate("proc-1", &graph, &clock);
    let events = [
        job_start(1, "ff-a", root, "proc-1", 0),
        completion(2, "ff-b", root, "proc-1", 100),
        completion(3, "ff-c", root, "proc-1", 200),
    ];
    for e in &events {
        agg.add(&stats("proc-1"), e);
    }
    // all three made it through the stream path
    assert_eq!(agg.stream_count(), 3);
    assert_eq!(agg.snapshot().streaming, vec![1, 2, 3]);
    assert!(graph.is_batch(root));

    clock.set(at(300));
    let drained = agg.collect_events_to_be_sent_downstream();
    assert_eq!(ids(&drained), vec![1, 2, 3]);
    assert!(drained.iter().all(|e| e.is_batch_job()));

    assert!(agg.collect_events_to_be_sent_downstream().is_empty());
    let snap = agg.snapshot();
    assert!(snap.streaming.is_empty());
    assert_eq!(snap.dedup_entries, 0);
}

#[test]
fn stream_lineage_with_batch_sibling_is_redelivered_as_batch() {
    let graph = Arc::new(LineageGraph::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let root = graph.insert_root("ff-stream");
    let agg = aggregate("proc-1", &graph, &clock);

    // establish the lineage as a stream
    let early = [
        job_start(1, "ff-stream", root, "proc-1", 0),
        completion(2, "ff-s2", root, "proc-1", 50),
        completion(3, "ff-s3", root, "proc-1", 100),
    ];
    for e in &early {
        agg.add(&stats("proc-1"), e);
        graph.record_completed_event(root, e.clone());
    }
    assert_eq!(graph.first_event_type(root), FirstEventType::Stream);

    // a drain clears the epoch; stream markers are not forwarded
    clock.set(at(150));
    assert!(agg.collect_events_to_be_sent_downstream().is_empty());

    // the fan-in partner turns out to be a batch
    let batch_root = batch_lineage(&graph, &clock);
    graph.relate(root, batch_root);

    let next = completion(4, "ff-s4", root, "proc-1", 200);
    agg.add(&stats("proc-1"), &next);

    assert_eq!(graph.first_event_type(root), FirstEventType::Batch);
    assert!(next.is_batch_job());
    assert_eq!(agg.snapshot().dedup_entries, 4);

    clock.set(at(250));
    let drained = agg.collect_events_to_be_sent_downstream();
    assert_eq!(ids(&drained), vec![1, 2, 3, 4]);
    assert!(drained.iter().all(|e| e.is_batch_job()));

    // never back to stream
    let later = job_start(5, "ff-stream", root, "proc-1", 260);
    agg.add(&stats("proc-1"), &later);
    assert_eq!(graph.first_event_type(root), FirstEventType::Batch);
}

#[test]
fn duplicate_root_completion_is_reported_once() {
    let graph = Arc::new(LineageGraph::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let root = graph.insert_root("ff-root");
    let agg = aggregate("proc-1", &graph, &clock);

    // a running stream job
    for (i, millis) in [(1, 0), (2, 10), (3, 20)] {
        let e = if i == 1 {
            job_start(i, "ff-root", root, "proc-1", millis)
        } else {
            completion(i, &format!("ff-{i}"), root, "proc-1", millis)
        };
        agg.add(&stats("proc-1"), &e);
    }
    assert!(graph.is_stream(root));

    let finish = completion(10, "ff-root", root, "proc-1", 30);
    let redelivered = completion(11, "ff-root", root, "proc-1", 31);
    assert_eq!(finish.dedup_key(), redelivered.dedup_key());

    assert!(agg.add_root_lineage_completion_event(&finish));
    assert!(!agg.add_root_lineage_completion_event(&redelivered));
    assert!(finish.is_stream());
    assert_eq!(redelivered.classification(), Classification::Undecided);
}

#[test]
fn duplicate_delivery_keeps_one_marker_per_key() {
    let graph = Arc::new(LineageGraph::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let root = graph.insert_root("ff-root");
    let agg = aggregate("proc-1", &graph, &clock);
    agg.add(&stats("proc-1"), &job_start(1, "ff-root", root, "proc-1", 0));
    agg.add(&stats("proc-1"), &completion(2, "ff-x", root, "proc-1", 10));
    agg.add(&stats("proc-1"), &completion(3, "ff-y", root, "proc-1", 20));
    assert!(graph.is_stream(root));
    let before = agg.snapshot().dedup_entries;

    for id in 4..10 {
        agg.add(&stats("proc-1"), &completion(id, "ff-x", root, "proc-1", 20 + id));
    }

    assert_eq!(agg.snapshot().dedup_entries, before);
    assert_eq!(agg.stream_count(), 9);
}

// ---------------------------------------------------------------------------
// Downstream hand-off
// ---------------------------------------------------------------------------

struct UnavailableSink;

#[async_trait]
impl DispatchSink for UnavailableSink {
    async fn publish(&self, _: &str, _: &str, _: Vec<SharedEvent>) -> StreamResult<()> {
        Err(StreamError::Sink("broker unavailable".into()))
    }
}

#[tokio::test]
async fn drain_to_publishes_non_empty_drains() {
    let graph = Arc::new(LineageGraph::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let root = graph.insert_root("ff-1");
    let agg = aggregate("proc-1", &graph, &clock);
    let sink = MemoryDispatchSink::new();

    agg.add(&stats("proc-1"), &completion(1, "ff-1", root, "proc-1", 0));
    clock.set(at(5000));

    assert_eq!(agg.drain_to(&sink).await.unwrap(), 1);
    assert_eq!(agg.drain_to(&sink).await.unwrap(), 0);

    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].feed_name, FEED);
    assert_eq!(batches[0].processor_id, "proc-1");
    assert_eq!(ids(&batches[0].events), vec![1]);
}

#[tokio::test]
async fn drain_to_surfaces_sink_failures() {
    let graph = Arc::new(LineageGraph::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let root = graph.insert_root("ff-1");
    let agg = aggregate("proc-1", &graph, &clock);

    agg.add(&stats("proc-1"), &completion(1, "ff-1", root, "proc-1", 0));
    clock.set(at(5000));

    let err = agg.drain_to(&UnavailableSink).await.unwrap_err();
    assert!(err.to_string().contains("broker unavailable"));
    assert!(agg.snapshot().pending_dispatch.is_empty());
}
