//! Per-event statistics and the running per-processor aggregate.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics derived from a single provenance event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceEventStats {
    pub feed_name: String,
    pub processor_id: String,
    pub event_time: Option<DateTime<Utc>>,
    pub duration_millis: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub jobs_started: u64,
    /// Number of jobs this event finished. Exactly one marks the end of a job.
    pub jobs_finished: u64,
    pub jobs_failed: u64,
    pub flow_files_started: u64,
    pub flow_files_finished: u64,
    pub failure: bool,
}

impl ProvenanceEventStats {
    /// Empty per-event statistics for one processor.
    pub fn new(feed_name: impl Into<String>, processor_id: impl Into<String>) -> Self {
        Self {
            feed_name: feed_name.into(),
            processor_id: processor_id.into(),
            ..Default::default()
        }
    }

    /// Whether this update reports exactly one finished job.
    pub fn is_job_finished(&self) -> bool {
        self.jobs_finished == 1
    }
}

/// Running totals for one feed processor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedProcessorStatistics {
    pub processor_id: String,
    pub feed_name: String,
    pub event_count: u64,
    pub total_duration_millis: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub jobs_started: u64,
    pub jobs_finished: u64,
    pub jobs_failed: u64,
    pub flow_files_started: u64,
    pub flow_files_finished: u64,
    pub failed_events: u64,
    pub min_event_time: Option<DateTime<Utc>>,
    pub max_event_time: Option<DateTime<Utc>>,
}

impl AggregatedProcessorStatistics {
    /// Empty accumulator for one processor.
    pub fn new(processor_id: impl Into<String>, feed_name: impl Into<String>) -> Self {
        Self {
            processor_id: processor_id.into(),
            feed_name: feed_name.into(),
            ..Default::default()
        }
    }

    /// Merge one event's statistics into the running totals.
    pub fn add(&mut self, stats: &ProvenanceEventStats) {
        self.event_count += 1;
        self.total_duration_millis = self
            .total_duration_millis
            .saturating_add(stats.duration_millis);
        self.bytes_in = self.bytes_in.saturating_add(stats.bytes_in);
        self.bytes_out = self.bytes_out.saturating_add(stats.bytes_out);
        self.jobs_started += stats.jobs_started;
        self.jobs_finished += stats.jobs_finished;
        self.jobs_failed += stats.jobs_failed;
        self.flow_files_started += stats.flow_files_started;
        self.flow_files_finished += stats.flow_files_finished;
        if stats.failure {
            self.failed_events += 1;
        }
        if let Some(time) = stats.event_time {
            self.min_event_time = Some(self.min_event_time.map_or(time, |t| t.min(time)));
            self.max_event_time = Some(self.max_event_time.map_or(time, |t| t.max(time)));
        }
    }

    /// Average duration per event, if any events were merged.
    pub fn avg_duration_millis(&self) -> Option<u64> {
        if self.event_count == 0 {
            None
        } else {
            Some(self.total_duration_millis / self.event_count)
        }
    }
}

impl fmt::Display for AggregatedProcessorStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "events={}, jobsStarted={}, jobsFinished={}, jobsFailed={}, bytesIn={}, bytesOut={}, durationMillis={}",
            self.event_count,
            self.jobs_started,
            self.jobs_finished,
            self.jobs_failed,
            self.bytes_in,
            self.bytes_out,
            self.total_duration_millis
        )
    }
}
