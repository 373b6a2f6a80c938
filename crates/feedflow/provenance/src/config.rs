//! Streaming thresholds for a feed processor aggregate.

use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};

/// Timing thresholds that decide whether a processor behaves as a stream.
///
/// A run of completion events is a stream once `stream_threshold_count`
/// consecutive events each arrive less than `allowed_gap_millis` after the
/// previous one. Both values are required; there is no default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Maximum gap between two events that still counts towards a stream.
    pub allowed_gap_millis: u64,
    /// Number of closely spaced events that makes a stream.
    pub stream_threshold_count: u32,
}

impl StreamConfig {
    /// Create a validated configuration.
    pub fn new(allowed_gap_millis: u64, stream_threshold_count: u32) -> StreamResult<Self> {
        let config = Self {
            allowed_gap_millis,
            stream_threshold_count,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject thresholds that would make every event a stream or none, and
    /// gaps beyond the i64 milliseconds a chrono duration can hold.
    pub fn validate(&self) -> StreamResult<()> {
        if self.allowed_gap_millis == 0 {
            return Err(StreamError::invalid_config(
                "allowed_gap_millis",
                "must be greater than zero",
            ));
        }
        if self.stream_threshold_count == 0 {
            return Err(StreamError::invalid_config(
                "stream_threshold_count",
                "must be greater than zero",
            ));
        }
        // chrono durations are bounded by i64 milliseconds
        if i64::try_from(self.allowed_gap_millis).is_err() {
            return Err(StreamError::invalid_config(
                "allowed_gap_millis",
                format!("{} exceeds the supported range", self.allowed_gap_millis),
            ));
        }
        Ok(())
    }

    /// The allowed gap as a chrono duration.
    pub fn allowed_gap(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.allowed_gap_millis as i64)
    }
}
