//! Downstream hand-off boundary for drained events.

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::StreamResult;
use crate::event::SharedEvent;

/// Receives each non-empty drain of a feed processor aggregate.
///
/// Implementations own transport semantics; the aggregate only guarantees
/// that one drain never repeats an event.
#[async_trait]
pub trait DispatchSink: Send + Sync {
    async fn publish(
        &self,
        feed_name: &str,
        processor_id: &str,
        events: Vec<SharedEvent>,
    ) -> StreamResult<()>;
}

/// One published batch, as recorded by [`MemoryDispatchSink`].
#[derive(Clone, Debug)]
pub struct PublishedBatch {
    pub feed_name: String,
    pub processor_id: String,
    pub events: Vec<SharedEvent>,
}

/// In-memory sink for testing
#[derive(Debug, Default)]
pub struct MemoryDispatchSink {
    batches: RwLock<Vec<PublishedBatch>>,
}

impl MemoryDispatchSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch published so far, in order.
    pub fn batches(&self) -> Vec<PublishedBatch> {
        self.batches.read().clone()
    }

    /// Total events across all batches.
    pub fn event_count(&self) -> usize {
        self.batches.read().iter().map(|b| b.events.len()).sum()
    }

    /// Forget all published batches.
    pub fn clear(&self) {
        self.batches.write().clear();
    }
}

#[async_trait]
impl DispatchSink for MemoryDispatchSink {
    async fn publish(
        &self,
        feed_name: &str,
        processor_id: &str,
        events: Vec<SharedEvent>,
    ) -> StreamResult<()> {
        self.batches.write().push(PublishedBatch {
            feed_name: feed_name.to_string(),
            processor_id: processor_id.to_string(),
            events,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventRecord, EventType};
    use crate::lineage::LineageId;

    #[tokio::test]
    async fn memory_sink_records_batches() {
        let sink = MemoryDispatchSink::new();
        let event = EventRecord::builder(1, "ff", LineageId::from_raw(0))
            .event_type(EventType::Drop)
            .build_shared();

        sink.publish("cat.feed", "proc-1", vec![event]).await.unwrap();
        sink.publish("cat.feed", "proc-1", vec![]).await.unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].feed_name, "cat.feed");
        assert_eq!(sink.event_count(), 1);

        sink.clear();
        assert!(sink.batches().is_empty());
    }
}
