//! Lineage roots: the job-wide stream/batch classification.
//!
//! Roots live in an arena ([`LineageGraph`]) and are addressed by
//! [`LineageId`] handles, so fan-out/fan-in sibling relations are plain
//! handle sets rather than shared references.
//!
//! A root starts `Unset`, may become `Stream` or `Batch`, and once `Batch`
//! stays `Batch`. `Stream` turns into `Batch` only through the sibling
//! override in [`LineageGraph::override_stream_with_batch_sibling`].

use std::collections::BTreeSet;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::event::SharedEvent;

/// Handle to a lineage root inside a [`LineageGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineageId(usize);

impl LineageId {
    /// Rebuild a handle from its index.
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Index of the root inside its graph.
    pub fn as_raw(&self) -> usize {
        self.0
    }
}

impl fmt::Display for LineageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lineage-{}", self.0)
    }
}

/// Classification fixed by the first decided event of a job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FirstEventType {
    #[default]
    Unset,
    Stream,
    Batch,
}

#[derive(Debug)]
struct LineageNode {
    job_unit_id: String,
    first_event_type: FirstEventType,
    completed_events: Vec<SharedEvent>,
    related: BTreeSet<LineageId>,
}

/// Arena of lineage roots shared between the provenance pipeline and the
/// aggregates that classify its events.
///
/// Looking up a handle that was not issued by this graph is a contract
/// violation and panics.
#[derive(Debug, Default)]
pub struct LineageGraph {
    nodes: RwLock<Vec<LineageNode>>,
}

impl LineageGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the root job unit of a new job.
    pub fn insert_root(&self, job_unit_id: impl Into<String>) -> LineageId {
        let mut nodes = self.nodes.write();
        let id = LineageId(nodes.len());
        nodes.push(LineageNode {
            job_unit_id: job_unit_id.into(),
            first_event_type: FirstEventType::Unset,
            completed_events: Vec::new(),
            related: BTreeSet::new(),
        });
        id
    }

    /// Relate two roots produced by a fan-out or fan-in. Relations are
    /// symmetric; relating a root to itself is ignored.
    pub fn relate(&self, a: LineageId, b: LineageId) {
        let mut nodes = self.nodes.write();
        check_handle(&nodes, a);
        check_handle(&nodes, b);
        if a == b {
            return;
        }
        nodes[a.0].related.insert(b);
        nodes[b.0].related.insert(a);
    }

    /// Record an event the pipeline considers complete for this lineage.
    pub fn record_completed_event(&self, id: LineageId, event: SharedEvent) {
        let mut nodes = self.nodes.write();
        check_handle(&nodes, id);
        nodes[id.0].completed_events.push(event);
    }

    /// Current classification of the root.
    pub fn first_event_type(&self, id: LineageId) -> FirstEventType {
        let nodes = self.nodes.read();
        check_handle(&nodes, id);
        nodes[id.0].first_event_type
    }

    /// Whether the root is classified as a stream.
    pub fn is_stream(&self, id: LineageId) -> bool {
        self.first_event_type(id) == FirstEventType::Stream
    }

    /// Whether the root is classified as a batch.
    pub fn is_batch(&self, id: LineageId) -> bool {
        self.first_event_type(id) == FirstEventType::Batch
    }

    /// Id of the root job unit.
    pub fn root_job_unit_id(&self, id: LineageId) -> String {
        let nodes = self.nodes.read();
        check_handle(&nodes, id);
        nodes[id.0].job_unit_id.clone()
    }

    /// Whether `job_unit_id` is the root job unit of `id`.
    pub fn is_root_job_unit(&self, id: LineageId, job_unit_id: &str) -> bool {
        let nodes = self.nodes.read();
        check_handle(&nodes, id);
        nodes[id.0].job_unit_id == job_unit_id
    }

    /// Roots related to `id` by fan-out or fan-in, in handle order.
    pub fn related_roots(&self, id: LineageId) -> Vec<LineageId> {
        let nodes = self.nodes.read();
        check_handle(&nodes, id);
        nodes[id.0].related.iter().copied().collect()
    }

    /// Events recorded as complete for this lineage, in arrival order.
    pub fn completed_events(&self, id: LineageId) -> Vec<SharedEvent> {
        let nodes = self.nodes.read();
        check_handle(&nodes, id);
        nodes[id.0].completed_events.clone()
    }

    /// Number of roots.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether no root was registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Fix the lineage as a stream unless it is already a batch.
    /// Returns the resulting classification.
    pub(crate) fn mark_stream(&self, id: LineageId) -> FirstEventType {
        let mut nodes = self.nodes.write();
        check_handle(&nodes, id);
        let node = &mut nodes[id.0];
        if node.first_event_type != FirstEventType::Batch {
            node.first_event_type = FirstEventType::Stream;
        }
        node.first_event_type
    }

    pub(crate) fn mark_batch(&self, id: LineageId) {
        let mut nodes = self.nodes.write();
        check_handle(&nodes, id);
        nodes[id.0].first_event_type = FirstEventType::Batch;
    }

    /// If `id` is a stream but one of its siblings is a batch, reclassify it
    /// as a batch and return its completed events for re-delivery.
    pub(crate) fn override_stream_with_batch_sibling(
        &self,
        id: LineageId,
    ) -> Option<Vec<SharedEvent>> {
        let mut nodes = self.nodes.write();
        check_handle(&nodes, id);
        if nodes[id.0].first_event_type != FirstEventType::Stream {
            return None;
        }
        let has_batch_sibling = nodes[id.0].related.iter().any(|sibling| {
            nodes
                .get(sibling.0)
                .is_some_and(|n| n.first_event_type == FirstEventType::Batch)
        });
        if !has_batch_sibling {
            return None;
        }
        let node = &mut nodes[id.0];
        node.first_event_type = FirstEventType::Batch;
        Some(node.completed_events.clone())
    }
}

fn check_handle(nodes: &[LineageNode], id: LineageId) {
    if id.0 >= nodes.len() {
        panic!(
            "unknown lineage handle {} (graph holds {} roots)",
            id,
            nodes.len()
        );
    }
}
