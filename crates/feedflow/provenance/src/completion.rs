//! Which provenance events count as completions for classification.

use crate::event::{EventRecord, EventType};

/// Pluggable completion predicate.
pub type CompletionPredicate = fn(&EventRecord) -> bool;

/// Bookkeeping event types that happen mid-flow and never finish work.
const INTERMEDIATE_EVENT_TYPES: [EventType; 6] = [
    EventType::Clone,
    EventType::Fork,
    EventType::Join,
    EventType::Route,
    EventType::AttributesModified,
    EventType::AddInfo,
];

/// Default predicate: everything except intermediate bookkeeping events.
pub fn is_completion_event(event: &EventRecord) -> bool {
    !INTERMEDIATE_EVENT_TYPES.contains(&event.event_type())
}
