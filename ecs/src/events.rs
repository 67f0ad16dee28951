use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::sync::Arc;

use tokio::time::Instant;

/// Capability trait for event payloads.
///
/// An event is a transient datum produced in frame N and consumed in
/// frame N+1, keyed by `(event type, key id)`. The key id lets callers
/// mark logically independent occurrences of the same event type (for
/// example one per entity) so they can share a batch; repeated
/// occurrences of the same key are spread across batches in insertion
/// order.
pub trait Event: Send + Sync + 'static {}

/// Identity of an event stream: the payload type plus a caller-supplied id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EventKey {
    pub(crate) event_type: TypeId,
    pub(crate) key: u64,
}

/// One inserted event, with the monotonic insertion timestamp that
/// drives batching.
#[derive(Clone)]
pub(crate) struct EventRecord {
    pub(crate) key: EventKey,
    pub(crate) type_name: &'static str,
    pub(crate) payload: Arc<dyn Any + Send + Sync>,
    pub(crate) inserted_at: Instant,
}

impl EventRecord {
    pub(crate) fn new<E: Event>(key: u64, event: E) -> Self {
        Self::new_at(key, event, Instant::now())
    }

    pub(crate) fn new_at<E: Event>(key: u64, event: E, inserted_at: Instant) -> Self {
        Self {
            key: EventKey {
                event_type: TypeId::of::<E>(),
                key,
            },
            type_name: std::any::type_name::<E>(),
            payload: Arc::new(event),
            inserted_at,
        }
    }
}

impl std::fmt::Debug for EventRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventRecord({}#{})", self.type_name, self.key.key)
    }
}

/// A set of events that may be processed together.
///
/// Within one batch every `(event type, key id)` pair occurs at most
/// once. Systems receive the frame's batches in order through
/// [`FrameData::event_batches`](crate::FrameData::event_batches).
#[derive(Debug, Clone, Default)]
pub struct EventBatch {
    records: Vec<EventRecord>,
}

impl EventBatch {
    /// Returns the number of events in this batch (across all types).
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns whether the batch holds no events.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over the payloads of type `E` in this batch.
    pub fn events<E: Event>(&self) -> impl Iterator<Item = &E> {
        self.keyed_events::<E>().map(|(_, event)| event)
    }

    /// Iterates over `(key id, payload)` pairs of type `E` in this batch.
    pub fn keyed_events<E: Event>(&self) -> impl Iterator<Item = (u64, &E)> {
        self.records.iter().filter_map(|record| {
            record
                .payload
                .downcast_ref::<E>()
                .map(|event| (record.key.key, event))
        })
    }
}

/// Splits a frame's drained events into ordered batches.
///
/// Records are sorted by insertion instant (stable, so same-instant
/// records keep insertion order), then batches are peeled off the
/// front: each batch takes the first occurrence of every distinct key
/// in the remainder. Two events with the same key therefore land in
/// distinct batches, earlier-inserted first, while distinct keys
/// inserted at the same instant share a batch.
pub(crate) fn batch_events(mut records: Vec<EventRecord>) -> Vec<EventBatch> {
    records.sort_by_key(|record| record.inserted_at);

    let mut batches = Vec::new();
    while !records.is_empty() {
        let mut seen: HashSet<EventKey> = HashSet::new();
        let mut batch = Vec::new();
        let mut rest = Vec::new();
        for record in records.drain(..) {
            if seen.insert(record.key) {
                batch.push(record);
            } else {
                rest.push(record);
            }
        }
        batches.push(EventBatch { records: batch });
        records = rest;
    }
    batches
}

/// Initial events handed to [`World::spawn`](crate::World::spawn).
///
/// They are batched into the frame data the startup systems run
/// against, before the first frame begins.
#[derive(Default)]
pub struct StartupEvents {
    records: Vec<EventRecord>,
}

impl StartupEvents {
    /// Creates an empty startup-event list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event under the given key id.
    pub fn with<E: Event>(mut self, key: u64, event: E) -> Self {
        self.records.push(EventRecord::new(key, event));
        self
    }

    pub(crate) fn into_records(self) -> Vec<EventRecord> {
        self.records
    }
}
