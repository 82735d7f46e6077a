use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, Counter};

struct TrackedCounter {
    value: AtomicU64,
    counter: Counter,
}

impl TrackedCounter {
    fn new(metric_name: &'static str, component_id: &str) -> Self {
        Self {
            value: AtomicU64::new(0),
            counter: counter!(metric_name, "component_id" => component_id.to_string()),
        }
    }

    fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
        self.counter.increment(1);
    }

    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Per-transport ingest statistics.
///
/// Every counter is kept locally, for [`snapshot`][Self::snapshot], and also emitted through the `metrics` facade with
/// a `component_id` label.
pub struct TransportStatistics {
    events_received: TrackedCounter,
    events_dropped_not_started: TrackedCounter,
    documents_inserted: TrackedCounter,
    decode_errors: TrackedCounter,
    parse_errors: TrackedCounter,
    insert_errors: TrackedCounter,
}

impl TransportStatistics {
    /// Creates a new `TransportStatistics` for the given component.
    pub fn new(component_id: &str) -> Self {
        Self {
            events_received: TrackedCounter::new("transport_events_received_total", component_id),
            events_dropped_not_started: TrackedCounter::new("transport_events_dropped_not_started_total", component_id),
            documents_inserted: TrackedCounter::new("transport_documents_inserted_total", component_id),
            decode_errors: TrackedCounter::new("transport_decode_errors_total", component_id),
            parse_errors: TrackedCounter::new("transport_parse_errors_total", component_id),
            insert_errors: TrackedCounter::new("transport_insert_errors_total", component_id),
        }
    }

    pub(crate) fn event_received(&self) {
        self.events_received.increment();
    }

    pub(crate) fn event_dropped_not_started(&self) {
        self.events_dropped_not_started.increment();
    }

    pub(crate) fn document_inserted(&self) {
        self.documents_inserted.increment();
    }

    pub(crate) fn decode_error(&self) {
        self.decode_errors.increment();
    }

    pub(crate) fn parse_error(&self) {
        self.parse_errors.increment();
    }

    pub(crate) fn insert_error(&self) {
        self.insert_errors.increment();
    }

    /// Returns a point-in-time copy of the counters.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            events_received: self.events_received.get(),
            events_dropped_not_started: self.events_dropped_not_started.get(),
            documents_inserted: self.documents_inserted.get(),
            decode_errors: self.decode_errors.get(),
            parse_errors: self.parse_errors.get(),
            insert_errors: self.insert_errors.get(),
        }
    }
}

/// A point-in-time copy of [`TransportStatistics`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StatisticsSnapshot {
    /// Events handed to the transport.
    pub events_received: u64,

    /// Events dropped because the transport was not started.
    pub events_dropped_not_started: u64,

    /// Documents successfully inserted.
    pub documents_inserted: u64,

    /// Events dropped because they could not be decoded.
    pub decode_errors: u64,

    /// Events dropped because they could not be parsed.
    pub parse_errors: u64,

    /// Events dropped because the insert failed.
    pub insert_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let statistics = TransportStatistics::new("test");
        statistics.event_received();
        statistics.event_received();
        statistics.document_inserted();
        statistics.parse_error();

        assert_eq!(
            statistics.snapshot(),
            StatisticsSnapshot {
                events_received: 2,
                documents_inserted: 1,
                parse_errors: 1,
                ..Default::default()
            }
        );
    }
}
