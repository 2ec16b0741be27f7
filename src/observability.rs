use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("teeprompt.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("teeprompt.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("teeprompt.client.request_duration_seconds");
pub(crate) static CLIENT_DISCOVERY_FAILURES: Counter =
    Counter::new("teeprompt.client.discovery_failures");

pub(crate) static STREAM_EVENTS: Counter = Counter::new("teeprompt.stream.events");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("teeprompt.stream.errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("teeprompt.stream.bytes");
pub(crate) static STREAM_TTFB: Moments = Moments::new("teeprompt.stream.ttfb_seconds");
pub(crate) static STREAM_DURATION: Moments = Moments::new("teeprompt.stream.duration_seconds");

pub(crate) static STOP_MARKERS_SEEN: Counter = Counter::new("teeprompt.stop.markers_seen");

pub(crate) static SESSIONS: Counter = Counter::new("teeprompt.session.runs");
pub(crate) static SESSIONS_INTERRUPTED: Counter = Counter::new("teeprompt.session.interrupted");
pub(crate) static SESSIONS_FAILED: Counter = Counter::new("teeprompt.session.failed");

pub(crate) static AUDIT_RECORDS: Counter = Counter::new("teeprompt.audit.records");
pub(crate) static AUDIT_FAILURES: Counter = Counter::new("teeprompt.audit.failures");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);
    collector.register_counter(&CLIENT_DISCOVERY_FAILURES);

    collector.register_counter(&STREAM_EVENTS);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_moments(&STREAM_TTFB);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&STOP_MARKERS_SEEN);

    collector.register_counter(&SESSIONS);
    collector.register_counter(&SESSIONS_INTERRUPTED);
    collector.register_counter(&SESSIONS_FAILED);

    collector.register_counter(&AUDIT_RECORDS);
    collector.register_counter(&AUDIT_FAILURES);
}
