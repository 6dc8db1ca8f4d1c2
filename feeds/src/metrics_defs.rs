//! Metrics definitions for the feed handlers.

use shared::metrics_defs::{MetricDef, MetricType};

pub const HANDLERS_ACTIVE: MetricDef = MetricDef {
    name: "handlers.active",
    metric_type: MetricType::Gauge,
    description: "Number of feed handlers running on this replica",
};

pub const HANDLER_CONNECTS: MetricDef = MetricDef {
    name: "handler.connects",
    metric_type: MetricType::Counter,
    description: "Successful connections to a feed endpoint",
};

pub const HANDLER_RECONNECTS: MetricDef = MetricDef {
    name: "handler.reconnects",
    metric_type: MetricType::Counter,
    description: "Reconnect attempts, tagged with the cause",
};

pub const MESSAGES_RECEIVED: MetricDef = MetricDef {
    name: "messages.received",
    metric_type: MetricType::Counter,
    description: "Messages read from feed connections",
};

pub const MESSAGES_SKIPPED: MetricDef = MetricDef {
    name: "messages.skipped",
    metric_type: MetricType::Counter,
    description: "Messages dropped because one or more fields failed conversion",
};

pub const EVENTS_PUBLISHED: MetricDef = MetricDef {
    name: "events.published",
    metric_type: MetricType::Counter,
    description: "Events acknowledged by the publish API",
};

pub const PUBLISH_DURATION: MetricDef = MetricDef {
    name: "events.publish.duration",
    metric_type: MetricType::Histogram,
    description: "Time to publish one event in seconds, including retries",
};

pub const RESUME_DURATION: MetricDef = MetricDef {
    name: "registry.resume.duration",
    metric_type: MetricType::Histogram,
    description: "Time to resume all feeds owned by this replica in seconds",
};

// TODO: all metrics must be added here for now, this can be done dynamically with a macro in the future.
pub const ALL_METRICS: &[MetricDef] = &[
    HANDLERS_ACTIVE,
    HANDLER_CONNECTS,
    HANDLER_RECONNECTS,
    MESSAGES_RECEIVED,
    MESSAGES_SKIPPED,
    EVENTS_PUBLISHED,
    PUBLISH_DURATION,
    RESUME_DURATION,
];
