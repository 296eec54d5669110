//! Metrics definitions for the sponsorship service.

use shared::metrics_defs::{MetricDef, MetricType};

pub const ASSIGNMENT_REQUESTS: MetricDef = MetricDef {
    name: "assignment.requests",
    metric_type: MetricType::Counter,
    description: "Assignment requests handled. Tagged with outcome.",
};

pub const ASSIGNMENTS_INFLIGHT: MetricDef = MetricDef {
    name: "assignment.inflight",
    metric_type: MetricType::Gauge,
    description: "Assignment requests currently being processed",
};

pub const IDENTIFIERS_MATCHED: MetricDef = MetricDef {
    name: "assignment.identifiers.matched",
    metric_type: MetricType::Counter,
    description: "Requested identifiers that matched a feature and were assigned",
};

pub const IDENTIFIERS_UNMATCHED: MetricDef = MetricDef {
    name: "assignment.identifiers.unmatched",
    metric_type: MetricType::Counter,
    description: "Requested identifiers with no matching feature",
};

pub const WRITE_RETRIES: MetricDef = MetricDef {
    name: "assignment.write.retries",
    metric_type: MetricType::Counter,
    description: "Conditional writes that had to be retried. Tagged with reason.",
};

pub const STORE_REQUEST_DURATION: MetricDef = MetricDef {
    name: "store.request.duration",
    metric_type: MetricType::Histogram,
    description: "Store request duration in seconds. Tagged with operation.",
};

pub const UPLOAD_BYTES: MetricDef = MetricDef {
    name: "upload.bytes",
    metric_type: MetricType::Histogram,
    description: "Size of uploaded datasets in bytes. Tagged with target.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    ASSIGNMENT_REQUESTS,
    ASSIGNMENTS_INFLIGHT,
    IDENTIFIERS_MATCHED,
    IDENTIFIERS_UNMATCHED,
    WRITE_RETRIES,
    STORE_REQUEST_DURATION,
    UPLOAD_BYTES,
];
