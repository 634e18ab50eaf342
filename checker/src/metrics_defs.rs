use shared::metrics_defs::{MetricDef, MetricType};

pub const CHECK_RESULT: MetricDef = MetricDef {
    name: "check.result",
    metric_type: MetricType::Counter,
    description: "Number of config checks evaluated. Tagged with status.",
};

pub const CHECK_DURATION: MetricDef = MetricDef {
    name: "check.duration",
    metric_type: MetricType::Histogram,
    description: "Time to evaluate one target, both fetches included, in seconds.",
};

pub const ARCHIVE_FETCH_DURATION: MetricDef = MetricDef {
    name: "archive.fetch.duration",
    metric_type: MetricType::Histogram,
    description: "Time to fetch an archived config in seconds. Tagged with outcome.",
};

pub const SWITCH_FETCH_DURATION: MetricDef = MetricDef {
    name: "switch.fetch.duration",
    metric_type: MetricType::Histogram,
    description: "Time to fetch a live switch config in seconds. Tagged with outcome.",
};

pub const CACHE_HIT: MetricDef = MetricDef {
    name: "cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of check responses served from the response cache",
};

pub const CACHE_MISS: MetricDef = MetricDef {
    name: "cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of check requests not found in the response cache",
};

pub const CACHE_EVICTION: MetricDef = MetricDef {
    name: "cache.eviction",
    metric_type: MetricType::Counter,
    description: "Number of cached responses evicted to make room for a new one",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of check requests currently being processed",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CHECK_RESULT,
    CHECK_DURATION,
    ARCHIVE_FETCH_DURATION,
    SWITCH_FETCH_DURATION,
    CACHE_HIT,
    CACHE_MISS,
    CACHE_EVICTION,
    REQUESTS_INFLIGHT,
];
