//! Metrics definitions for the latest builds service.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

#[macro_export]
macro_rules! counter {
    ($def:expr $(, $($labels:tt)*)?) => {
        ::metrics::counter!($def.name $(, $($labels)*)?)
    };
}

#[macro_export]
macro_rules! gauge {
    ($def:expr $(, $($labels:tt)*)?) => {
        ::metrics::gauge!($def.name $(, $($labels)*)?)
    };
}

#[macro_export]
macro_rules! histogram {
    ($def:expr $(, $($labels:tt)*)?) => {
        ::metrics::histogram!($def.name $(, $($labels)*)?)
    };
}

pub const REFRESH_RUNS: MetricDef = MetricDef {
    name: "refresh.runs",
    metric_type: MetricType::Counter,
    description: "Refresh runs, tagged by outcome",
};

pub const REFRESH_DURATION: MetricDef = MetricDef {
    name: "refresh.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a refresh run in seconds",
};

pub const FETCH_FAILED: MetricDef = MetricDef {
    name: "source.fetch.failed",
    metric_type: MetricType::Counter,
    description: "Failed downloads of the builds spreadsheet",
};

pub const FALLBACK_USED: MetricDef = MetricDef {
    name: "source.fallback",
    metric_type: MetricType::Counter,
    description: "Refresh runs that used the previously stored raw CSV",
};

pub const BLOB_STORE_FAILED: MetricDef = MetricDef {
    name: "blob.store.failed",
    metric_type: MetricType::Counter,
    description: "Failed blob writes, tagged by blob",
};

pub const LATEST_BUILDS_ENTRIES: MetricDef = MetricDef {
    name: "latest_builds.entries",
    metric_type: MetricType::Gauge,
    description: "Number of product lines in the last derived document",
};

pub const API_REQUESTS: MetricDef = MetricDef {
    name: "api.requests",
    metric_type: MetricType::Counter,
    description: "Requests to the latest builds endpoint, tagged by status",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REFRESH_RUNS,
    REFRESH_DURATION,
    FETCH_FAILED,
    FALLBACK_USED,
    BLOB_STORE_FAILED,
    LATEST_BUILDS_ENTRIES,
    API_REQUESTS,
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_metric_names_unique() {
        let names: HashSet<&str> = ALL_METRICS.iter().map(|m| m.name).collect();
        assert_eq!(names.len(), ALL_METRICS.len());
        assert!(ALL_METRICS.iter().all(|m| !m.description.is_empty()));
    }
}
