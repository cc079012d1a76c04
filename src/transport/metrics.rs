//! Per-route request counters for the HTTP transport, exported in the
//! Prometheus text format on `GET /metrics`.

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub const METRICS_ROUTE: &str = "/metrics";
pub const DEFAULT_NAMESPACE: &str = "http";
/// Path label for requests no route matched.
pub const UNMATCHED_PATH: &str = "unmatched";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SeriesKey {
    code: u16,
    method: String,
    path: String,
}

#[derive(Debug, Default, Clone, Copy)]
struct Series {
    requests: u64,
    seconds: f64,
}

#[derive(Debug)]
pub struct RequestMetrics {
    namespace: String,
    series: Mutex<BTreeMap<SeriesKey, Series>>,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            series: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn observe(&self, method: &str, path: &str, code: u16, elapsed: Duration) {
        let key = SeriesKey {
            code,
            method: method.to_string(),
            path: path.to_string(),
        };
        let mut series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = series.entry(key).or_default();
        entry.requests += 1;
        entry.seconds += elapsed.as_secs_f64();
    }

    pub fn requests(&self, method: &str, path: &str, code: u16) -> u64 {
        let key = SeriesKey {
            code,
            method: method.to_string(),
            path: path.to_string(),
        };
        let series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        series.get(&key).map(|s| s.requests).unwrap_or(0)
    }

    pub fn total_requests(&self) -> u64 {
        let series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        series.values().map(|s| s.requests).sum()
    }

    pub fn render(&self) -> String {
        let series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        let ns = &self.namespace;
        let mut out = String::new();

        let _ = writeln!(
            out,
            "# HELP {ns}_requests_total How many HTTP requests processed, partitioned by status code, method and path."
        );
        let _ = writeln!(out, "# TYPE {ns}_requests_total counter");
        for (key, value) in series.iter() {
            let _ = writeln!(out, "{ns}_requests_total{{{}}} {}", labels(key), value.requests);
        }

        let _ = writeln!(
            out,
            "# HELP {ns}_request_duration_seconds Time spent serving HTTP requests."
        );
        let _ = writeln!(out, "# TYPE {ns}_request_duration_seconds summary");
        for (key, value) in series.iter() {
            let _ = writeln!(
                out,
                "{ns}_request_duration_seconds_sum{{{}}} {}",
                labels(key),
                value.seconds
            );
            let _ = writeln!(
                out,
                "{ns}_request_duration_seconds_count{{{}}} {}",
                labels(key),
                value.requests
            );
        }
        out
    }
}

impl Default for RequestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn labels(key: &SeriesKey) -> String {
    format!(
        "code=\"{}\",method=\"{}\",path=\"{}\"",
        key.code,
        escape(&key.method),
        escape(&key.path)
    )
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// axum middleware recording one observation per request.
pub(crate) async fn track(
    State(metrics): State<Arc<RequestMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_PATH.to_string());
    let started = Instant::now();
    let response = next.run(request).await;
    metrics.observe(&method, &path, response.status().as_u16(), started.elapsed());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_groups_by_code_method_and_path() {
        let metrics = RequestMetrics::with_namespace("svc");
        metrics.observe("GET", "/items/:id", 200, Duration::from_millis(5));
        metrics.observe("GET", "/items/:id", 200, Duration::from_millis(5));
        metrics.observe("GET", "/items/:id", 404, Duration::from_millis(1));

        assert_eq!(metrics.requests("GET", "/items/:id", 200), 2);
        assert_eq!(metrics.total_requests(), 3);

        let text = metrics.render();
        assert!(text.contains("# TYPE svc_requests_total counter"));
        assert!(text.contains("svc_requests_total{code=\"200\",method=\"GET\",path=\"/items/:id\"} 2"));
        assert!(text.contains("svc_requests_total{code=\"404\",method=\"GET\",path=\"/items/:id\"} 1"));
        assert!(text.contains("svc_request_duration_seconds_count{code=\"200\",method=\"GET\",path=\"/items/:id\"} 2"));
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(escape("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
    }
}
