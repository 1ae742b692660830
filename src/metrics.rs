//! Prometheus metrics for the media service
//!
//! Every collector is registered on a registry owned by [`MediaMetrics`], so
//! independent instances (one per server, one per test) never collide.

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder};

/// Request, upload and retrieval metrics
#[derive(Clone)]
pub struct MediaMetrics {
    registry: Registry,

    /// HTTP responses by route and status code
    pub http_requests_total: CounterVec,

    /// Upload outcomes (accepted/rejected/failed)
    pub uploads_total: CounterVec,

    /// Retrievals by answering tier (cache/store)
    pub retrievals_total: CounterVec,

    /// Body bytes written to clients
    pub bytes_served_total: IntCounter,

    /// Handler latency by route
    pub request_duration_seconds: HistogramVec,
}

impl MediaMetrics {
    /// Create metrics on a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered on `registry`
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let http_requests_total = CounterVec::new(
            Opts::new("media_http_requests_total", "Total number of HTTP requests"),
            &["route", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let uploads_total = CounterVec::new(
            Opts::new("media_uploads_total", "Total number of uploads by result"),
            &["result"],
        )?;
        registry.register(Box::new(uploads_total.clone()))?;

        let retrievals_total = CounterVec::new(
            Opts::new(
                "media_retrievals_total",
                "Total number of retrievals by answering tier",
            ),
            &["source"],
        )?;
        registry.register(Box::new(retrievals_total.clone()))?;

        let bytes_served_total = IntCounter::new(
            "media_bytes_served_total",
            "Total number of body bytes served",
        )?;
        registry.register(Box::new(bytes_served_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "media_request_duration_seconds",
                "Duration of HTTP request handling in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
            &["route"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            uploads_total,
            retrievals_total,
            bytes_served_total,
            request_duration_seconds,
        })
    }

    pub fn record_request(&self, route: &str, status: u16, duration_secs: f64) {
        self.http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[route])
            .observe(duration_secs);
    }

    pub fn record_upload(&self, result: &str) {
        self.uploads_total.with_label_values(&[result]).inc();
    }

    pub fn record_retrieval(&self, source: &str) {
        self.retrievals_total.with_label_values(&[source]).inc();
    }

    pub fn record_bytes_served(&self, bytes: u64) {
        self.bytes_served_total.inc_by(bytes);
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn content_type(&self) -> &'static str {
        "text/plain; version=0.0.4; charset=utf-8"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_do_not_collide() {
        let a = MediaMetrics::new().unwrap();
        let b = MediaMetrics::new().unwrap();
        a.record_upload("accepted");
        b.record_upload("rejected");

        assert_eq!(a.uploads_total.with_label_values(&["accepted"]).get(), 1.0);
        assert_eq!(b.uploads_total.with_label_values(&["accepted"]).get(), 0.0);
    }

    #[test]
    fn test_render_prometheus_format() {
        let metrics = MediaMetrics::new().unwrap();
        metrics.record_request("video", 206, 0.002);
        metrics.record_retrieval("cache");
        metrics.record_bytes_served(512);

        let output = metrics.render().unwrap();
        assert!(output.contains("# TYPE media_http_requests_total counter"));
        assert!(output.contains("media_http_requests_total{route=\"video\",status=\"206\"} 1"));
        assert!(output.contains("media_retrievals_total{source=\"cache\"} 1"));
        assert!(output.contains("media_bytes_served_total 512"));
        assert!(output.contains("media_request_duration_seconds_bucket"));
    }
}
