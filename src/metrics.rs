use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,
    http_requests: IntCounterVec,
    provider_selections: IntCounterVec,
    render_results: IntCounterVec,
    fallbacks: IntCounterVec,
    upstream_failures: IntCounterVec,
    capture_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let http_requests = IntCounterVec::new(
            Opts::new(
                "gateway_http_requests_total",
                "HTTP request count by route group and status",
            ),
            &["route_group", "status"],
        )
        .expect("http_requests_total");
        let provider_selections = IntCounterVec::new(
            Opts::new(
                "gateway_provider_selections_total",
                "Provider selections by provider and kind",
            ),
            &["provider", "kind"],
        )
        .expect("provider_selections_total");
        let render_results = IntCounterVec::new(
            Opts::new(
                "gateway_render_results_total",
                "Render requests by result class",
            ),
            &["result"],
        )
        .expect("render_results_total");
        let fallbacks = IntCounterVec::new(
            Opts::new("gateway_fallbacks_total", "Fallback responses by reason"),
            &["reason"],
        )
        .expect("fallbacks_total");
        let upstream_failures = IntCounterVec::new(
            Opts::new(
                "gateway_upstream_failures_total",
                "Upstream data-fetch failures by provider",
            ),
            &["provider"],
        )
        .expect("upstream_failures_total");
        let capture_duration = HistogramVec::new(
            HistogramOpts::new(
                "gateway_capture_duration_seconds",
                "Branch execution duration by provider kind",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0]),
            &["kind"],
        )
        .expect("capture_duration_seconds");
        registry
            .register(Box::new(http_requests.clone()))
            .expect("register http_requests");
        registry
            .register(Box::new(provider_selections.clone()))
            .expect("register provider_selections");
        registry
            .register(Box::new(render_results.clone()))
            .expect("register render_results");
        registry
            .register(Box::new(fallbacks.clone()))
            .expect("register fallbacks");
        registry
            .register(Box::new(upstream_failures.clone()))
            .expect("register upstream_failures");
        registry
            .register(Box::new(capture_duration.clone()))
            .expect("register capture_duration");
        Metrics {
            registry,
            http_requests,
            provider_selections,
            render_results,
            fallbacks,
            upstream_failures,
            capture_duration,
        }
    }

    pub fn request(&self, route_group: &str, status: u16) {
        self.http_requests
            .with_label_values(&[route_group, &status.to_string()])
            .inc();
    }

    pub fn selection(&self, provider: &str, kind: &str) {
        self.provider_selections
            .with_label_values(&[provider, kind])
            .inc();
    }

    pub fn result(&self, class: &str) {
        self.render_results.with_label_values(&[class]).inc();
    }

    pub fn fallback(&self, reason: &str) {
        self.fallbacks.with_label_values(&[reason]).inc();
    }

    pub fn upstream_failure(&self, provider: &str) {
        self.upstream_failures.with_label_values(&[provider]).inc();
    }

    pub fn observe_capture(&self, kind: &str, seconds: f64) {
        self.capture_duration
            .with_label_values(&[kind])
            .observe(seconds);
    }

    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}
