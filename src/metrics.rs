//! Metrics collection and export module

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Submission pipeline
    pub submissions_total: IntCounterVec,
    pub submission_outcomes: IntCounterVec,
    pub submission_errors: IntCounterVec,
    pub submissions_inflight: IntGauge,

    // Nonce allocator
    pub nonce_allocations: IntCounter,
    pub nonce_resyncs: IntCounter,
    pub nonce_invalidations: IntCounter,

    // Endpoint pool
    pub endpoint_rotations: IntCounterVec,

    // Stream supervisor
    pub stream_connects: IntCounter,
    pub stream_connect_failures: IntCounter,
    pub stream_closes: IntCounter,
    pub stream_stalls: IntCounter,
    pub candidates_seen: IntCounter,
    pub candidates_admitted: IntCounter,
    pub candidates_matched: IntCounter,

    // Histograms
    pub confirmation_latency: Histogram,
    pub rpc_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let submissions_total = IntCounterVec::new(
            Opts::new("submissions_total", "Submissions attempted, by kind"),
            &["kind"],
        )?;

        let submission_outcomes = IntCounterVec::new(
            Opts::new(
                "submission_outcomes_total",
                "Terminal submission outcomes, by kind and outcome",
            ),
            &["kind", "outcome"],
        )?;

        let submission_errors = IntCounterVec::new(
            Opts::new(
                "submission_errors_total",
                "Submission errors, by classified reason",
            ),
            &["reason"],
        )?;

        let submissions_inflight = IntGauge::with_opts(Opts::new(
            "submissions_inflight",
            "Submissions between nonce allocation and terminal outcome",
        ))?;

        let nonce_allocations = IntCounter::with_opts(Opts::new(
            "nonce_allocations_total",
            "Sequence numbers handed out by the allocator",
        ))?;

        let nonce_resyncs = IntCounter::with_opts(Opts::new(
            "nonce_resyncs_total",
            "Network round trips made to refresh the account nonce",
        ))?;

        let nonce_invalidations = IntCounter::with_opts(Opts::new(
            "nonce_invalidations_total",
            "Transitions of the allocator into the unknown state",
        ))?;

        let endpoint_rotations = IntCounterVec::new(
            Opts::new("endpoint_rotations_total", "Endpoint rotations, by kind"),
            &["kind"],
        )?;

        let stream_connects = IntCounter::with_opts(Opts::new(
            "stream_connects_total",
            "Successful pending-transaction subscriptions",
        ))?;

        let stream_connect_failures = IntCounter::with_opts(Opts::new(
            "stream_connect_failures_total",
            "Failed subscription attempts",
        ))?;

        let stream_closes = IntCounter::with_opts(Opts::new(
            "stream_closes_total",
            "Subscriptions closed by the transport",
        ))?;

        let stream_stalls = IntCounter::with_opts(Opts::new(
            "stream_stalls_total",
            "Subscriptions torn down by the liveness check",
        ))?;

        let candidates_seen = IntCounter::with_opts(Opts::new(
            "candidates_seen_total",
            "Pending transaction hashes received",
        ))?;

        let candidates_admitted = IntCounter::with_opts(Opts::new(
            "candidates_admitted_total",
            "Pending transactions passing the sampling filter",
        ))?;

        let candidates_matched = IntCounter::with_opts(Opts::new(
            "candidates_matched_total",
            "Pending transactions passing the opportunity predicate",
        ))?;

        let confirmation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "confirmation_latency_seconds",
                "Time from acceptance to inclusion receipt",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;

        let rpc_latency = Histogram::with_opts(
            HistogramOpts::new("rpc_latency_seconds", "RPC call latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(submissions_total.clone()))?;
        registry.register(Box::new(submission_outcomes.clone()))?;
        registry.register(Box::new(submission_errors.clone()))?;
        registry.register(Box::new(submissions_inflight.clone()))?;
        registry.register(Box::new(nonce_allocations.clone()))?;
        registry.register(Box::new(nonce_resyncs.clone()))?;
        registry.register(Box::new(nonce_invalidations.clone()))?;
        registry.register(Box::new(endpoint_rotations.clone()))?;
        registry.register(Box::new(stream_connects.clone()))?;
        registry.register(Box::new(stream_connect_failures.clone()))?;
        registry.register(Box::new(stream_closes.clone()))?;
        registry.register(Box::new(stream_stalls.clone()))?;
        registry.register(Box::new(candidates_seen.clone()))?;
        registry.register(Box::new(candidates_admitted.clone()))?;
        registry.register(Box::new(candidates_matched.clone()))?;
        registry.register(Box::new(confirmation_latency.clone()))?;
        registry.register(Box::new(rpc_latency.clone()))?;

        Ok(Self {
            registry,
            submissions_total,
            submission_outcomes,
            submission_errors,
            submissions_inflight,
            nonce_allocations,
            nonce_resyncs,
            nonce_invalidations,
            endpoint_rotations,
            stream_connects,
            stream_connect_failures,
            stream_closes,
            stream_stalls,
            candidates_seen,
            candidates_admitted,
            candidates_matched,
            confirmation_latency,
            rpc_latency,
        })
    }

    /// Render the registry in the Prometheus text exposition format
    pub fn export(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_export_contains_registered_families() {
        let m = Metrics::new().unwrap();
        m.nonce_resyncs.inc();
        m.endpoint_rotations.with_label_values(&["streaming"]).inc();

        let text = m.export().unwrap();
        assert!(text.contains("nonce_resyncs_total 1"));
        assert!(text.contains("endpoint_rotations_total{kind=\"streaming\"} 1"));
    }
}
