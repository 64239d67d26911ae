//! Prometheus metrics for the orchestrator.
//!
//! All metrics are process-wide singletons created on first update, so a
//! deployment that never streams never exposes token-latency histograms with
//! all-zero buckets. Creation goes through [`OnceLock::get_or_init`]: under
//! concurrent first-touches exactly one registration wins, and updates after
//! creation are lock-free.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use prometheus::{Histogram, HistogramOpts, IntGauge};

struct TokenMetrics {
    first: Histogram,
    inter: Histogram,
}

/// Latency histograms and the pending-request gauge.
pub struct OrchestratorMetrics {
    token: OnceLock<TokenMetrics>,
    request_latency: OnceLock<Histogram>,
    request_pending: OnceLock<IntGauge>,
}

impl OrchestratorMetrics {
    const fn new() -> Self {
        Self {
            token: OnceLock::new(),
            request_latency: OnceLock::new(),
            request_pending: OnceLock::new(),
        }
    }

    /// Observe one token and return the anchor for the next observation.
    ///
    /// The first token of a stream lands in the first-token histogram,
    /// every later one in the inter-token histogram. Both histograms are
    /// created together on the first call.
    pub fn token_update(&self, token_start: Instant, is_first: bool) -> Instant {
        let token = self.token.get_or_init(|| TokenMetrics {
            first: register_histogram(
                "megaservice_first_token_latency",
                "First token latency (histogram)",
            ),
            inter: register_histogram(
                "megaservice_inter_token_latency",
                "Inter-token latency (histogram)",
            ),
        });
        let now = Instant::now();
        let elapsed = now.duration_since(token_start).as_secs_f64();
        if is_first {
            token.first.observe(elapsed);
        } else {
            token.inter.observe(elapsed);
        }
        now
    }

    /// Observe a whole request/reply latency.
    pub fn request_update(&self, req_start: Instant) {
        let histogram = self.request_latency.get_or_init(|| {
            register_histogram(
                "megaservice_request_latency",
                "Whole LLM request/reply latency (histogram)",
            )
        });
        histogram.observe(req_start.elapsed().as_secs_f64());
    }

    /// Increment or decrement the pending-requests gauge.
    pub fn pending_update(&self, increase: bool) {
        let gauge = self.request_pending.get_or_init(|| {
            register_gauge(
                "megaservice_request_pending",
                "Count of currently pending requests (gauge)",
            )
        });
        if increase {
            gauge.inc();
        } else {
            gauge.dec();
        }
    }
}

fn register_histogram(name: &str, help: &str) -> Histogram {
    let histogram =
        Histogram::with_opts(HistogramOpts::new(name, help)).expect("valid histogram opts");
    if let Err(error) = prometheus::default_registry().register(Box::new(histogram.clone())) {
        tracing::error!(metric = name, %error, "failed to register histogram");
    }
    histogram
}

fn register_gauge(name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("valid gauge opts");
    if let Err(error) = prometheus::default_registry().register(Box::new(gauge.clone())) {
        tracing::error!(metric = name, %error, "failed to register gauge");
    }
    gauge
}

static METRICS: OrchestratorMetrics = OrchestratorMetrics::new();

/// The process-wide metrics singleton.
pub fn metrics() -> &'static OrchestratorMetrics {
    &METRICS
}

/// One unit of the pending-requests gauge, held for the lifetime of a
/// request.
///
/// Clones share the unit: the gauge is incremented when the guard is
/// acquired and decremented exactly once, when the last clone drops. The
/// schedule engine hands a clone to every node task and the stream worker,
/// so unary completion, stream close, stream failure, and client
/// abandonment all release the unit on their natural exit path.
#[derive(Clone)]
pub struct PendingGuard {
    _inner: Arc<PendingInner>,
}

struct PendingInner;

impl Drop for PendingInner {
    fn drop(&mut self) {
        metrics().pending_update(false);
    }
}

impl PendingGuard {
    /// Increment the gauge and take ownership of the unit.
    pub fn acquire() -> Self {
        metrics().pending_update(true);
        Self {
            _inner: Arc::new(PendingInner),
        }
    }
}
