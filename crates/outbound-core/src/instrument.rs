//! Operation and transport level instrumentation.
//!
//! Metric sinks are plain trait objects handed in at construction. Both
//! instruments are silent when they are configured with too few label names.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::errors::ServiceError;
use crate::service::Service;

/// Monotonic counter keyed by `(label name, label value)` pairs.
pub trait Counter: Send + Sync {
    fn add(&self, labels: &[(&str, &str)], delta: u64);
}

/// Distribution of observed values keyed by `(label name, label value)` pairs.
pub trait Histogram: Send + Sync {
    fn observe(&self, labels: &[(&str, &str)], value: f64);
}

/// Records count, error count and latency of capability calls.
#[derive(Clone)]
pub struct Instrumenter {
    label_names: Vec<String>,
    request_count: Arc<dyn Counter>,
    err_count: Arc<dyn Counter>,
    request_latency_summary: Arc<dyn Histogram>,
    request_latency: Arc<dyn Histogram>,
}

impl Instrumenter {
    pub fn new(
        label_names: Vec<String>,
        request_count: Arc<dyn Counter>,
        err_count: Arc<dyn Counter>,
        request_latency_summary: Arc<dyn Histogram>,
        request_latency: Arc<dyn Histogram>,
    ) -> Self {
        Self {
            label_names,
            request_count,
            err_count,
            request_latency_summary,
            request_latency,
        }
    }

    pub fn instrument(&self, begin: Instant, method: &str, failed: bool) {
        let Some(label) = self.label_names.first() else {
            return;
        };
        let labels = [(label.as_str(), method)];
        let took = begin.elapsed().as_secs_f64();

        self.request_count.add(&labels, 1);
        self.request_latency_summary.observe(&labels, took);
        self.request_latency.observe(&labels, took);
        if failed {
            self.err_count.add(&labels, 1);
        }
    }
}

pub struct InstrumentingService {
    instrumenter: Instrumenter,
    next: Arc<dyn Service>,
}

impl InstrumentingService {
    pub fn new(instrumenter: Instrumenter, next: Arc<dyn Service>) -> Self {
        Self { instrumenter, next }
    }

    pub fn layer(instrumenter: Instrumenter) -> impl FnOnce(Arc<dyn Service>) -> Arc<dyn Service> {
        move |next: Arc<dyn Service>| -> Arc<dyn Service> { Arc::new(Self::new(instrumenter, next)) }
    }
}

#[async_trait]
impl Service for InstrumentingService {
    async fn check(&self) -> Result<bool, ServiceError> {
        let begin = Instant::now();
        let result = self.next.check().await;
        self.instrumenter.instrument(begin, "Check", result.is_err());
        result
    }
}

/// Moment request processing began. Stored once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestStart(Instant);

impl RequestStart {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }
}

/// Records request latency by path and status code once a response is written.
#[derive(Clone)]
pub struct TransportInstrument {
    label_names: Vec<String>,
    request_latency: Arc<dyn Histogram>,
}

impl TransportInstrument {
    pub fn new(label_names: Vec<String>, request_latency: Arc<dyn Histogram>) -> Self {
        Self {
            label_names,
            request_latency,
        }
    }

    /// A missing start time counts as zero elapsed.
    pub fn finalize(&self, start: Option<RequestStart>, path: &str, code: u16) {
        let [path_label, code_label, ..] = self.label_names.as_slice() else {
            return;
        };
        let took = start.map(|s| s.elapsed()).unwrap_or_default();
        let code = code.to_string();
        self.request_latency.observe(
            &[(path_label.as_str(), path), (code_label.as_str(), code.as_str())],
            took.as_secs_f64(),
        );
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Failing, Recording, Sinks};
    use super::*;
    use crate::service::BaseService;

    #[tokio::test]
    async fn records_count_and_both_latencies_per_call() {
        let sinks = Sinks::new();
        let service = InstrumentingService::new(sinks.instrumenter(&["method"]), Arc::new(BaseService));

        service.check().await.unwrap();

        let counts = sinks.request_count.observations();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].labels, vec![("method".to_string(), "Check".to_string())]);
        assert_eq!(counts[0].value, 1.0);
        assert_eq!(sinks.summary.count(), 1);
        assert_eq!(sinks.latency.count(), 1);
        assert_eq!(sinks.err_count.count(), 0);
    }

    #[tokio::test]
    async fn failed_calls_also_bump_error_count() {
        let sinks = Sinks::new();
        let service = InstrumentingService::new(sinks.instrumenter(&["method"]), Arc::new(Failing::new("nope")));

        assert!(service.check().await.is_err());
        assert_eq!(sinks.request_count.count(), 1);
        assert_eq!(sinks.err_count.count(), 1);
    }

    #[tokio::test]
    async fn no_label_names_records_nothing() {
        let sinks = Sinks::new();
        let service = InstrumentingService::new(sinks.instrumenter(&[]), Arc::new(Failing::new("nope")));

        assert!(service.check().await.is_err());
        assert_eq!(sinks.total(), 0);
    }

    #[test]
    fn finalizer_labels_by_path_and_code() {
        let latency = Arc::new(Recording::default());
        let transport = TransportInstrument::new(vec!["path".into(), "code".into()], latency.clone());

        transport.finalize(Some(RequestStart::now()), "/healthcheck", 200);

        let observed = latency.observations();
        assert_eq!(observed.len(), 1);
        assert_eq!(
            observed[0].labels,
            vec![
                ("path".to_string(), "/healthcheck".to_string()),
                ("code".to_string(), "200".to_string()),
            ]
        );
        assert!(observed[0].value >= 0.0);
    }

    #[test]
    fn finalizer_without_start_time_records_zero() {
        let latency = Arc::new(Recording::default());
        let transport = TransportInstrument::new(vec!["path".into(), "code".into()], latency.clone());

        transport.finalize(None, "/healthcheck", 500);

        assert_eq!(latency.observations()[0].value, 0.0);
    }

    #[test]
    fn finalizer_needs_two_label_names() {
        let latency = Arc::new(Recording::default());
        for names in [vec![], vec!["path".to_string()]] {
            let transport = TransportInstrument::new(names, latency.clone());
            transport.finalize(Some(RequestStart::now()), "/healthcheck", 200);
        }
        assert_eq!(latency.count(), 0);
    }
}
