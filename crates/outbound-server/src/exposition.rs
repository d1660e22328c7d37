//! Prometheus backed metric sinks and the pull endpoint that exposes them.

use std::sync::Arc;

use axum::{routing::get, Router};
use metrics::{Key, KeyName, Label, Level, Metadata, Recorder, SharedString};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use outbound_core::{Counter, Histogram, Instrumenter, TransportInstrument};

use crate::errors::StartupError;

static METADATA: Metadata<'static> = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
const TRANSPORT_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.3, 0.6, 1.0];

/// One metric family on the shared recorder. Histograms without configured
/// buckets render as summaries.
pub struct PrometheusMetric {
    recorder: Arc<PrometheusRecorder>,
    name: &'static str,
    const_labels: Vec<Label>,
}

impl PrometheusMetric {
    fn key(&self, labels: &[(&str, &str)]) -> Key {
        let labels: Vec<Label> = self
            .const_labels
            .iter()
            .cloned()
            .chain(labels.iter().map(|(k, v)| Label::new(k.to_string(), v.to_string())))
            .collect();
        Key::from_parts(self.name, labels)
    }
}

impl Counter for PrometheusMetric {
    fn add(&self, labels: &[(&str, &str)], delta: u64) {
        self.recorder
            .register_counter(&self.key(labels), &METADATA)
            .increment(delta);
    }
}

impl Histogram for PrometheusMetric {
    fn observe(&self, labels: &[(&str, &str)], value: f64) {
        self.recorder
            .register_histogram(&self.key(labels), &METADATA)
            .record(value);
    }
}

pub struct Metrics {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
    const_labels: Vec<Label>,
}

impl Metrics {
    pub fn new(const_labels: Vec<(&'static str, String)>) -> Result<Self, StartupError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Full("request_latency".to_string()), LATENCY_BUCKETS)
            .and_then(|b| {
                b.set_buckets_for_metric(
                    Matcher::Full("transport_request_latency".to_string()),
                    TRANSPORT_BUCKETS,
                )
            })
            .map_err(|e| StartupError::Metrics(e.to_string()))?
            .build_recorder();
        let handle = recorder.handle();

        Ok(Self {
            recorder: Arc::new(recorder),
            handle,
            const_labels: const_labels
                .into_iter()
                .map(|(k, v)| Label::new(k, v))
                .collect(),
        })
    }

    fn counter(&self, name: &'static str, help: &'static str) -> Arc<PrometheusMetric> {
        self.recorder
            .describe_counter(KeyName::from(name), None, SharedString::from(help));
        self.metric(name)
    }

    fn histogram(&self, name: &'static str, help: &'static str) -> Arc<PrometheusMetric> {
        self.recorder
            .describe_histogram(KeyName::from(name), None, SharedString::from(help));
        self.metric(name)
    }

    fn metric(&self, name: &'static str) -> Arc<PrometheusMetric> {
        Arc::new(PrometheusMetric {
            recorder: self.recorder.clone(),
            name,
            const_labels: self.const_labels.clone(),
        })
    }

    pub fn instrumenter(&self, label_names: Vec<String>) -> Instrumenter {
        Instrumenter::new(
            label_names,
            self.counter("request_count", "Number of request received"),
            self.counter("err_count", "Number of errors"),
            self.histogram(
                "request_latency_seconds",
                "Total duration of requests in request_latency_seconds",
            ),
            self.histogram("request_latency", "Duration of request in seconds"),
        )
    }

    pub fn transport(&self, label_names: Vec<String>) -> TransportInstrument {
        TransportInstrument::new(
            label_names,
            self.histogram("transport_request_latency", "Duration of request in seconds"),
        )
    }

    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let rendered = handle.render();
                async move { rendered }
            }),
        )
    }
}
