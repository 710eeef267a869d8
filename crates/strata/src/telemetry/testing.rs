// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Helpers for asserting on recorded metrics and captured logs.

use std::{io::Write, sync::Arc};

use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::{
    InMemoryMetricExporter, SdkMeterProvider,
    data::{AggregatedMetrics, Metric, MetricData, ResourceMetrics, ScopeMetrics},
};
use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

/// Collects `OTel` metrics in memory.
#[derive(Debug)]
pub(crate) struct MetricTester {
    exporter: InMemoryMetricExporter,
    provider: SdkMeterProvider,
}

impl MetricTester {
    pub fn new() -> Self {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder().with_periodic_exporter(exporter.clone()).build();
        Self { exporter, provider }
    }

    pub fn meter_provider(&self) -> &SdkMeterProvider {
        &self.provider
    }

    fn finished(&self) -> Vec<ResourceMetrics> {
        self.provider.force_flush().unwrap();
        self.exporter.get_finished_metrics().unwrap()
    }

    /// Names of every metric exported so far.
    pub fn metric_names(&self) -> Vec<String> {
        self.finished()
            .iter()
            .flat_map(ResourceMetrics::scope_metrics)
            .flat_map(ScopeMetrics::metrics)
            .map(|metric| metric.name().to_owned())
            .collect()
    }

    fn recorded_attributes(&self) -> Vec<KeyValue> {
        self.finished()
            .iter()
            .flat_map(ResourceMetrics::scope_metrics)
            .flat_map(ScopeMetrics::metrics)
            .flat_map(attributes_of)
            .collect()
    }

    pub fn assert_attributes_contain(&self, expected: &[KeyValue]) {
        let attributes = self.recorded_attributes();
        for attr in expected {
            assert!(attributes.contains(attr), "attribute {attr:?} not recorded, got: {attributes:?}");
        }
    }

    pub fn assert_attributes_absent(&self, unexpected: &[KeyValue]) {
        let attributes = self.recorded_attributes();
        for attr in unexpected {
            assert!(!attributes.contains(attr), "attribute {attr:?} was recorded");
        }
    }
}

macro_rules! data_point_attributes {
    ($data:expr) => {
        match $data {
            MetricData::Gauge(d) => d.data_points().flat_map(|p| p.attributes().cloned()).collect::<Vec<_>>(),
            MetricData::Sum(d) => d.data_points().flat_map(|p| p.attributes().cloned()).collect::<Vec<_>>(),
            MetricData::Histogram(d) => d.data_points().flat_map(|p| p.attributes().cloned()).collect::<Vec<_>>(),
            MetricData::ExponentialHistogram(d) => d.data_points().flat_map(|p| p.attributes().cloned()).collect::<Vec<_>>(),
        }
    };
}

fn attributes_of(metric: &Metric) -> Vec<KeyValue> {
    match metric.data() {
        AggregatedMetrics::F64(data) => data_point_attributes!(data),
        AggregatedMetrics::U64(data) => data_point_attributes!(data),
        AggregatedMetrics::I64(data) => data_point_attributes!(data),
    }
}

/// Captures formatted `tracing` output for the current thread.
#[derive(Debug, Clone, Default)]
pub(crate) struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    pub fn assert_contains(&self, expected: &str) {
        let output = self.output();
        assert!(output.contains(expected), "log output does not contain '{expected}', got:\n{output}");
    }

    /// A subscriber writing into this capture; install it with `set_default`.
    pub fn subscriber(&self) -> impl tracing::Subscriber {
        use tracing_subscriber::layer::SubscriberExt;
        tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .with_writer(self.clone())
                .with_ansi(false),
        )
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter(Arc::clone(&self.buffer))
    }
}

pub(crate) struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
