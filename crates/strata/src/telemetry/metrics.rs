// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! OpenTelemetry instruments shared by every handle of a cache manager.

use opentelemetry::{
    InstrumentationScope, KeyValue,
    metrics::{Counter, Gauge, Histogram, Meter, MeterProvider},
};

const METER_NAME: &str = "strata";
const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.47.0";

pub(crate) fn create_meter(meter_provider: &dyn MeterProvider) -> Meter {
    meter_provider.meter_with_scope(
        InstrumentationScope::builder(METER_NAME)
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(SCHEMA_URL)
            .build(),
    )
}

/// The three instruments a manager reports through.
#[derive(Debug, Clone)]
pub(crate) struct HandleInstruments {
    calls: Counter<u64>,
    call_duration: Histogram<f64>,
    entries: Gauge<u64>,
}

impl HandleInstruments {
    pub(crate) fn new(meter: &Meter) -> Self {
        Self {
            calls: meter
                .u64_counter("cache.event.count")
                .with_description("Calls made on cache handles, by operation and outcome")
                .with_unit("{event}")
                .build(),
            call_duration: meter
                .f64_histogram("cache.operation.duration")
                .with_description("Duration of calls made on cache handles")
                .with_unit("s")
                .build(),
            entries: meter
                .u64_gauge("cache.size")
                .with_description("Entries held by a cache handle")
                .with_unit("{entry}")
                .build(),
        }
    }

    /// Counts one handle call and records its duration.
    pub(crate) fn record_call(&self, attributes: &[KeyValue], seconds: f64) {
        self.calls.add(1, attributes);
        self.call_duration.record(seconds, attributes);
    }

    pub(crate) fn record_entries(&self, attributes: &[KeyValue], entries: u64) {
        self.entries.record(entries, attributes);
    }
}
