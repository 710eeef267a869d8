// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache telemetry recording.

use std::time::Duration;

#[cfg(any(feature = "metrics", test))]
use opentelemetry::KeyValue;
#[cfg(any(feature = "logs", test))]
use opentelemetry::logs::Severity;

#[cfg(any(feature = "metrics", test))]
use crate::telemetry::{attributes, metrics::HandleInstruments};
use crate::telemetry::{CacheActivity, CacheOperation, CacheTelemetry};

#[derive(Debug)]
pub(crate) struct CacheTelemetryInner {
    #[cfg(any(feature = "logs", test))]
    pub(crate) logging_enabled: bool,
    #[cfg(any(feature = "metrics", test))]
    pub(crate) instruments: Option<HandleInstruments>,
}

impl CacheTelemetry {
    pub(crate) fn from_inner(inner: CacheTelemetryInner) -> Self {
        Self {
            inner: std::sync::Arc::new(inner),
        }
    }

    /// Records one handle call.
    pub(crate) fn record(&self, cache_name: &str, handle_name: &str, operation: CacheOperation, activity: CacheActivity, duration: Duration) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(instruments) = &self.inner.instruments {
            let attrs = [
                KeyValue::new(attributes::CACHE_NAME, cache_name.to_owned()),
                KeyValue::new(attributes::HANDLE_NAME, handle_name.to_owned()),
                KeyValue::new(attributes::CACHE_OPERATION_NAME, operation.as_str()),
                KeyValue::new(attributes::CACHE_ACTIVITY_NAME, activity.as_str()),
            ];
            instruments.record_call(&attrs, duration.as_secs_f64());
        }

        #[cfg(any(feature = "logs", test))]
        if self.inner.logging_enabled {
            Self::emit(cache_name, handle_name, operation, activity, duration);
        }
    }

    /// Records the number of entries a handle reports.
    #[cfg_attr(
        not(any(feature = "metrics", test)),
        expect(unused_variables, reason = "sizes are only exported as metrics")
    )]
    pub(crate) fn record_size(&self, cache_name: &str, handle_name: &str, size: u64) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(instruments) = &self.inner.instruments {
            let attrs = [
                KeyValue::new(attributes::CACHE_NAME, cache_name.to_owned()),
                KeyValue::new(attributes::HANDLE_NAME, handle_name.to_owned()),
            ];
            instruments.record_entries(&attrs, size);
        }
    }

    #[cfg(any(feature = "logs", test))]
    fn emit(cache_name: &str, handle_name: &str, operation: CacheOperation, activity: CacheActivity, duration: Duration) {
        let op = operation.as_str();
        let act = activity.as_str();
        let duration_ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);

        // Tracing levels must be constant, hence one macro arm per level.
        // Field names must match attributes.rs.
        macro_rules! emit_event {
            ($level:ident) => {
                tracing::$level!(
                    cache.name = cache_name,
                    cache.handle = handle_name,
                    cache.operation = op,
                    cache.activity = act,
                    cache.duration_ns = duration_ns,
                    "cache.event"
                )
            };
        }

        match activity.severity() {
            Severity::Error => emit_event!(error),
            Severity::Warn => emit_event!(warn),
            Severity::Info => emit_event!(info),
            Severity::Debug => emit_event!(debug),
            _ => {}
        }
    }
}
