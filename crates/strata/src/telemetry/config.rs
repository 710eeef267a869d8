// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Telemetry configuration for cache managers.

#[cfg(any(feature = "metrics", test))]
use opentelemetry::metrics::{Meter, MeterProvider};

#[cfg(any(feature = "logs", feature = "metrics", test))]
use crate::telemetry::cache::CacheTelemetryInner;
use crate::telemetry::CacheTelemetry;

/// Configuration for cache manager telemetry.
///
/// Enable logs and/or metrics, then pass this to
/// [`CacheManagerBuilder::telemetry`](crate::CacheManagerBuilder::telemetry).
/// Each call a cache manager makes on one of its handles is then recorded
/// with the cache name, the handle name, the operation, its outcome and how
/// long it took.
///
/// # Examples
///
/// ```
/// use strata::TelemetryConfig;
///
/// // Nothing enabled; recording is free.
/// let config = TelemetryConfig::new();
/// # let _ = config;
/// ```
#[derive(Clone, Debug, Default)]
pub struct TelemetryConfig {
    #[cfg(any(feature = "logs", test))]
    logs_enabled: bool,
    #[cfg(any(feature = "metrics", test))]
    meter: Option<Meter>,
}

impl TelemetryConfig {
    /// Creates a configuration with everything disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables structured logging of handle calls through `tracing`.
    #[cfg(any(feature = "logs", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "logs")))]
    #[must_use]
    pub fn with_logs(self) -> Self {
        Self {
            logs_enabled: true,
            ..self
        }
    }

    /// Enables OpenTelemetry metrics using the provided meter provider.
    #[cfg(any(feature = "metrics", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
    #[must_use]
    pub fn with_metrics(mut self, provider: &dyn MeterProvider) -> Self {
        self.meter = Some(crate::telemetry::metrics::create_meter(provider));
        self
    }

    pub(crate) fn build(self) -> CacheTelemetry {
        #[cfg(not(any(feature = "logs", feature = "metrics", test)))]
        {
            CacheTelemetry {}
        }

        #[cfg(any(feature = "logs", feature = "metrics", test))]
        {
            CacheTelemetry::from_inner(CacheTelemetryInner {
                #[cfg(any(feature = "logs", test))]
                logging_enabled: self.logs_enabled,
                #[cfg(any(feature = "metrics", test))]
                instruments: self.meter.as_ref().map(crate::telemetry::metrics::HandleInstruments::new),
            })
        }
    }
}
