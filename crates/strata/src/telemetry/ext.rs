// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Extension traits for telemetry recording.

use std::time::Duration;

use tick::Clock;

use crate::telemetry::{CacheActivity, CacheOperation, CacheTelemetry};

/// Result of a timed async operation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimedResult<R> {
    pub result: R,
    pub duration: Duration,
}

pub(crate) trait ClockExt {
    /// Times an async operation and returns both the result and elapsed duration.
    fn timed_async<F, R>(&self, f: F) -> impl Future<Output = TimedResult<R>>
    where
        F: Future<Output = R>;
}

impl ClockExt for Clock {
    async fn timed_async<F, R>(&self, f: F) -> TimedResult<R>
    where
        F: Future<Output = R>,
    {
        let start = self.instant();
        let result = f.await;
        TimedResult {
            result,
            duration: self.instant().saturating_duration_since(start),
        }
    }
}

pub(crate) trait CacheTelemetryExt {
    /// Records a handle call if telemetry is enabled.
    fn record(&self, cache_name: &str, handle_name: &str, operation: CacheOperation, activity: CacheActivity, duration: Duration);

    /// Records a handle's entry count if telemetry is enabled.
    fn record_size(&self, cache_name: &str, handle_name: &str, size: u64);
}

impl CacheTelemetryExt for Option<CacheTelemetry> {
    #[allow(unused_variables, reason = "No-op when telemetry is disabled")]
    fn record(&self, cache_name: &str, handle_name: &str, operation: CacheOperation, activity: CacheActivity, duration: Duration) {
        #[cfg(any(feature = "logs", feature = "metrics", test))]
        if let Some(t) = self {
            t.record(cache_name, handle_name, operation, activity, duration);
        }
    }

    #[allow(unused_variables, reason = "No-op when telemetry is disabled")]
    fn record_size(&self, cache_name: &str, handle_name: &str, size: u64) {
        #[cfg(any(feature = "logs", feature = "metrics", test))]
        if let Some(t) = self {
            t.record_size(cache_name, handle_name, size);
        }
    }
}
