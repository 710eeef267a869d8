// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-handle telemetry for cache manager operations.
//!
//! With the `logs` feature every handle call is logged through `tracing`;
//! with the `metrics` feature it is counted and timed through OpenTelemetry.
//! Without either feature recording compiles down to nothing.

#[cfg(any(feature = "logs", feature = "metrics", test))]
use std::sync::Arc;

#[cfg(any(feature = "logs", feature = "metrics", test))]
use cache::CacheTelemetryInner;
#[cfg(any(feature = "logs", test))]
use opentelemetry::logs::Severity;

pub(crate) mod attributes;
#[cfg(any(feature = "logs", feature = "metrics", test))]
pub(crate) mod cache;
pub(crate) mod config;
pub(crate) mod ext;
#[cfg(any(feature = "metrics", test))]
pub(crate) mod metrics;
#[cfg(test)]
pub(crate) mod testing;

/// Records handle calls made by a cache manager.
#[derive(Clone, Debug)]
pub(crate) struct CacheTelemetry {
    #[cfg(any(feature = "logs", feature = "metrics", test))]
    inner: Arc<CacheTelemetryInner>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum CacheOperation {
    Get,
    Add,
    Put,
    Remove,
    Clear,
    ClearRegion,
    Expire,
    Update,
    Evict,
}

impl CacheOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "cache.get",
            Self::Add => "cache.add",
            Self::Put => "cache.put",
            Self::Remove => "cache.remove",
            Self::Clear => "cache.clear",
            Self::ClearRegion => "cache.clear_region",
            Self::Expire => "cache.expire",
            Self::Update => "cache.update",
            Self::Evict => "cache.evict",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum CacheActivity {
    Hit,
    Miss,
    Added,
    Rejected,
    Stored,
    Removed,
    NotFound,
    Cleared,
    Expired,
    Updated,
    Unchanged,
    Conflict,
    Evicted,
    Error,
}

impl CacheActivity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "cache.hit",
            Self::Miss => "cache.miss",
            Self::Added => "cache.added",
            Self::Rejected => "cache.rejected",
            Self::Stored => "cache.stored",
            Self::Removed => "cache.removed",
            Self::NotFound => "cache.not_found",
            Self::Cleared => "cache.cleared",
            Self::Expired => "cache.expired",
            Self::Updated => "cache.updated",
            Self::Unchanged => "cache.unchanged",
            Self::Conflict => "cache.conflict",
            Self::Evicted => "cache.evicted",
            Self::Error => "cache.error",
        }
    }

    #[cfg(any(feature = "logs", test))]
    pub fn severity(self) -> Severity {
        match self {
            Self::Hit | Self::Miss | Self::NotFound | Self::Unchanged => Severity::Debug,
            Self::Added | Self::Rejected | Self::Stored | Self::Removed | Self::Cleared | Self::Expired | Self::Updated | Self::Evicted => {
                Severity::Info
            }
            Self::Conflict => Severity::Warn,
            Self::Error => Severity::Error,
        }
    }
}
