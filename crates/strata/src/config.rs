// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Declarative cache manager configuration.
//!
//! Durations are given in milliseconds.
//!
//! ```json
//! {
//!   "name": "orders",
//!   "updateMode": "up",
//!   "maxRetries": 10,
//!   "backPlate": { "channelName": "orders", "publishMode": "batched", "flushInterval": 50 },
//!   "handles": [
//!     { "knownType": "memory", "name": "local", "expirationMode": "sliding", "expirationTimeout": 60000 },
//!     { "knownType": "redis", "name": "shared", "isBackPlateSource": true }
//!   ]
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_backplate::{BackPlateBuilder, DEFAULT_CHANNEL_NAME, DEFAULT_FLUSH_INTERVAL, PublishMode};
use strata_memory::MemoryHandle;
use strata_tier::{DynamicHandle, DynamicHandleExt, Error, ErrorKind, Expiration, UpdateItemConfig};
use tick::Clock;

use crate::{
    BackPlate, CacheManager, CacheManagerBuilder, CacheUpdateMode, HandleOptions,
    builder::DEFAULT_CACHE_NAME,
};

/// The handle kind built by [`CacheManagerConfig::into_builder`] itself.
pub const MEMORY_HANDLE_TYPE: &str = "memory";

const DEFAULT_RETRY_TIMEOUT_MS: u64 = 100;

fn config_error(message: impl Into<String>) -> Error {
    Error::with_kind(ErrorKind::Configuration, message.into())
}

/// How a configured handle expires its items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExpirationMode {
    /// Items never expire.
    None,
    /// Items follow the per-item setting.
    #[default]
    Default,
    /// Items expire a fixed time after creation.
    Absolute,
    /// Items expire a fixed time after their last access.
    Sliding,
}

/// How a configured back-plate publishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PublishModeConfig {
    /// Collect notifications and publish them once per flush interval.
    #[default]
    Batched,
    /// Publish every notification as it happens.
    Immediate,
}

/// Back-plate settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackPlateConfig {
    /// Channel to publish and subscribe on.
    pub channel_name: String,
    /// How notifications are published.
    pub publish_mode: PublishModeConfig,
    /// Flush interval of the batched mode, in milliseconds.
    pub flush_interval: u64,
}

impl Default for BackPlateConfig {
    fn default() -> Self {
        Self {
            channel_name: DEFAULT_CHANNEL_NAME.to_owned(),
            publish_mode: PublishModeConfig::default(),
            flush_interval: u64::try_from(DEFAULT_FLUSH_INTERVAL.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Settings of one handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleConfig {
    /// The kind of handle, `memory` or a kind the resolver knows.
    pub known_type: String,
    /// The handle name.
    pub name: String,
    /// Whether statistics are recorded.
    #[serde(default = "enabled")]
    pub enable_statistics: bool,
    /// Whether remote invalidations skip this handle.
    #[serde(default)]
    pub is_back_plate_source: bool,
    /// How items expire.
    #[serde(default)]
    pub expiration_mode: ExpirationMode,
    /// Expiration timeout in milliseconds; required for absolute and sliding.
    #[serde(default)]
    pub expiration_timeout: Option<u64>,
    /// Upper bound on stored items, for handles that support one.
    #[serde(default)]
    pub max_capacity: Option<u64>,
}

fn enabled() -> bool {
    true
}

impl HandleConfig {
    /// The expiration this handle applies by default.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::Configuration`] error when a timeout is given
    /// for `none` or `default`, or missing for `absolute` or `sliding`.
    pub fn expiration(&self) -> Result<Expiration, Error> {
        let timeout = self.expiration_timeout.map(Duration::from_millis);
        match (self.expiration_mode, timeout) {
            (ExpirationMode::None, None) => Ok(Expiration::Never),
            (ExpirationMode::Default, None) => Ok(Expiration::Default),
            (ExpirationMode::Absolute, Some(timeout)) if !timeout.is_zero() => Ok(Expiration::Absolute(timeout)),
            (ExpirationMode::Sliding, Some(timeout)) if !timeout.is_zero() => Ok(Expiration::Sliding(timeout)),
            (ExpirationMode::None | ExpirationMode::Default, Some(_)) => Err(config_error(format!(
                "handle '{}': an expiration timeout needs mode absolute or sliding",
                self.name
            ))),
            (_, _) => Err(config_error(format!(
                "handle '{}': expiration mode {:?} needs a positive timeout",
                self.name, self.expiration_mode
            ))),
        }
    }

    fn options(&self) -> HandleOptions {
        let options = HandleOptions::new(self.name.clone()).with_statistics(self.enable_statistics);
        if self.is_back_plate_source {
            options.back_plate_source()
        } else {
            options
        }
    }
}

/// A whole cache manager described as data.
///
/// # Examples
///
/// ```
/// use strata::{CacheManagerConfig, CacheUpdateMode};
/// use tick::Clock;
///
/// let config = CacheManagerConfig::from_json(
///     r#"{ "name": "orders", "updateMode": "full", "handles": [{ "knownType": "memory", "name": "local" }] }"#,
/// )?;
/// assert_eq!(config.update_mode, CacheUpdateMode::Full);
///
/// let cache = config.into_builder::<u64>(Clock::new_frozen())?.build()?;
/// assert_eq!(cache.name(), "orders");
/// # Ok::<(), strata::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheManagerConfig {
    /// The manager name.
    pub name: String,
    /// How hits are copied into other handles.
    pub update_mode: CacheUpdateMode,
    /// Retry budget for updates and back-plate connection attempts.
    pub max_retries: u32,
    /// Per-attempt back-plate connection timeout, in milliseconds.
    pub retry_timeout: u64,
    /// Back-plate settings, if instances should invalidate each other.
    pub back_plate: Option<BackPlateConfig>,
    /// The handles, from the edge to the authority.
    pub handles: Vec<HandleConfig>,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CACHE_NAME.to_owned(),
            update_mode: CacheUpdateMode::default(),
            max_retries: UpdateItemConfig::DEFAULT_MAX_RETRIES,
            retry_timeout: DEFAULT_RETRY_TIMEOUT_MS,
            back_plate: None,
            handles: Vec::new(),
        }
    }
}

impl CacheManagerConfig {
    /// Parses a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::Configuration`] error for malformed JSON.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|error| Error::with_kind(ErrorKind::Configuration, error))
    }

    /// Checks the configuration without building anything.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::Configuration`] error when there are no
    /// handles, more than one back-plate source, a back-plate without a
    /// source, or an invalid expiration.
    pub fn validate(&self) -> Result<(), Error> {
        if self.handles.is_empty() {
            return Err(config_error(format!("cache '{}' has no handles", self.name)));
        }

        let sources = self.handles.iter().filter(|h| h.is_back_plate_source).count();
        if sources > 1 {
            return Err(config_error(format!(
                "cache '{}' has {sources} back-plate sources, at most one is allowed",
                self.name
            )));
        }
        if self.back_plate.is_some() && sources == 0 {
            return Err(config_error(format!(
                "cache '{}' has a back-plate but no back-plate source handle",
                self.name
            )));
        }

        for handle in &self.handles {
            handle.expiration()?;
        }
        Ok(())
    }

    /// Builds every handle, using only the built-in `memory` kind.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::Configuration`] error when validation fails or
    /// a handle has any other kind.
    pub fn into_builder<V>(self, clock: Clock) -> Result<CacheManagerBuilder<V>, Error>
    where
        V: Clone + Send + Sync + 'static,
    {
        self.into_builder_with(clock, |_| None)
    }

    /// Builds every handle, asking `resolver` for kinds other than `memory`.
    ///
    /// The back-plate is not connected here: connect the builder from
    /// [`back_plate_builder`](Self::back_plate_builder) and pass the result to
    /// [`CacheManagerBuilder::back_plate`].
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::Configuration`] error when validation fails or
    /// `resolver` does not know a handle kind.
    pub fn into_builder_with<V, R>(self, clock: Clock, mut resolver: R) -> Result<CacheManagerBuilder<V>, Error>
    where
        V: Clone + Send + Sync + 'static,
        R: FnMut(&HandleConfig) -> Option<DynamicHandle<V>>,
    {
        self.validate()?;

        let mut builder = CacheManager::builder::<V>(clock.clone())
            .name(self.name)
            .update_mode(self.update_mode)
            .max_retries(self.max_retries);

        for handle in &self.handles {
            let built = if handle.known_type.eq_ignore_ascii_case(MEMORY_HANDLE_TYPE) {
                let mut memory = MemoryHandle::<V>::builder(clock.clone())
                    .name(handle.name.clone())
                    .default_expiration(handle.expiration()?);
                if let Some(capacity) = handle.max_capacity {
                    memory = memory.max_capacity(capacity);
                }
                memory.build().into_dynamic()
            } else {
                resolver(handle).ok_or_else(|| {
                    config_error(format!("handle '{}' has unknown kind '{}'", handle.name, handle.known_type))
                })?
            };
            builder = builder.handle_with(built, handle.options());
        }

        Ok(builder)
    }

    /// A back-plate builder carrying the configured channel, publish mode
    /// and retry policy, or `None` if no back-plate is configured.
    #[must_use]
    pub fn back_plate_builder(&self, clock: Clock) -> Option<BackPlateBuilder> {
        let config = self.back_plate.as_ref()?;
        let mode = match config.publish_mode {
            PublishModeConfig::Batched => PublishMode::Batched(Duration::from_millis(config.flush_interval)),
            PublishModeConfig::Immediate => PublishMode::Immediate,
        };
        Some(
            BackPlate::builder(clock)
                .channel_name(config.channel_name.clone())
                .publish_mode(mode)
                .max_retries(self.max_retries)
                .retry_timeout(Duration::from_millis(self.retry_timeout)),
        )
    }
}
