// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for connecting a back-plate to a transport.

use std::time::Duration;

use strata_tier::Error;
use tick::Clock;

use crate::{
    back_plate::{BackPlate, DEFAULT_CHANNEL_NAME, PublishMode},
    retry::{RetryPolicy, connect_with_retry},
    transport::{BackPlateTransport, DynBackPlateTransport},
};

/// Configures and connects a [`BackPlate`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use strata_backplate::{BackPlate, PublishMode, TransportRegistry};
/// use tick::Clock;
///
/// # futures::executor::block_on(async {
/// let registry = TransportRegistry::new();
/// let back_plate = BackPlate::builder(Clock::new_frozen())
///     .channel_name("orders")
///     .publish_mode(PublishMode::Batched(Duration::from_millis(50)))
///     .connect(|| std::future::ready(registry.connect("bus")))
///     .await?;
///
/// assert_eq!(back_plate.channel(), "orders");
/// # Ok::<(), strata_tier::Error>(())
/// # }).unwrap();
/// ```
#[derive(Debug)]
pub struct BackPlateBuilder {
    clock: Clock,
    channel: String,
    mode: PublishMode,
    identifier: Option<String>,
    retry: RetryPolicy,
}

impl BackPlateBuilder {
    pub(crate) fn new(clock: Clock) -> Self {
        Self {
            clock,
            channel: DEFAULT_CHANNEL_NAME.to_owned(),
            mode: PublishMode::default(),
            identifier: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the channel to publish and subscribe on.
    #[must_use]
    pub fn channel_name(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Sets how notifications are published.
    #[must_use]
    pub fn publish_mode(mut self, mode: PublishMode) -> Self {
        self.mode = mode;
        self
    }

    /// Overrides the generated instance identifier.
    ///
    /// Identifiers must be unique across every instance on the channel;
    /// by default a random UUID is used.
    #[must_use]
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Sets how many times a failed connection attempt is retried.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Sets how long a single connection attempt may take.
    #[must_use]
    pub fn retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry.attempt_timeout = timeout;
        self
    }

    /// Sets the delay before the first retry; later retries back off exponentially.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry.base_delay = delay;
        self
    }

    /// Connects and subscribes using transports produced by `connector`.
    ///
    /// `connector` is called once per attempt. Connecting and subscribing are
    /// retried together under the configured retry policy.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::InvalidArgument`](strata_tier::ErrorKind::InvalidArgument)
    /// error for a blank channel name or identifier, or the last transport
    /// error once all retries are exhausted.
    pub async fn connect<T, F, Fut>(self, connector: F) -> Result<BackPlate, Error>
    where
        T: BackPlateTransport + 'static,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, Error>> + Send,
    {
        if self.channel.trim().is_empty() {
            return Err(Error::invalid_argument("back-plate channel name must not be blank"));
        }
        let identifier = match self.identifier {
            Some(identifier) if identifier.trim().is_empty() => {
                return Err(Error::invalid_argument("back-plate identifier must not be blank"));
            }
            Some(identifier) => identifier,
            None => uuid::Uuid::new_v4().to_string(),
        };

        let channel = self.channel;
        let (transport, subscription) = connect_with_retry(&self.clock, &self.retry, &channel, &connector).await?;

        tracing::info!(channel = %channel, identifier = %identifier, mode = ?self.mode, "back-plate connected");

        Ok(BackPlate::from_parts(
            identifier,
            channel,
            self.mode,
            self.clock,
            DynBackPlateTransport::new_arc(transport),
            subscription,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use futures::executor::block_on;
    use strata_tier::ErrorKind;

    use super::*;
    use crate::{InProcessBus, TransportRegistry};

    #[test]
    fn defaults() {
        let builder = BackPlateBuilder::new(Clock::new_frozen());
        assert_eq!(builder.channel, DEFAULT_CHANNEL_NAME);
        assert_eq!(builder.mode, PublishMode::Batched(Duration::from_millis(100)));
        assert_eq!(builder.retry, RetryPolicy::default());
    }

    #[test]
    fn connect_subscribes_and_generates_identifier() {
        block_on(async {
            let bus = InProcessBus::new();
            let plate = BackPlate::builder(Clock::new_frozen())
                .connect(|| std::future::ready(Ok(bus.transport())))
                .await
                .unwrap();

            assert_eq!(bus.subscriber_count(DEFAULT_CHANNEL_NAME), 1);
            assert!(uuid::Uuid::parse_str(plate.identifier()).is_ok());
        });
    }

    #[test]
    fn connect_retries_until_bus_is_up() {
        block_on(async {
            let bus = InProcessBus::new();
            bus.set_offline(true);
            let attempts = AtomicU32::new(0);

            let plate = BackPlate::builder(Clock::new_frozen())
                .max_retries(3)
                .retry_delay(Duration::ZERO)
                .connect(|| {
                    if attempts.fetch_add(1, Ordering::Relaxed) == 2 {
                        bus.set_offline(false);
                    }
                    std::future::ready(Ok(bus.transport()))
                })
                .await;

            assert!(plate.is_ok());
            assert_eq!(attempts.load(Ordering::Relaxed), 3);
        });
    }

    #[test]
    fn connect_gives_up() {
        block_on(async {
            let registry = TransportRegistry::new();
            let result = BackPlate::builder(Clock::new_frozen())
                .max_retries(1)
                .retry_delay(Duration::ZERO)
                .connect(|| std::future::ready(registry.connect("")))
                .await;

            assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidArgument);
        });
    }

    #[test]
    fn blank_channel_is_rejected() {
        block_on(async {
            let bus = InProcessBus::new();
            let result = BackPlate::builder(Clock::new_frozen())
                .channel_name(" ")
                .connect(|| std::future::ready(Ok(bus.transport())))
                .await;
            assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidArgument);

            let result = BackPlate::builder(Clock::new_frozen())
                .identifier("")
                .connect(|| std::future::ready(Ok(bus.transport())))
                .await;
            assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidArgument);
        });
    }
}
