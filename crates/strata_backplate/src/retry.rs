// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Retried, time-bounded connection to a transport.

use std::time::Duration;

use layered::{Service, Stack};
use seatbelt::{
    RecoveryInfo, ResilienceContext,
    retry::{Backoff, Retry, RetryLayer},
    timeout::{Timeout, TimeoutLayer},
};
use strata_tier::{Error, ErrorKind};
use tick::Clock;

use crate::transport::{BackPlateTransport, MessageStream};

const PIPELINE_NAME: &str = "strata_backplate";
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// How connection attempts are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts made after the first one fails.
    pub max_retries: u32,
    /// How long a single attempt may take.
    pub attempt_timeout: Duration,
    /// The delay before the first retry; later retries back off exponentially.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            attempt_timeout: Duration::from_secs(5),
            base_delay: Duration::from_millis(100),
        }
    }
}

/// A connected transport together with its subscription.
pub(crate) type Connected<T> = Result<(T, MessageStream), Error>;

/// Connects through `connect` and subscribes to the channel it is given.
struct Connector<'a, F> {
    connect: &'a F,
}

impl<F, Fut, T> Service<String> for Connector<'_, F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, Error>> + Send,
    T: BackPlateTransport,
{
    type Out = Connected<T>;

    async fn execute(&self, channel: String) -> Self::Out {
        let transport = (self.connect)().await?;
        let subscription = transport.subscribe(&channel).await?;
        Ok((transport, subscription))
    }
}

fn retry_layer<T: 'static>(context: &ResilienceContext<String, Connected<T>>, policy: &RetryPolicy) -> RetryLayer<String, Connected<T>> {
    Retry::layer("connect_retry", context)
        .clone_input()
        .recovery_with(|output, _args| match output {
            Ok(_) => RecoveryInfo::never(),
            Err(_) => RecoveryInfo::retry(),
        })
        .max_retry_attempts(policy.max_retries)
        .backoff(Backoff::Exponential)
        .base_delay(policy.base_delay)
        .max_delay(MAX_BACKOFF)
        .use_jitter(true)
        .on_retry(|output, args| {
            if let Err(error) = output {
                tracing::warn!(
                    attempt = args.attempt().index(),
                    delay_ms = args.retry_delay().as_millis(),
                    error = %error,
                    "back-plate connect failed, retrying"
                );
            }
        })
}

fn timeout_layer<T: 'static>(context: &ResilienceContext<String, Connected<T>>, policy: &RetryPolicy) -> TimeoutLayer<String, Connected<T>> {
    Timeout::layer("connect_timeout", context)
        .timeout(policy.attempt_timeout)
        .timeout_error(|args| {
            Error::with_kind(
                ErrorKind::Transport,
                format!("back-plate connect attempt timed out after {:?}", args.timeout()),
            )
        })
}

/// Connects and subscribes to `channel` until an attempt succeeds or `policy` gives up.
///
/// Each attempt is bounded by [`RetryPolicy::attempt_timeout`]. The last
/// failure is returned when every attempt fails.
pub(crate) async fn connect_with_retry<T, F, Fut>(clock: &Clock, policy: &RetryPolicy, channel: &str, connect: &F) -> Connected<T>
where
    T: BackPlateTransport + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, Error>> + Send,
{
    let context = ResilienceContext::new(clock).name(PIPELINE_NAME);
    let service = (retry_layer(&context, policy), timeout_layer(&context, policy), Connector { connect }).into_service();

    let connected = service.execute(channel.to_owned()).await;
    if let Err(error) = &connected {
        tracing::error!(attempts = policy.max_retries.saturating_add(1), error = %error, "back-plate could not connect");
    }
    connected
}
