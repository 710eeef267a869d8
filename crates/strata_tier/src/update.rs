// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Types describing an optimistic update of a cached value.

/// The function applied to the current value during an update.
///
/// Returning `None` aborts the update with [`UpdateItemState::FactoryReturnedNone`].
pub type UpdateFn<'a, V> = dyn Fn(&V) -> Option<V> + Send + Sync + 'a;

/// What a handle does about other tiers when it runs into a version conflict.
///
/// The policy is carried to every handle through [`UpdateItemConfig`]. A cache
/// manager evicts the item from the other tiers after any unsuccessful update
/// whatever the policy says.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum VersionConflictPolicy {
    /// Evict the item from every other tier.
    #[default]
    EvictItemFromOtherCaches,
    /// Leave the other tiers untouched.
    ///
    /// Only handles that read [`UpdateItemConfig::version_conflict_policy`]
    /// act on this. The `strata` cache manager ignores it and still evicts.
    Ignore,
}

/// Per-call settings for an update.
///
/// # Examples
///
/// ```
/// use strata_tier::UpdateItemConfig;
///
/// let config = UpdateItemConfig::new().with_max_retries(3);
/// assert_eq!(config.max_retries(), 3);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpdateItemConfig {
    max_retries: u32,
    version_conflict_policy: VersionConflictPolicy,
}

impl UpdateItemConfig {
    /// Retry budget used when none is given.
    pub const DEFAULT_MAX_RETRIES: u32 = 50;

    /// Creates a config with the default retry budget.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_retries: Self::DEFAULT_MAX_RETRIES,
            version_conflict_policy: VersionConflictPolicy::default(),
        }
    }

    /// Sets how many times a conflicting update is retried.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the version conflict policy.
    #[must_use]
    pub fn with_version_conflict_policy(mut self, policy: VersionConflictPolicy) -> Self {
        self.version_conflict_policy = policy;
        self
    }

    /// How many times a conflicting update is retried.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// The version conflict policy.
    #[must_use]
    pub fn version_conflict_policy(&self) -> VersionConflictPolicy {
        self.version_conflict_policy
    }
}

impl Default for UpdateItemConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The outcome of an update attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum UpdateItemState {
    /// The value was replaced.
    Success,
    /// There was nothing to update.
    ItemDidNotExist,
    /// Every attempt lost against a concurrent writer.
    TooManyRetries,
    /// The update function declined to produce a value.
    FactoryReturnedNone,
}

/// The result of an update on one handle, or aggregated over the whole chain.
///
/// Conflicts are reported here rather than as errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateItemResult<V> {
    value: Option<V>,
    state: UpdateItemState,
    version_conflict_occurred: bool,
    tries_needed: u32,
}

impl<V> UpdateItemResult<V> {
    /// The update succeeded and produced `value`.
    pub fn success(value: V, version_conflict_occurred: bool, tries_needed: u32) -> Self {
        Self {
            value: Some(value),
            state: UpdateItemState::Success,
            version_conflict_occurred,
            tries_needed,
        }
    }

    /// The item was not present.
    #[must_use]
    pub fn item_did_not_exist() -> Self {
        Self {
            value: None,
            state: UpdateItemState::ItemDidNotExist,
            version_conflict_occurred: false,
            tries_needed: 1,
        }
    }

    /// Every attempt conflicted.
    #[must_use]
    pub fn too_many_retries(tries_needed: u32) -> Self {
        Self {
            value: None,
            state: UpdateItemState::TooManyRetries,
            version_conflict_occurred: true,
            tries_needed,
        }
    }

    /// The update function returned `None`.
    #[must_use]
    pub fn factory_returned_none(version_conflict_occurred: bool, tries_needed: u32) -> Self {
        Self {
            value: None,
            state: UpdateItemState::FactoryReturnedNone,
            version_conflict_occurred,
            tries_needed,
        }
    }

    /// Builds a result from its parts.
    pub fn from_parts(value: Option<V>, state: UpdateItemState, version_conflict_occurred: bool, tries_needed: u32) -> Self {
        Self {
            value,
            state,
            version_conflict_occurred,
            tries_needed,
        }
    }

    /// The new value, present only on success.
    #[must_use]
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Consumes the result and returns the new value.
    #[must_use]
    pub fn into_value(self) -> Option<V> {
        self.value
    }

    /// The outcome.
    #[must_use]
    pub fn state(&self) -> UpdateItemState {
        self.state
    }

    /// Returns `true` for [`UpdateItemState::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == UpdateItemState::Success
    }

    /// Whether at least one attempt lost against a concurrent writer.
    #[must_use]
    pub fn version_conflict_occurred(&self) -> bool {
        self.version_conflict_occurred
    }

    /// How many attempts were made.
    #[must_use]
    pub fn tries_needed(&self) -> u32 {
        self.tries_needed
    }
}
