// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Handle ordering rules.
//!
//! Handles are ordered from the edge (index 0, fastest and most local) to the
//! authority (last index, slowest and the source of truth). Reads walk
//! [`edge_to_authority`]; adds and updates walk [`authority_to_edge`] so the
//! source of truth accepts a change before any faster tier does.

use std::ops::Range;

/// Which handles receive an item found further down the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum CacheUpdateMode {
    /// Hits are never copied into other handles.
    None,
    /// Hits are copied into every handle closer to the edge than the one that hit.
    #[default]
    Up,
    /// Hits are copied into every other handle.
    Full,
}

impl CacheUpdateMode {
    /// The indices that receive an item found at `found` in a chain of `len` handles.
    #[must_use]
    pub fn propagation_targets(self, found: usize, len: usize) -> Vec<usize> {
        match self {
            Self::None => Vec::new(),
            Self::Up => (0..found.min(len)).collect(),
            Self::Full => (0..len).filter(|&index| index != found).collect(),
        }
    }
}

/// Indices from the edge to the authority.
pub(crate) fn edge_to_authority(len: usize) -> Range<usize> {
    0..len
}

/// Indices from the authority to the edge.
pub(crate) fn authority_to_edge(len: usize) -> std::iter::Rev<Range<usize>> {
    (0..len).rev()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn up_targets_closer_handles_only() {
        assert_eq!(CacheUpdateMode::Up.propagation_targets(2, 3), vec![0, 1]);
        assert!(CacheUpdateMode::Up.propagation_targets(0, 3).is_empty());
    }

    #[test]
    fn full_targets_everything_but_the_hit() {
        assert_eq!(CacheUpdateMode::Full.propagation_targets(1, 3), vec![0, 2]);
    }

    #[test]
    fn none_targets_nothing() {
        assert!(CacheUpdateMode::None.propagation_targets(2, 3).is_empty());
    }

    #[test]
    fn orderings() {
        assert_eq!(edge_to_authority(3).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(authority_to_edge(3).collect::<Vec<_>>(), vec![2, 1, 0]);
        assert_eq!(authority_to_edge(0).count(), 0);
    }

    #[test]
    fn default_is_up() {
        assert_eq!(CacheUpdateMode::default(), CacheUpdateMode::Up);
    }
}
