// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Session configuration.

use core::time::Duration;

use crate::error::Error;
use crate::policy::Coalescing;

/// When a consumer suspended on a pending read is evaluated again.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ResumePolicy {
    /// Re-evaluate on the next turn after the entry settles.
    #[default]
    Immediate,
    /// Re-evaluate no earlier than `interval` after the previous render.
    ///
    /// A fallback that was just shown stays up for at least `interval`, so a
    /// result that arrives quickly can be held back. This models the
    /// inflated completion latency of a throttled fallback.
    Throttled {
        /// Minimum time between renders.
        interval: Duration,
    },
}

/// Which value keys the consumer's read.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum KeySource {
    /// Read with the lagging deferred value.
    #[default]
    Deferred,
    /// Read with the authoritative value, bypassing the deferred value.
    Authoritative,
}

/// Configuration for a [`Session`](crate::Session).
///
/// # Example
///
/// ```
/// use core::time::Duration;
/// use understory_deferred::{Coalescing, KeySource, ResumePolicy, SessionConfig};
///
/// let config = SessionConfig::default()
///     .with_coalescing(Coalescing::CommitEvery(1))
///     .with_resume(ResumePolicy::Throttled {
///         interval: Duration::from_millis(300),
///     })
///     .with_key_source(KeySource::Authoritative);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.commit_delay, Duration::ZERO);
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SessionConfig {
    /// How pending deferred transitions coalesce.
    pub coalescing: Coalescing,
    /// When a suspended consumer is evaluated again.
    pub resume: ResumePolicy,
    /// Which value keys the consumer's read.
    pub key_source: KeySource,
    /// Delay between a flush and the scheduling opportunity it requests.
    pub commit_delay: Duration,
}

impl SessionConfig {
    /// Sets the coalescing policy.
    #[must_use]
    pub fn with_coalescing(mut self, coalescing: Coalescing) -> Self {
        self.coalescing = coalescing;
        self
    }

    /// Sets the resumption policy.
    #[must_use]
    pub fn with_resume(mut self, resume: ResumePolicy) -> Self {
        self.resume = resume;
        self
    }

    /// Sets the key source.
    #[must_use]
    pub fn with_key_source(mut self, key_source: KeySource) -> Self {
        self.key_source = key_source;
        self
    }

    /// Sets the delay before a requested scheduling opportunity.
    #[must_use]
    pub fn with_commit_delay(mut self, commit_delay: Duration) -> Self {
        self.commit_delay = commit_delay;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCommitInterval`] if the coalescing policy is
    /// [`Coalescing::CommitEvery`] with an interval of zero.
    pub fn validate(&self) -> Result<(), Error> {
        self.coalescing.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deferred_immediate_latest() {
        let config = SessionConfig::default();
        assert_eq!(config.coalescing, Coalescing::LatestOnFlush);
        assert_eq!(config.resume, ResumePolicy::Immediate);
        assert_eq!(config.key_source, KeySource::Deferred);
        assert_eq!(config.commit_delay, Duration::ZERO);
    }

    #[test]
    fn invalid_interval_fails_validation() {
        let config = SessionConfig::default().with_coalescing(Coalescing::CommitEvery(0));
        assert_eq!(config.validate(), Err(Error::ZeroCommitInterval));
    }
}
