//! Retry policy with exponential backoff and jitter.

use std::time::Duration;

use rand::Rng;

use object_indexer_shared::Stage;

/// Bounded exponential backoff for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Randomize the upper half of each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(5000),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before retry number `retry` (zero-based).
    ///
    /// The exponential delay is capped at `max_delay`; with jitter enabled the
    /// result lies between half of it and all of it.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter || delay.is_zero() {
            return delay;
        }

        let half = delay / 2;
        let spread = (delay - half).as_millis() as u64;
        half + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

/// One retry policy per stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagePolicies {
    pub replication: RetryPolicy,
    pub enrichment: RetryPolicy,
    pub metadata_commit: RetryPolicy,
    pub indexing: RetryPolicy,
}

impl StagePolicies {
    /// The same policy for every stage.
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self {
            replication: policy.clone(),
            enrichment: policy.clone(),
            metadata_commit: policy.clone(),
            indexing: policy,
        }
    }

    pub fn with_stage(mut self, stage: Stage, policy: RetryPolicy) -> Self {
        *self.for_stage_mut(stage) = policy;
        self
    }

    pub fn for_stage(&self, stage: Stage) -> &RetryPolicy {
        match stage {
            Stage::Replication => &self.replication,
            Stage::Enrichment => &self.enrichment,
            Stage::MetadataCommit => &self.metadata_commit,
            Stage::Indexing => &self.indexing,
        }
    }

    fn for_stage_mut(&mut self, stage: Stage) -> &mut RetryPolicy {
        match stage {
            Stage::Replication => &mut self.replication,
            Stage::Enrichment => &mut self.enrichment,
            Stage::MetadataCommit => &mut self.metadata_commit,
            Stage::Indexing => &mut self.indexing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_without_jitter() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(1000))
            .without_jitter();

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(5000));

        for _ in 0..100 {
            let delay = policy.delay_for(2);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(400));
        }
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::default().with_max_attempts(3);
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));

        assert_eq!(RetryPolicy::default().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_per_stage_override() {
        let policies = StagePolicies::default().with_stage(
            Stage::Enrichment,
            RetryPolicy::default().with_max_attempts(5),
        );
        assert_eq!(policies.for_stage(Stage::Enrichment).max_attempts, 5);
        assert_eq!(policies.for_stage(Stage::Indexing).max_attempts, 3);
    }
}
