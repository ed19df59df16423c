//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Weight a trusted (at-threshold) voter's votes carry
fn default_full_vote_weight() -> f64 {
    1.0
}

/// Weight a sub-threshold voter carries while the tag is still
/// bootstrapping (fewer than `min_users_for_threshold` trusted users)
fn default_bootstrap_vote_weight() -> f64 {
    0.25
}

/// Weight a sub-threshold voter carries once the tag community is
/// self-sustaining; lower than the bootstrap weight by design of the
/// reward cutoff
fn default_downweighted_vote_weight() -> f64 {
    0.1
}

fn default_recompute_page_size() -> usize {
    200
}

/// Tunables for the reputation engine. Everything defaults to sane
/// values; embedders typically deserialize this from their app config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retry policy for version-conflicted reputation writes
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Vote weight for voters at or above the tag threshold
    #[serde(default = "default_full_vote_weight")]
    pub full_vote_weight: f64,

    /// Vote weight for sub-threshold voters during bootstrap
    #[serde(default = "default_bootstrap_vote_weight")]
    pub bootstrap_vote_weight: f64,

    /// Vote weight for sub-threshold voters after the community is
    /// self-sustaining
    #[serde(default = "default_downweighted_vote_weight")]
    pub downweighted_vote_weight: f64,

    /// Page size for windowed/full recompute vote listing
    #[serde(default = "default_recompute_page_size")]
    pub recompute_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            full_vote_weight: default_full_vote_weight(),
            bootstrap_vote_weight: default_bootstrap_vote_weight(),
            downweighted_vote_weight: default_downweighted_vote_weight(),
            recompute_page_size: default_recompute_page_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.full_vote_weight, 1.0);
        assert!(config.bootstrap_vote_weight > config.downweighted_vote_weight);
    }
}
