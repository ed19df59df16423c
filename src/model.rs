//! Persisted document bodies
//!
//! Every collection stores versioned documents whose `data` field decodes
//! into one of these types. Keys embed only immutable attributes; anything
//! mutable (handles in particular) lives in the body so it can change
//! without rewriting the key.

use serde::{Deserialize, Serialize};

use crate::error::{ReputationError, Result};
use crate::ident::Identifier;
use crate::keys;

/// Lower bound for decay multipliers
pub const DECAY_MULTIPLIER_MIN: f64 = 0.05;
/// Upper bound for decay multipliers
pub const DECAY_MULTIPLIER_MAX: f64 = 1.5;

/// User body. The handle is deliberately excluded from the primary key so
/// it can change; renames go through the handle index maintainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserData {
    pub user_id: Identifier,
    pub handle: String,
    pub display_name: String,
}

/// One decay threshold: votes at least `months` old contribute at
/// `multiplier`. Below 1 decays, exactly 1 is a no-op, above 1 rewards
/// durable standing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayPeriod {
    pub months: u32,
    pub multiplier: f64,
}

/// Tag body: a named reputation category plus its scoring rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagData {
    pub tag_id: Identifier,
    pub creator_user_id: Identifier,
    pub handle: String,
    /// Ordered list; the first matching period wins, so authors list the
    /// oldest bucket first when periods overlap
    pub decay_time_periods: Vec<DecayPeriod>,
    pub reputation_threshold: f64,
    pub vote_reward: f64,
    pub min_users_for_threshold: u32,
}

/// Vote body. Immutable after creation: a changed opinion is a new vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteData {
    pub voter_id: Identifier,
    pub tag_id: Identifier,
    pub target_id: Identifier,
    pub vote_id: Identifier,
    /// -1 or +1, never 0
    pub value: i64,
    /// Voter's effective weight, frozen at cast time
    pub weight: f64,
    /// Cast time in epoch milliseconds
    pub created_at: i64,
}

/// Reputation body: exactly one per (user, tag) pair, enforced by the key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationData {
    pub user_id: Identifier,
    pub tag_id: Identifier,
    /// Weighted, decayed sum of votes received
    pub basis_reputation: f64,
    /// Accumulated bootstrap participation rewards
    pub voting_rewards_reputation: f64,
    /// basis + rewards as of the last calculation
    pub last_effective_reputation: f64,
    /// When the engine last touched this document, epoch nanoseconds
    pub last_calculation_ns: i64,
    /// Weight this user's own votes carry in the tag
    pub vote_weight: f64,
    /// Whether last_effective_reputation met the tag threshold
    pub has_voting_power: bool,
}

impl ReputationData {
    /// Zeroed reputation for a pair that has never been voted on
    pub fn empty(user_id: Identifier, tag_id: Identifier) -> Self {
        Self {
            user_id,
            tag_id,
            basis_reputation: 0.0,
            voting_rewards_reputation: 0.0,
            last_effective_reputation: 0.0,
            last_calculation_ns: 0,
            vote_weight: 0.0,
            has_voting_power: false,
        }
    }

    /// basis + rewards; the number the threshold gate reads
    pub fn effective_reputation(&self) -> f64 {
        self.basis_reputation + self.voting_rewards_reputation
    }
}

/// Handle index body: records only the entity the handle resolves to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleIndexData {
    pub target_entity_id: Identifier,
}

// =============================================================================
// Validation
// =============================================================================

/// Validate a vote value: -1 or +1, never 0
pub fn validate_vote_value(value: i64) -> Result<()> {
    if value != 1 && value != -1 {
        return Err(ReputationError::Validation(format!(
            "vote value must be -1 or +1, got {}",
            value
        )));
    }
    Ok(())
}

/// Validate a tag's scoring configuration
pub fn validate_tag_config(tag: &TagData) -> Result<()> {
    keys::validate_handle(&tag.handle)?;

    if tag.reputation_threshold < 0.0 {
        return Err(ReputationError::Validation(format!(
            "reputation_threshold must be non-negative, got {}",
            tag.reputation_threshold
        )));
    }

    if tag.vote_reward < 0.0 {
        return Err(ReputationError::Validation(format!(
            "vote_reward must be non-negative, got {}",
            tag.vote_reward
        )));
    }

    for period in &tag.decay_time_periods {
        if period.multiplier < DECAY_MULTIPLIER_MIN || period.multiplier > DECAY_MULTIPLIER_MAX {
            return Err(ReputationError::Validation(format!(
                "decay multiplier must be in [{}, {}], got {} for {} months",
                DECAY_MULTIPLIER_MIN, DECAY_MULTIPLIER_MAX, period.multiplier, period.months
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(periods: Vec<DecayPeriod>) -> TagData {
        TagData {
            tag_id: Identifier::generate(),
            creator_user_id: Identifier::generate(),
            handle: "good-drivers".into(),
            decay_time_periods: periods,
            reputation_threshold: 100.0,
            vote_reward: 5.0,
            min_users_for_threshold: 10,
        }
    }

    #[test]
    fn test_vote_value_bounds() {
        assert!(validate_vote_value(1).is_ok());
        assert!(validate_vote_value(-1).is_ok());
        assert!(validate_vote_value(0).is_err());
        assert!(validate_vote_value(2).is_err());
    }

    #[test]
    fn test_tag_config_decay_bounds() {
        assert!(validate_tag_config(&tag(vec![])).is_ok());
        assert!(validate_tag_config(&tag(vec![DecayPeriod {
            months: 12,
            multiplier: 1.5
        }]))
        .is_ok());
        assert!(validate_tag_config(&tag(vec![DecayPeriod {
            months: 12,
            multiplier: 1.6
        }]))
        .is_err());
        assert!(validate_tag_config(&tag(vec![DecayPeriod {
            months: 6,
            multiplier: 0.01
        }]))
        .is_err());
    }

    #[test]
    fn test_empty_reputation() {
        let rep = ReputationData::empty(Identifier::generate(), Identifier::generate());
        assert_eq!(rep.effective_reputation(), 0.0);
        assert!(!rep.has_voting_power);
    }
}
