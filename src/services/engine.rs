//! Reputation scoring engine
//!
//! Maintains the per-(user, tag) reputation document through three
//! calculation depths:
//!
//! - **Instant**: `basis += value * weight` on every vote. O(1), no decay,
//!   keeps the UI responsive.
//! - **Windowed**: replaces the instant-path contribution of votes newer
//!   than a cutoff with their decayed contribution. Scheduled drift
//!   correction without the cost of a full pass.
//! - **Full**: re-derives the basis from the complete on-target vote
//!   history. The only exactly-correct mode; reserved for maintenance.
//!
//! Vote weight is frozen at cast time and stored on the vote document, so
//! a voter's later reputation changes never rewrite history and the full
//! recompute stays idempotent.
//!
//! Every write is a version-conditioned read-compute-write cycle run
//! through the bounded retry combinator; a vote's effect is never
//! silently dropped.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::ident::Identifier;
use crate::keys::{self, Collection};
use crate::model::{DecayPeriod, ReputationData, TagData, VoteData};
use crate::retry::with_version_retry;
use crate::store::{DocumentStore, ListQuery};

use super::events::{CalculationMode, EventBus, ReputationEvent};

/// Milliseconds per scoring month (30 days)
const MILLIS_PER_MONTH: i64 = 30 * 24 * 60 * 60 * 1000;

/// Return the multiplier of the first period the vote's age has reached,
/// or 1.0 (no decay) when no period matches or the list is empty.
///
/// The list order is meaningful: when periods overlap, the first match
/// wins, so tag authors list the oldest bucket first. Multipliers below 1
/// decay, exactly 1 is a no-op, above 1 rewards durability.
pub fn decay_multiplier(age_months: f64, periods: &[DecayPeriod]) -> f64 {
    for period in periods {
        if age_months >= period.months as f64 {
            return period.multiplier;
        }
    }
    1.0
}

/// Instant-path increment: no decay, no threshold logic
pub fn apply_vote(rep: &mut ReputationData, value: i64, weight: f64) {
    rep.basis_reputation += value as f64 * weight;
}

/// Vote age in scoring months at a given instant
fn age_months(created_at_ms: i64, as_of_ms: i64) -> f64 {
    (as_of_ms - created_at_ms).max(0) as f64 / MILLIS_PER_MONTH as f64
}

/// The tiered reputation scoring engine
pub struct ReputationEngine {
    store: Arc<dyn DocumentStore>,
    events: Arc<EventBus>,
    config: EngineConfig,
}

impl ReputationEngine {
    pub fn new(store: Arc<dyn DocumentStore>, events: Arc<EventBus>, config: EngineConfig) -> Self {
        Self {
            store,
            events,
            config,
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current reputation for a (user, tag) pair; zeroed if the pair has
    /// never been touched
    pub async fn get_reputation(
        &self,
        user_id: &Identifier,
        tag_id: &Identifier,
    ) -> Result<ReputationData> {
        let key = keys::reputation_key(user_id, tag_id);
        match self.store.get(Collection::Reputations, &key).await? {
            Some(doc) => doc.data_as(),
            None => Ok(ReputationData::empty(user_id.clone(), tag_id.clone())),
        }
    }

    /// Count users whose reputation in the tag meets the threshold,
    /// stopping as soon as the tag's self-sustaining minimum is reached
    pub async fn count_trusted_users(&self, tag: &TagData) -> Result<u32> {
        let fragment = keys::reputations_in_tag_fragment(&tag.tag_id);
        let mut trusted = 0u32;
        let mut offset = 0usize;

        loop {
            let query = ListQuery::contains(fragment.clone())
                .with_limit(self.config.recompute_page_size)
                .with_offset(offset);
            let page = self.store.list(Collection::Reputations, &query).await?;
            let fetched = page.documents.len();

            for doc in &page.documents {
                let rep: ReputationData = doc.data_as()?;
                if rep.has_voting_power {
                    trusted += 1;
                    if trusted >= tag.min_users_for_threshold {
                        return Ok(trusted);
                    }
                }
            }

            if !page.has_more {
                return Ok(trusted);
            }
            offset += fetched;
        }
    }

    /// Whether the bootstrap reward loophole is closed for this tag
    pub async fn tag_is_self_sustaining(&self, tag: &TagData) -> Result<bool> {
        if tag.min_users_for_threshold == 0 {
            return Ok(true);
        }
        Ok(self.count_trusted_users(tag).await? >= tag.min_users_for_threshold)
    }

    /// Derive the weight a voter's vote carries right now, and whether the
    /// vote earns the bootstrap participation reward.
    pub async fn derive_vote_weight(
        &self,
        voter_rep: &ReputationData,
        tag: &TagData,
    ) -> Result<(f64, bool)> {
        if voter_rep.has_voting_power {
            return Ok((self.config.full_vote_weight, false));
        }
        if self.tag_is_self_sustaining(tag).await? {
            // Community sustains itself: sub-threshold votes are
            // down-weighted and no longer rewarded
            Ok((self.config.downweighted_vote_weight, false))
        } else {
            Ok((self.config.bootstrap_vote_weight, true))
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Instant path: fold one vote into the target's reputation
    pub async fn record_vote_effect(
        &self,
        target_id: &Identifier,
        tag: &TagData,
        value: i64,
        weight: f64,
    ) -> Result<ReputationData> {
        self.update_reputation(target_id, tag, CalculationMode::Instant, |rep| {
            apply_vote(rep, value, weight);
        })
        .await
    }

    /// Grant the tag's participation reward to a sub-threshold voter
    pub async fn grant_vote_reward(
        &self,
        voter_id: &Identifier,
        tag: &TagData,
    ) -> Result<ReputationData> {
        let reward = tag.vote_reward;
        let rep = self
            .update_reputation(voter_id, tag, CalculationMode::Instant, |rep| {
                rep.voting_rewards_reputation += reward;
            })
            .await?;

        self.events.emit(ReputationEvent::BootstrapRewardGranted {
            user_id: voter_id.to_string(),
            tag_id: tag.tag_id.to_string(),
            reward,
        });
        Ok(rep)
    }

    /// Windowed path: replace the raw instant-path contribution of votes
    /// newer than `since_ms` with their decayed contribution, leaving
    /// older, already-decayed contributions untouched.
    ///
    /// The adjustment is delta-based: `since_ms` must be the instant of
    /// the previous correction pass (or the tag's creation for a first
    /// pass). Re-running with the same window applies the correction
    /// twice; use [`Self::recompute_full`] to re-derive from scratch.
    pub async fn recompute_window(
        &self,
        user_id: &Identifier,
        tag: &TagData,
        since_ms: i64,
    ) -> Result<ReputationData> {
        let now_ms = Utc::now().timestamp_millis();
        let votes = self.list_votes_on(user_id, tag, Some(since_ms)).await?;

        // The instant path credited each window vote at value * weight;
        // the decayed contribution is value * weight * multiplier, so the
        // correction per vote is value * weight * (multiplier - 1).
        let mut adjustment = 0.0;
        for vote in &votes {
            let age = age_months(vote.created_at, now_ms);
            let multiplier = decay_multiplier(age, &tag.decay_time_periods);
            adjustment += vote.value as f64 * vote.weight * (multiplier - 1.0);
        }

        debug!(
            user = %user_id,
            tag = %tag.tag_id,
            window_votes = votes.len(),
            adjustment = adjustment,
            "Windowed recompute"
        );

        self.update_reputation(user_id, tag, CalculationMode::Windowed, |rep| {
            rep.basis_reputation += adjustment;
        })
        .await
    }

    /// Full path: re-derive the basis from the complete vote history at
    /// the current instant. The only exactly-correct mode.
    pub async fn recompute_full(
        &self,
        user_id: &Identifier,
        tag: &TagData,
    ) -> Result<ReputationData> {
        self.recompute_full_at(user_id, tag, Utc::now().timestamp_millis())
            .await
    }

    /// Full recompute with an explicit age reference instant. Idempotent:
    /// unchanged history and the same `as_of_ms` yield a bit-identical
    /// basis.
    pub async fn recompute_full_at(
        &self,
        user_id: &Identifier,
        tag: &TagData,
        as_of_ms: i64,
    ) -> Result<ReputationData> {
        let votes = self.list_votes_on(user_id, tag, None).await?;

        let mut basis = 0.0;
        for vote in &votes {
            let age = age_months(vote.created_at, as_of_ms);
            basis += vote.value as f64 * vote.weight * decay_multiplier(age, &tag.decay_time_periods);
        }

        info!(
            user = %user_id,
            tag = %tag.tag_id,
            votes = votes.len(),
            basis = basis,
            "Full recompute"
        );

        self.update_reputation(user_id, tag, CalculationMode::Full, |rep| {
            rep.basis_reputation = basis;
        })
        .await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// All votes cast on `user_id` in the tag, optionally bounded below by
    /// creation time. Pages through the store; votes are immutable, so
    /// offset pagination is safe here.
    async fn list_votes_on(
        &self,
        user_id: &Identifier,
        tag: &TagData,
        since_ms: Option<i64>,
    ) -> Result<Vec<VoteData>> {
        let fragment = keys::votes_on_fragment(&tag.tag_id, user_id);
        let mut votes = Vec::new();
        let mut offset = 0usize;

        loop {
            let mut query = ListQuery::contains(fragment.clone())
                .with_limit(self.config.recompute_page_size)
                .with_offset(offset);
            if let Some(since) = since_ms {
                query = query.created_after(since);
            }

            let page = self.store.list(Collection::Votes, &query).await?;
            let fetched = page.documents.len();
            for doc in &page.documents {
                votes.push(doc.data_as::<VoteData>()?);
            }

            if !page.has_more {
                return Ok(votes);
            }
            offset += fetched;
        }
    }

    /// The one read-compute-write cycle every reputation mutation goes
    /// through: load (or lazily initialize) the document, mutate, refresh
    /// the derived fields, write back conditioned on the version we read,
    /// and retry the whole cycle on conflict.
    async fn update_reputation<F>(
        &self,
        user_id: &Identifier,
        tag: &TagData,
        mode: CalculationMode,
        mutate: F,
    ) -> Result<ReputationData>
    where
        F: Fn(&mut ReputationData),
    {
        // Snapshot the weight a sub-threshold vote would carry right now,
        // so the persisted vote_weight field matches what the cast path
        // would actually derive
        let sub_threshold_weight = if self.tag_is_self_sustaining(tag).await? {
            self.config.downweighted_vote_weight
        } else {
            self.config.bootstrap_vote_weight
        };

        let key = keys::reputation_key(user_id, &tag.tag_id);
        let context = format!("{}/{}", Collection::Reputations, key);
        let mutate = &mutate;

        let rep = with_version_retry(&self.config.retry, &context, || {
            let key = key.clone();
            async move {
                let existing = self.store.get(Collection::Reputations, &key).await?;
                let (mut rep, version) = match &existing {
                    Some(doc) => (doc.data_as::<ReputationData>()?, Some(doc.version)),
                    None => (
                        ReputationData::empty(user_id.clone(), tag.tag_id.clone()),
                        None,
                    ),
                };

                mutate(&mut rep);
                self.refresh_derived_fields(&mut rep, tag, sub_threshold_weight);

                self.store
                    .put(
                        Collection::Reputations,
                        &key,
                        user_id.as_str(),
                        serde_json::to_value(&rep)?,
                        version,
                    )
                    .await?;
                Ok(rep)
            }
        })
        .await?;

        self.events.emit(ReputationEvent::ReputationUpdated {
            user_id: user_id.to_string(),
            tag_id: tag.tag_id.to_string(),
            effective_reputation: rep.last_effective_reputation,
            has_voting_power: rep.has_voting_power,
            mode,
        });

        Ok(rep)
    }

    /// Recompute the fields derived from the basis: effective score, the
    /// threshold gate, and the user's own vote weight in this tag.
    /// `sub_threshold_weight` is the weight a below-threshold vote carries
    /// given the tag's current self-sustaining state.
    fn refresh_derived_fields(
        &self,
        rep: &mut ReputationData,
        tag: &TagData,
        sub_threshold_weight: f64,
    ) {
        rep.last_effective_reputation = rep.effective_reputation();
        rep.has_voting_power = rep.last_effective_reputation >= tag.reputation_threshold;
        rep.vote_weight = if rep.has_voting_power {
            self.config.full_vote_weight
        } else {
            sub_threshold_weight
        };
        rep.last_calculation_ns = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_else(|| Utc::now().timestamp_millis().saturating_mul(1_000_000));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(months: u32, multiplier: f64) -> DecayPeriod {
        DecayPeriod { months, multiplier }
    }

    #[test]
    fn test_decay_empty_periods_is_noop() {
        assert_eq!(decay_multiplier(0.0, &[]), 1.0);
        assert_eq!(decay_multiplier(500.0, &[]), 1.0);
    }

    #[test]
    fn test_decay_durability_reward_period() {
        // A vote aged into {months: 12, multiplier: 1.5} gets exactly 1.5
        let periods = [period(12, 1.5)];
        assert_eq!(decay_multiplier(12.0, &periods), 1.5);
        assert_eq!(decay_multiplier(36.0, &periods), 1.5);
        // Not yet aged in: no decay
        assert_eq!(decay_multiplier(11.9, &periods), 1.0);
    }

    #[test]
    fn test_decay_first_matching_period_wins() {
        // Overlapping periods: oldest bucket listed first
        let periods = [period(24, 0.5), period(6, 0.8)];
        assert_eq!(decay_multiplier(30.0, &periods), 0.5);
        assert_eq!(decay_multiplier(12.0, &periods), 0.8);
        assert_eq!(decay_multiplier(1.0, &periods), 1.0);
    }

    #[test]
    fn test_decay_exact_one_supported() {
        let periods = [period(6, 1.0)];
        assert_eq!(decay_multiplier(7.0, &periods), 1.0);
    }

    #[test]
    fn test_apply_vote_math() {
        let mut rep = ReputationData::empty(Identifier::generate(), Identifier::generate());
        apply_vote(&mut rep, 1, 0.25);
        apply_vote(&mut rep, -1, 1.0);
        assert!((rep.basis_reputation - (0.25 - 1.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn test_age_months() {
        let now = 1_700_000_000_000i64;
        assert_eq!(age_months(now, now), 0.0);
        assert_eq!(age_months(now - MILLIS_PER_MONTH, now), 1.0);
        // Clock skew: a vote "from the future" counts as fresh
        assert_eq!(age_months(now + 1000, now), 0.0);
    }
}
