//! Vote casting and vote queries
//!
//! Orchestrates the full cast path: validation, weight derivation, the
//! immutable vote document, the instant reputation update on the target,
//! and the bootstrap reward on the voter. Also exposes the two query
//! patterns the vote key was designed for.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::error::{ReputationError, Result};
use crate::ident::Identifier;
use crate::keys::{self, Collection};
use crate::model::{self, ReputationData, VoteData};
use crate::store::{DocumentStore, ListQuery};

use super::engine::ReputationEngine;
use super::events::{EventBus, ReputationEvent};
use super::find_tag;

/// Outcome of a successful vote cast
#[derive(Debug, Clone)]
pub struct VoteReceipt {
    pub vote: VoteData,
    /// Target's reputation after the instant update
    pub target_reputation: ReputationData,
    /// Voter's reputation after any bootstrap reward
    pub voter_reputation: ReputationData,
}

/// Vote casting and lookup
pub struct VoteService {
    store: Arc<dyn DocumentStore>,
    events: Arc<EventBus>,
    engine: Arc<ReputationEngine>,
}

impl VoteService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        events: Arc<EventBus>,
        engine: Arc<ReputationEngine>,
    ) -> Self {
        Self {
            store,
            events,
            engine,
        }
    }

    /// Cast a vote by `voter_id` on `target_id` within a tag.
    ///
    /// The vote document is immutable once written; a changed opinion is
    /// a new vote. The voter's weight is derived from their own standing
    /// in the tag at this instant and frozen onto the vote.
    pub async fn cast_vote(
        &self,
        voter_id: &Identifier,
        tag_id: &Identifier,
        target_id: &Identifier,
        value: i64,
    ) -> Result<VoteReceipt> {
        model::validate_vote_value(value)?;

        if voter_id == target_id {
            return Err(ReputationError::Validation(
                "voting on yourself is not allowed".to_string(),
            ));
        }

        let tag = find_tag(self.store.as_ref(), tag_id).await?;
        self.require_user(voter_id).await?;
        self.require_user(target_id).await?;

        let voter_rep = self.engine.get_reputation(voter_id, tag_id).await?;
        let (weight, reward_eligible) = self.engine.derive_vote_weight(&voter_rep, &tag).await?;

        let vote_id = Identifier::generate();
        let vote = VoteData {
            voter_id: voter_id.clone(),
            tag_id: tag_id.clone(),
            target_id: target_id.clone(),
            vote_id: vote_id.clone(),
            value,
            weight,
            created_at: Utc::now().timestamp_millis(),
        };

        let key = keys::vote_key(voter_id, tag_id, target_id, &vote_id);
        self.store
            .put(
                Collection::Votes,
                &key,
                voter_id.as_str(),
                serde_json::to_value(&vote)?,
                None,
            )
            .await?;

        // Instant path on the target; this is what the UI reads back
        let target_reputation = self
            .engine
            .record_vote_effect(target_id, &tag, value, weight)
            .await?;

        let voter_reputation = if reward_eligible {
            self.engine.grant_vote_reward(voter_id, &tag).await?
        } else {
            voter_rep
        };

        info!(
            voter = %voter_id,
            tag = %tag_id,
            target = %target_id,
            value = value,
            weight = weight,
            "Vote cast"
        );
        self.events.emit(ReputationEvent::VoteRecorded {
            vote_id: vote_id.to_string(),
            voter_id: voter_id.to_string(),
            tag_id: tag_id.to_string(),
            target_id: target_id.to_string(),
            value,
            weight,
        });

        Ok(VoteReceipt {
            vote,
            target_reputation,
            voter_reputation,
        })
    }

    /// All votes cast *by* a user in a tag, via the key prefix
    pub async fn votes_by(&self, voter_id: &Identifier, tag_id: &Identifier) -> Result<Vec<VoteData>> {
        self.collect_votes(ListQuery::prefix(keys::votes_by_prefix(voter_id, tag_id)))
            .await
    }

    /// All votes cast *on* a user in a tag, via the key substring
    pub async fn votes_on(&self, target_id: &Identifier, tag_id: &Identifier) -> Result<Vec<VoteData>> {
        self.collect_votes(ListQuery::contains(keys::votes_on_fragment(tag_id, target_id)))
            .await
    }

    async fn collect_votes(&self, base: ListQuery) -> Result<Vec<VoteData>> {
        let mut votes = Vec::new();
        let mut offset = 0usize;
        loop {
            let query = base.clone().with_offset(offset);
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

    async fn require_user(&self, user_id: &Identifier) -> Result<()> {
        let key = keys::user_key(user_id);
        match self.store.get(Collection::Users, &key).await? {
            Some(_) => Ok(()),
            None => Err(ReputationError::NotFound {
                collection: Collection::Users.name().to_string(),
                key,
            }),
        }
    }
}
