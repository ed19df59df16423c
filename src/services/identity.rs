//! User and tag lifecycle
//!
//! Creation and handle changes for the two handle-bearing collections.
//! A handle change is a version-checked primary write followed by index
//! maintenance; every other field update leaves the index alone.

use std::sync::Arc;

use tracing::info;

use crate::error::{ReputationError, Result};
use crate::ident::Identifier;
use crate::keys::{self, Collection};
use crate::model::{self, TagData, UserData};
use crate::retry::{with_version_retry, RetryPolicy};
use crate::store::DocumentStore;

use super::events::{EventBus, ReputationEvent};
use super::find_tag;
use super::handle_index::{HandleIndexService, IndexedEntity};

/// User/tag creation and handle management
pub struct IdentityService {
    store: Arc<dyn DocumentStore>,
    events: Arc<EventBus>,
    index: Arc<HandleIndexService>,
    retry: RetryPolicy,
}

impl IdentityService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        events: Arc<EventBus>,
        index: Arc<HandleIndexService>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            events,
            index,
            retry,
        }
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Create a user. The key embeds only the immutable identifier; the
    /// handle lives in the body and in the secondary index.
    pub async fn create_user(&self, handle: &str, display_name: &str) -> Result<UserData> {
        keys::validate_handle(handle)?;
        self.require_handle_free(IndexedEntity::User, handle, None)
            .await?;

        let user = UserData {
            user_id: Identifier::generate(),
            handle: handle.to_string(),
            display_name: display_name.to_string(),
        };

        let key = keys::user_key(&user.user_id);
        self.store
            .put(
                Collection::Users,
                &key,
                user.user_id.as_str(),
                serde_json::to_value(&user)?,
                None,
            )
            .await?;

        self.index.create_user_entry(&user).await?;

        info!(user = %user.user_id, handle = %user.handle, "User created");
        self.events.emit(ReputationEvent::UserCreated {
            user_id: user.user_id.to_string(),
            handle: user.handle.clone(),
        });
        Ok(user)
    }

    /// Fetch a user by identifier
    pub async fn get_user(&self, user_id: &Identifier) -> Result<UserData> {
        let key = keys::user_key(user_id);
        match self.store.get(Collection::Users, &key).await? {
            Some(doc) => doc.data_as(),
            None => Err(ReputationError::NotFound {
                collection: Collection::Users.name().to_string(),
                key,
            }),
        }
    }

    /// Resolve a user handle (case-insensitive) to the user
    pub async fn resolve_user_handle(&self, handle: &str) -> Result<Option<UserData>> {
        match self.index.resolve(IndexedEntity::User, handle).await? {
            Some(user_id) => Ok(Some(self.get_user(&user_id).await?)),
            None => Ok(None),
        }
    }

    /// Change a user's handle. The primary write is version-conditioned
    /// and retried; the index is synced from the exact before/after
    /// snapshots that won the write.
    pub async fn update_user_handle(
        &self,
        user_id: &Identifier,
        new_handle: &str,
    ) -> Result<UserData> {
        keys::validate_handle(new_handle)?;
        self.require_handle_free(IndexedEntity::User, new_handle, Some(user_id))
            .await?;

        let key = keys::user_key(user_id);
        let context = format!("{}/{}", Collection::Users, key);

        let (before, after) = with_version_retry(&self.retry, &context, || {
            let key = key.clone();
            async move {
                let doc = self.store.get(Collection::Users, &key).await?.ok_or_else(|| {
                    ReputationError::NotFound {
                        collection: Collection::Users.name().to_string(),
                        key: key.clone(),
                    }
                })?;

                let before: UserData = doc.data_as()?;
                let mut after = before.clone();
                after.handle = new_handle.to_string();

                self.store
                    .put(
                        Collection::Users,
                        &key,
                        &doc.owner,
                        serde_json::to_value(&after)?,
                        Some(doc.version),
                    )
                    .await?;
                Ok((before, after))
            }
        })
        .await?;

        self.index.sync_user_handle(&before, &after).await?;
        Ok(after)
    }

    // =========================================================================
    // Tags
    // =========================================================================

    /// Create a tag with its scoring configuration. The creator must
    /// exist; their identifier becomes the first key segment.
    pub async fn create_tag(&self, input: CreateTagInput) -> Result<TagData> {
        self.get_user(&input.creator_user_id).await?;
        self.require_handle_free(IndexedEntity::Tag, &input.handle, None)
            .await?;

        let tag = TagData {
            tag_id: Identifier::generate(),
            creator_user_id: input.creator_user_id,
            handle: input.handle,
            decay_time_periods: input.decay_time_periods,
            reputation_threshold: input.reputation_threshold,
            vote_reward: input.vote_reward,
            min_users_for_threshold: input.min_users_for_threshold,
        };
        model::validate_tag_config(&tag)?;

        let key = keys::tag_key(&tag.creator_user_id, &tag.tag_id);
        self.store
            .put(
                Collection::Tags,
                &key,
                tag.creator_user_id.as_str(),
                serde_json::to_value(&tag)?,
                None,
            )
            .await?;

        self.index.create_tag_entry(&tag).await?;

        info!(tag = %tag.tag_id, handle = %tag.handle, "Tag created");
        self.events.emit(ReputationEvent::TagCreated {
            tag_id: tag.tag_id.to_string(),
            handle: tag.handle.clone(),
        });
        Ok(tag)
    }

    /// Locate a tag by its identifier alone
    pub async fn get_tag(&self, tag_id: &Identifier) -> Result<TagData> {
        find_tag(self.store.as_ref(), tag_id).await
    }

    /// Change a tag's handle. Same shape as the user rename: a
    /// version-conditioned primary write, then index maintenance from the
    /// snapshots that won.
    pub async fn update_tag_handle(
        &self,
        tag_id: &Identifier,
        new_handle: &str,
    ) -> Result<TagData> {
        keys::validate_handle(new_handle)?;
        self.require_handle_free(IndexedEntity::Tag, new_handle, Some(tag_id))
            .await?;

        let current = find_tag(self.store.as_ref(), tag_id).await?;
        let key = keys::tag_key(&current.creator_user_id, &current.tag_id);
        let context = format!("{}/{}", Collection::Tags, key);

        let (before, after) = with_version_retry(&self.retry, &context, || {
            let key = key.clone();
            async move {
                let doc = self.store.get(Collection::Tags, &key).await?.ok_or_else(|| {
                    ReputationError::NotFound {
                        collection: Collection::Tags.name().to_string(),
                        key: key.clone(),
                    }
                })?;

                let before: TagData = doc.data_as()?;
                let mut after = before.clone();
                after.handle = new_handle.to_string();

                self.store
                    .put(
                        Collection::Tags,
                        &key,
                        &doc.owner,
                        serde_json::to_value(&after)?,
                        Some(doc.version),
                    )
                    .await?;
                Ok((before, after))
            }
        })
        .await?;

        self.index.sync_tag_handle(&before, &after).await?;

        info!(tag = %tag_id, handle = %new_handle, "Tag handle updated");
        Ok(after)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Case-insensitive handle uniqueness within one collection. `exempt`
    /// allows an entity to keep (or re-case) its own handle.
    async fn require_handle_free(
        &self,
        entity: IndexedEntity,
        handle: &str,
        exempt: Option<&Identifier>,
    ) -> Result<()> {
        if let Some(holder) = self.index.resolve(entity, handle).await? {
            if exempt != Some(&holder) {
                return Err(ReputationError::Validation(format!(
                    "handle {:?} is already taken",
                    handle
                )));
            }
        }
        Ok(())
    }
}

/// Input for tag creation
#[derive(Debug, Clone)]
pub struct CreateTagInput {
    pub creator_user_id: Identifier,
    pub handle: String,
    pub decay_time_periods: Vec<model::DecayPeriod>,
    pub reputation_threshold: f64,
    pub vote_reward: f64,
    pub min_users_for_threshold: u32,
}
