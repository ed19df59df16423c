//! Secondary handle index maintenance
//!
//! Handles are mutable and therefore excluded from primary keys; this
//! index is what makes handle lookup cheap anyway. One live entry per
//! entity: `hdl_{handle}_usr_{userId}_` (or the `tag` variant), body
//! holding only the entity identifier.
//!
//! A rename deletes every entry under the old handle, then creates the
//! new one. The two writes are not atomic, so a brief window exists where
//! the entity is indexed under neither handle - acceptable because the
//! index is advisory, never the source of truth for entity existence.
//! What is *not* acceptable is two live entries for one entity, so entry
//! creation refuses if the entity already resolves elsewhere.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ReputationError, Result};
use crate::ident::Identifier;
use crate::keys::{self, Collection, SEG_TAG, SEG_USER};
use crate::model::{HandleIndexData, TagData, UserData};
use crate::retry::{with_version_retry, RetryPolicy};
use crate::store::{DocumentStore, ListQuery};

use super::events::{EventBus, ReputationEvent};

/// Which handle-bearing collection an index entry points into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexedEntity {
    User,
    Tag,
}

impl IndexedEntity {
    fn segment_prefix(&self) -> &'static str {
        match self {
            IndexedEntity::User => SEG_USER,
            IndexedEntity::Tag => SEG_TAG,
        }
    }

    fn index_key(&self, handle: &str, entity_id: &Identifier) -> String {
        match self {
            IndexedEntity::User => keys::handle_index_user_key(handle, entity_id),
            IndexedEntity::Tag => keys::handle_index_tag_key(handle, entity_id),
        }
    }
}

/// Keeps the handle index consistent with its primary entities
pub struct HandleIndexService {
    store: Arc<dyn DocumentStore>,
    events: Arc<EventBus>,
    retry: RetryPolicy,
}

impl HandleIndexService {
    pub fn new(store: Arc<dyn DocumentStore>, events: Arc<EventBus>, retry: RetryPolicy) -> Self {
        Self {
            store,
            events,
            retry,
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Resolve a handle to the entity it is filed under, if any.
    /// Case-insensitive: the index key stores the normalized form.
    pub async fn resolve(
        &self,
        entity: IndexedEntity,
        handle: &str,
    ) -> Result<Option<Identifier>> {
        keys::validate_handle(handle)?;

        let page = self
            .store
            .list(
                Collection::HandleIndex,
                &ListQuery::prefix(keys::handle_index_prefix(handle)),
            )
            .await?;

        for doc in &page.documents {
            let parsed = keys::parse_key(Collection::HandleIndex, &doc.key)?;
            if let Some(value) = parsed.get(entity.segment_prefix()) {
                return Ok(Some(Identifier::parse(value)?));
            }
        }
        Ok(None)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Create the initial index entry for a freshly created user
    pub async fn create_user_entry(&self, user: &UserData) -> Result<()> {
        self.insert_entry(IndexedEntity::User, &user.user_id, &user.handle)
            .await
    }

    /// Create the initial index entry for a freshly created tag
    pub async fn create_tag_entry(&self, tag: &TagData) -> Result<()> {
        self.insert_entry(IndexedEntity::Tag, &tag.tag_id, &tag.handle)
            .await
    }

    /// React to a user document update. Early no-op when the handle did
    /// not change, so unrelated field updates cost nothing here.
    pub async fn sync_user_handle(&self, before: &UserData, after: &UserData) -> Result<()> {
        self.sync(
            IndexedEntity::User,
            &after.user_id,
            &before.handle,
            &after.handle,
        )
        .await
    }

    /// React to a tag document update
    pub async fn sync_tag_handle(&self, before: &TagData, after: &TagData) -> Result<()> {
        self.sync(
            IndexedEntity::Tag,
            &after.tag_id,
            &before.handle,
            &after.handle,
        )
        .await
    }

    async fn sync(
        &self,
        entity: IndexedEntity,
        entity_id: &Identifier,
        old_handle: &str,
        new_handle: &str,
    ) -> Result<()> {
        if keys::normalize_handle(old_handle) == keys::normalize_handle(new_handle) {
            return Ok(());
        }

        self.remove_entries(entity, entity_id, old_handle).await?;
        self.insert_entry(entity, entity_id, new_handle).await?;

        self.events.emit(ReputationEvent::HandleReindexed {
            entity_id: entity_id.to_string(),
            old_handle: old_handle.to_string(),
            new_handle: new_handle.to_string(),
        });
        Ok(())
    }

    /// Delete every index entry filed for this entity under a handle.
    /// Normally exactly one; more than one means an earlier rename was
    /// interrupted, and cleaning them all up here is the repair.
    async fn remove_entries(
        &self,
        entity: IndexedEntity,
        entity_id: &Identifier,
        handle: &str,
    ) -> Result<()> {
        let prefix = entity.index_key(handle, entity_id);
        let page = self
            .store
            .list(Collection::HandleIndex, &ListQuery::prefix(prefix))
            .await?;

        if page.documents.len() > 1 {
            warn!(
                entity = %entity_id,
                handle = %handle,
                entries = page.documents.len(),
                "Multiple index entries for one handle, cleaning up"
            );
        }

        for doc in &page.documents {
            let key = doc.key.clone();
            let context = format!("{}/{}", Collection::HandleIndex, key);
            let store = &self.store;
            with_version_retry(&self.retry, &context, || {
                let key = key.clone();
                async move {
                    match store.get(Collection::HandleIndex, &key).await? {
                        Some(current) => {
                            store
                                .delete(Collection::HandleIndex, &key, current.version)
                                .await
                        }
                        // Already gone; deletion is idempotent
                        None => Ok(()),
                    }
                }
            })
            .await?;
            debug!(key = %doc.key, "Deleted stale handle index entry");
        }
        Ok(())
    }

    /// Create one index entry, refusing if the entity already resolves to
    /// a live index under a different handle. That situation means a
    /// previous rename half-completed in the other direction; it needs an
    /// operator, not a guess.
    async fn insert_entry(
        &self,
        entity: IndexedEntity,
        entity_id: &Identifier,
        handle: &str,
    ) -> Result<()> {
        keys::validate_handle(handle)?;

        let fragment = keys::handle_index_entity_fragment(entity.segment_prefix(), entity_id);
        let existing = self
            .store
            .list(Collection::HandleIndex, &ListQuery::contains(fragment))
            .await?;

        let new_key = entity.index_key(handle, entity_id);
        if let Some(doc) = existing.documents.iter().find(|doc| doc.key != new_key) {
            return Err(ReputationError::IndexInconsistency(format!(
                "entity {} already indexed at {:?}, refusing to also index at {:?}",
                entity_id, doc.key, new_key
            )));
        }

        if existing.documents.iter().any(|doc| doc.key == new_key) {
            // The exact entry already exists; nothing to do
            return Ok(());
        }

        let body = HandleIndexData {
            target_entity_id: entity_id.clone(),
        };
        self.store
            .put(
                Collection::HandleIndex,
                &new_key,
                entity_id.as_str(),
                serde_json::to_value(&body)?,
                None,
            )
            .await?;

        debug!(key = %new_key, "Created handle index entry");
        Ok(())
    }
}
