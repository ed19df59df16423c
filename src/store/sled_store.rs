//! Sled-backed store adapter
//!
//! One sled tree per collection, document bodies encoded with MessagePack.
//! Optimistic versioning maps onto sled's compare-and-swap: a concurrent
//! writer surfaces as a `VersionConflict`, same as the host store.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sled::{Db, Tree};
use tracing::info;

use crate::error::{ReputationError, Result};
use crate::keys::Collection;

use super::{key_matches, paginate, Document, DocumentStore, ListQuery, Page};

/// Persistent document store over sled
pub struct SledStore {
    db: Db,
}

impl SledStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Opened document store");
        Ok(Self { db })
    }

    /// Open a throwaway store backed by a temp file (for testing)
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn tree(&self, collection: Collection) -> Result<Tree> {
        self.db
            .open_tree(collection.name())
            .map_err(ReputationError::from)
    }

    fn decode(value: &[u8]) -> Result<Document> {
        rmp_serde::from_slice(value).map_err(ReputationError::from)
    }

    fn encode(doc: &Document) -> Result<Vec<u8>> {
        rmp_serde::to_vec(doc).map_err(ReputationError::from)
    }
}

#[async_trait]
impl DocumentStore for SledStore {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Document>> {
        let tree = self.tree(collection)?;
        match tree.get(key.as_bytes())? {
            Some(value) => Ok(Some(Self::decode(&value)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, collection: Collection, query: &ListQuery) -> Result<Page> {
        let tree = self.tree(collection)?;

        let iter: Box<dyn Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>> =
            match &query.key_prefix {
                Some(prefix) => Box::new(tree.scan_prefix(prefix.as_bytes())),
                None => Box::new(tree.iter()),
            };

        let mut matched = Vec::new();
        for item in iter {
            let (key_bytes, value) = item?;
            let key = String::from_utf8_lossy(&key_bytes);
            if !key_matches(query, &key) {
                continue;
            }
            let doc = Self::decode(&value)?;
            if query.matches_meta(&doc) {
                matched.push(doc);
            }
        }

        Ok(paginate(query, matched))
    }

    async fn put(
        &self,
        collection: Collection,
        key: &str,
        owner: &str,
        data: serde_json::Value,
        expected_version: Option<u64>,
    ) -> Result<Document> {
        collection.validate_key(key)?;

        let tree = self.tree(collection)?;
        let now = Utc::now().timestamp_millis();

        let current = tree.get(key.as_bytes())?;
        let conflict = |found: u64| ReputationError::VersionConflict {
            collection: collection.name().to_string(),
            key: key.to_string(),
            expected: expected_version.unwrap_or(0),
            found,
        };

        let (old_bytes, doc) = match (&current, expected_version) {
            (None, None) => (
                None,
                Document {
                    key: key.to_string(),
                    owner: owner.to_string(),
                    created_at: now,
                    updated_at: now,
                    version: 1,
                    data,
                },
            ),
            (None, Some(_)) => return Err(conflict(0)),
            (Some(value), Some(expected)) => {
                let existing = Self::decode(value)?;
                if existing.version != expected {
                    return Err(conflict(existing.version));
                }
                (
                    Some(value.clone()),
                    Document {
                        key: key.to_string(),
                        owner: existing.owner,
                        created_at: existing.created_at,
                        updated_at: now,
                        version: expected + 1,
                        data,
                    },
                )
            }
            (Some(value), None) => {
                let existing = Self::decode(value)?;
                return Err(conflict(existing.version));
            }
        };

        let new_bytes = Self::encode(&doc)?;
        tree.compare_and_swap(key.as_bytes(), old_bytes, Some(new_bytes))?
            .map_err(|cas| {
                // Someone else won the race between our read and the swap
                let found = cas
                    .current
                    .as_deref()
                    .and_then(|v| Self::decode(v).ok())
                    .map(|d| d.version)
                    .unwrap_or(0);
                conflict(found)
            })?;

        Ok(doc)
    }

    async fn delete(&self, collection: Collection, key: &str, expected_version: u64) -> Result<()> {
        let tree = self.tree(collection)?;

        let current = tree.get(key.as_bytes())?.ok_or_else(|| {
            ReputationError::NotFound {
                collection: collection.name().to_string(),
                key: key.to_string(),
            }
        })?;

        let existing = Self::decode(&current)?;
        if existing.version != expected_version {
            return Err(ReputationError::VersionConflict {
                collection: collection.name().to_string(),
                key: key.to_string(),
                expected: expected_version,
                found: existing.version,
            });
        }

        tree.compare_and_swap(key.as_bytes(), Some(current), None::<sled::IVec>)?
            .map_err(|_| ReputationError::VersionConflict {
                collection: collection.name().to_string(),
                key: key.to_string(),
                expected: expected_version,
                found: existing.version,
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::Identifier;
    use crate::keys;
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trip_survives_encoding() {
        let store = SledStore::temporary().unwrap();
        let key = keys::user_key(&Identifier::generate());

        store
            .put(Collection::Users, &key, "owner", json!({"handle": "alice"}), None)
            .await
            .unwrap();

        let doc = store.get(Collection::Users, &key).await.unwrap().unwrap();
        assert_eq!(doc.data["handle"], "alice");
        assert_eq!(doc.version, 1);
    }

    #[tokio::test]
    async fn test_open_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = keys::user_key(&Identifier::generate());

        {
            let store = SledStore::open(dir.path()).unwrap();
            store
                .put(Collection::Users, &key, "owner", json!({"v": 1}), None)
                .await
                .unwrap();
        }

        let store = SledStore::open(dir.path()).unwrap();
        let doc = store.get(Collection::Users, &key).await.unwrap().unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.data["v"], 1);
    }

    #[tokio::test]
    async fn test_version_conflict_on_stale_write() {
        let store = SledStore::temporary().unwrap();
        let key = keys::user_key(&Identifier::generate());

        store
            .put(Collection::Users, &key, "owner", json!({"v": 1}), None)
            .await
            .unwrap();
        store
            .put(Collection::Users, &key, "owner", json!({"v": 2}), Some(1))
            .await
            .unwrap();

        let err = store
            .put(Collection::Users, &key, "owner", json!({"v": 3}), Some(1))
            .await
            .unwrap_err();
        assert!(err.is_version_conflict());
    }

    #[tokio::test]
    async fn test_scan_prefix_and_fragment() {
        let store = SledStore::temporary().unwrap();
        let (voter, tag, target) = (
            Identifier::generate(),
            Identifier::generate(),
            Identifier::generate(),
        );
        let key = keys::vote_key(&voter, &tag, &target, &Identifier::generate());
        store
            .put(Collection::Votes, &key, voter.as_str(), json!({}), None)
            .await
            .unwrap();

        let by = store
            .list(
                Collection::Votes,
                &ListQuery::prefix(keys::votes_by_prefix(&voter, &tag)),
            )
            .await
            .unwrap();
        assert_eq!(by.documents.len(), 1);

        let on = store
            .list(
                Collection::Votes,
                &ListQuery::contains(keys::votes_on_fragment(&tag, &target)),
            )
            .await
            .unwrap();
        assert_eq!(on.documents.len(), 1);
    }
}
