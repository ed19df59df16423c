//! In-memory store adapter
//!
//! Ordered BTreeMaps behind a concurrent collection map. Prefix queries
//! use the map's range scan; substring queries walk the collection, which
//! is fine at in-memory test scale. Version semantics match the host
//! store exactly, so the engine's conflict handling can be exercised
//! without a backend.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::error::{ReputationError, Result};
use crate::keys::Collection;

use super::{key_matches, paginate, Document, DocumentStore, ListQuery, Page};

/// In-memory document store
pub struct MemoryStore {
    collections: DashMap<&'static str, BTreeMap<String, Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let collections = DashMap::new();
        for collection in Collection::ALL {
            collections.insert(collection.name(), BTreeMap::new());
        }
        Self { collections }
    }

    /// Number of documents in a collection, for tests and diagnostics
    pub fn len(&self, collection: Collection) -> usize {
        self.collections
            .get(collection.name())
            .map(|tree| tree.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection) == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Document>> {
        Ok(self
            .collections
            .get(collection.name())
            .and_then(|tree| tree.get(key).cloned()))
    }

    async fn list(&self, collection: Collection, query: &ListQuery) -> Result<Page> {
        let tree = self
            .collections
            .get(collection.name())
            .ok_or_else(|| ReputationError::Store(format!("unknown collection {}", collection)))?;

        let matched: Vec<Document> = match &query.key_prefix {
            // Range scan from the prefix; stop at the first non-match
            Some(prefix) => tree
                .range::<String, _>((Bound::Included(prefix.clone()), Bound::Unbounded))
                .take_while(|(k, _)| k.starts_with(prefix.as_str()))
                .filter(|(k, _)| key_matches(query, k))
                .map(|(_, doc)| doc.clone())
                .filter(|doc| query.matches_meta(doc))
                .collect(),
            None => tree
                .iter()
                .filter(|(k, _)| key_matches(query, k))
                .map(|(_, doc)| doc.clone())
                .filter(|doc| query.matches_meta(doc))
                .collect(),
        };

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

        let mut tree = self
            .collections
            .get_mut(collection.name())
            .ok_or_else(|| ReputationError::Store(format!("unknown collection {}", collection)))?;

        let now = Utc::now().timestamp_millis();

        match (tree.get(key), expected_version) {
            (None, None) => {
                let doc = Document {
                    key: key.to_string(),
                    owner: owner.to_string(),
                    created_at: now,
                    updated_at: now,
                    version: 1,
                    data,
                };
                tree.insert(key.to_string(), doc.clone());
                Ok(doc)
            }
            (None, Some(expected)) => Err(ReputationError::VersionConflict {
                collection: collection.name().to_string(),
                key: key.to_string(),
                expected,
                found: 0,
            }),
            (Some(existing), Some(expected)) if existing.version == expected => {
                let doc = Document {
                    key: key.to_string(),
                    owner: existing.owner.clone(),
                    created_at: existing.created_at,
                    updated_at: now,
                    version: expected + 1,
                    data,
                };
                tree.insert(key.to_string(), doc.clone());
                Ok(doc)
            }
            (Some(existing), expected) => Err(ReputationError::VersionConflict {
                collection: collection.name().to_string(),
                key: key.to_string(),
                expected: expected.unwrap_or(0),
                found: existing.version,
            }),
        }
    }

    async fn delete(&self, collection: Collection, key: &str, expected_version: u64) -> Result<()> {
        let mut tree = self
            .collections
            .get_mut(collection.name())
            .ok_or_else(|| ReputationError::Store(format!("unknown collection {}", collection)))?;

        match tree.get(key) {
            None => Err(ReputationError::NotFound {
                collection: collection.name().to_string(),
                key: key.to_string(),
            }),
            Some(existing) if existing.version != expected_version => {
                Err(ReputationError::VersionConflict {
                    collection: collection.name().to_string(),
                    key: key.to_string(),
                    expected: expected_version,
                    found: existing.version,
                })
            }
            Some(_) => {
                tree.remove(key);
                Ok(())
            }
        }
    }
}
