//! Document store abstraction
//!
//! Mirrors the host platform's storage interface: versioned documents,
//! single-document atomicity, optimistic version checks, and key-pattern
//! list queries. Every query this subsystem runs is expressed as a key
//! prefix or key substring match - no collection is ever fully scanned by
//! the callers.
//!
//! Two adapters ship with the crate:
//! - [`MemoryStore`] - ordered in-memory maps, used in tests and embedding
//! - [`SledStore`] - sled trees with compare-and-swap writes

pub mod memory;
pub mod sled_store;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ReputationError, Result};
use crate::keys::Collection;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

/// A versioned document as persisted by the host store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Composite key, also the only queryable field
    pub key: String,
    /// Identifier of the user the document belongs to
    pub owner: String,
    /// Creation time, epoch milliseconds
    pub created_at: i64,
    /// Last write time, epoch milliseconds
    pub updated_at: i64,
    /// Monotonic per-document version, starts at 1
    pub version: u64,
    /// Collection-typed body
    pub data: serde_json::Value,
}

impl Document {
    /// Decode the body into its collection type
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            ReputationError::Serialization(format!("document {} body: {}", self.key, e))
        })
    }
}

/// Sort order for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListOrder {
    #[default]
    Ascending,
    Descending,
}

/// List query parameters. `key_prefix` and `key_contains` are the only
/// match primitives the host store offers; both may be combined.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Match keys starting with this string
    pub key_prefix: Option<String>,
    /// Match keys containing this string anywhere
    pub key_contains: Option<String>,
    /// Only documents created at or after this epoch-ms instant
    pub created_after: Option<i64>,
    /// Only documents created before this epoch-ms instant
    pub created_before: Option<i64>,
    /// Page size; 0 means the adapter default
    pub limit: usize,
    /// Documents to skip, in key order
    pub offset: usize,
    pub order: ListOrder,
}

/// Default page size when a query leaves `limit` at 0
pub const DEFAULT_PAGE_LIMIT: usize = 100;

impl ListQuery {
    /// Query for all keys under a prefix
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    /// Query for all keys containing a fragment
    pub fn contains(fragment: impl Into<String>) -> Self {
        Self {
            key_contains: Some(fragment.into()),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn created_after(mut self, instant_ms: i64) -> Self {
        self.created_after = Some(instant_ms);
        self
    }

    fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_PAGE_LIMIT
        } else {
            self.limit
        }
    }

    /// Whether a document passes the non-key filters
    fn matches_meta(&self, doc: &Document) -> bool {
        if let Some(after) = self.created_after {
            if doc.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if doc.created_at >= before {
                return false;
            }
        }
        true
    }
}

/// One page of list results
#[derive(Debug, Clone)]
pub struct Page {
    pub documents: Vec<Document>,
    /// Whether more documents matched beyond this page
    pub has_more: bool,
}

/// The storage seam. Implementations must provide single-document
/// atomicity and optimistic version checks; nothing in this crate assumes
/// more than that.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by exact key
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Document>>;

    /// List documents matching a key pattern, paginated, in key order
    async fn list(&self, collection: Collection, query: &ListQuery) -> Result<Page>;

    /// Write a document. `expected_version: None` creates the document and
    /// conflicts if the key already exists; `Some(v)` updates only if the
    /// current version is exactly `v`. The key is validated against the
    /// collection grammar before anything is written.
    async fn put(
        &self,
        collection: Collection,
        key: &str,
        owner: &str,
        data: serde_json::Value,
        expected_version: Option<u64>,
    ) -> Result<Document>;

    /// Delete a document, conditioned on its current version
    async fn delete(&self, collection: Collection, key: &str, expected_version: u64) -> Result<()>;
}

/// Shared by adapters: key-pattern match
fn key_matches(query: &ListQuery, key: &str) -> bool {
    if let Some(prefix) = &query.key_prefix {
        if !key.starts_with(prefix.as_str()) {
            return false;
        }
    }
    if let Some(fragment) = &query.key_contains {
        if !key.contains(fragment.as_str()) {
            return false;
        }
    }
    true
}

/// Shared by adapters: apply order, offset and limit to matched documents
fn paginate(query: &ListQuery, mut matched: Vec<Document>) -> Page {
    if query.order == ListOrder::Descending {
        matched.reverse();
    }
    let limit = query.effective_limit();
    let total = matched.len();
    let documents: Vec<Document> = matched
        .into_iter()
        .skip(query.offset)
        .take(limit)
        .collect();
    let has_more = query.offset + documents.len() < total;
    Page {
        documents,
        has_more,
    }
}
