//! Service layer
//!
//! Services encapsulate the subsystem's business logic over the document
//! store seam:
//!
//! ```text
//! Application (HTTP handlers, schedulers)
//!     ↓
//! Service layer (identity / votes / engine / handle index)
//!     ↓
//! DocumentStore (host platform, sled, or in-memory)
//! ```
//!
//! Each external write is one short-lived invocation; the only shared
//! state between invocations is the store itself.

pub mod engine;
pub mod events;
pub mod handle_index;
pub mod identity;
pub mod votes;

// Re-exports
pub use engine::{apply_vote, decay_multiplier, ReputationEngine};
pub use events::{CalculationMode, EventBus, ReputationEvent};
pub use handle_index::{HandleIndexService, IndexedEntity};
pub use identity::{CreateTagInput, IdentityService};
pub use votes::{VoteReceipt, VoteService};

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{ReputationError, Result};
use crate::ident::Identifier;
use crate::keys::{self, Collection};
use crate::model::TagData;
use crate::store::{DocumentStore, ListQuery};

/// Locate a tag document when only the tag identifier is known. The tag
/// key leads with the creator, so this goes through the tag-id fragment.
pub(crate) async fn find_tag(store: &dyn DocumentStore, tag_id: &Identifier) -> Result<TagData> {
    let page = store
        .list(
            Collection::Tags,
            &ListQuery::contains(keys::tag_id_fragment(tag_id)),
        )
        .await?;

    match page.documents.first() {
        Some(doc) => doc.data_as(),
        None => Err(ReputationError::NotFound {
            collection: Collection::Tags.name().to_string(),
            key: keys::tag_id_fragment(tag_id),
        }),
    }
}

/// Service container for dependency injection.
///
/// Holds all services over one shared store and event bus; pass this to
/// whatever hosts the subsystem.
pub struct Services {
    pub identity: Arc<IdentityService>,
    pub votes: Arc<VoteService>,
    pub engine: Arc<ReputationEngine>,
    pub handle_index: Arc<HandleIndexService>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Wire all services over a store with the given configuration.
    /// Spawns the event log listener, so this must run inside a tokio
    /// runtime.
    pub fn new(store: Arc<dyn DocumentStore>, config: EngineConfig) -> Self {
        let events = Arc::new(EventBus::new());
        events::spawn_logging_listener(&events);
        let engine = Arc::new(ReputationEngine::new(
            store.clone(),
            events.clone(),
            config.clone(),
        ));
        let handle_index = Arc::new(HandleIndexService::new(
            store.clone(),
            events.clone(),
            config.retry.clone(),
        ));
        let identity = Arc::new(IdentityService::new(
            store.clone(),
            events.clone(),
            handle_index.clone(),
            config.retry.clone(),
        ));
        let votes = Arc::new(VoteService::new(store, events.clone(), engine.clone()));

        Self {
            identity,
            votes,
            engine,
            handle_index,
            events,
        }
    }

    /// Wire services with default configuration
    pub fn with_defaults(store: Arc<dyn DocumentStore>) -> Self {
        Self::new(store, EngineConfig::default())
    }
}
