//! ethos-reputation - composite-key indexing and tiered reputation scoring
//!
//! Library subsystem for a trust-voting platform: users cast signed votes
//! on other users within named categories ("tags"), and the system keeps
//! a decaying, weighted reputation score per (user, tag) pair - without
//! ever scanning an entire collection.
//!
//! ## Architecture
//!
//! ```text
//! cast_vote ──► Composite Key Codec ──► vote document (immutable)
//!                                           │
//!                                           ▼
//!                              Reputation Engine (instant)
//!                                           │
//!         scheduled / admin ──► windowed / full recompute
//!                                           │
//!                                           ▼
//!                      reputation document (version-checked write)
//!
//! handle change ──► Handle Index Maintainer (delete stale, create new)
//! ```
//!
//! Two design decisions carry everything else:
//!
//! - **Keys are the query language.** Every entity key is a string of
//!   typed `prefix_value` segments ([`keys`]); the vote key's segment
//!   order makes both "votes by X in T" and "votes on X in T" a single
//!   key-pattern match against one physical document.
//! - **Versions are the only lock.** Reputation writes are optimistic
//!   read-compute-write cycles with bounded retry ([`retry`]); there is
//!   no in-process shared state and no external locking.

pub mod config;
pub mod error;
pub mod ident;
pub mod keys;
pub mod model;
pub mod retry;
pub mod services;
pub mod store;

// Re-exports
pub use config::EngineConfig;
pub use error::{ReputationError, Result};
pub use ident::Identifier;
pub use keys::Collection;
pub use model::{DecayPeriod, HandleIndexData, ReputationData, TagData, UserData, VoteData};
pub use retry::RetryPolicy;
pub use services::{
    CalculationMode, CreateTagInput, EventBus, HandleIndexService, IdentityService, IndexedEntity,
    ReputationEngine, ReputationEvent, Services, VoteReceipt, VoteService,
};
pub use store::{Document, DocumentStore, ListOrder, ListQuery, MemoryStore, Page, SledStore};
