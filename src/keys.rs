//! Composite key codec
//!
//! Every document's primary key is a single string built from typed,
//! prefixed segments: `prefix + "_" + value`, segments joined by `"_"`,
//! with a trailing separator so a prefix match on a partial key can never
//! false-match a longer identifier.
//!
//! ## Key grammar
//!
//! ```text
//! user:        usr_{userId}_
//! tag:         usr_{creatorId}_tag_{tagId}_
//! vote:        usr_{voterId}_tag_{tagId}_tar_{targetId}_key_{voteId}_
//! reputation:  usr_{userId}_tag_{tagId}          (no trailing separator)
//! handleIndex: hdl_{handle}_usr_{userId}_   or   hdl_{handle}_tag_{tagId}_
//! ```
//!
//! The vote segment order (voter, tag, target, vote) is load-bearing: it
//! makes "votes cast *by* V in T" a key prefix (`usr_{V}_tag_{T}_`) and
//! "votes cast *on* U in T" a key substring (`tag_{T}_tar_{U}_`) of the
//! same physical key. Reordering the segments breaks one of the two query
//! patterns, so don't.
//!
//! The reputation key carries no trailing separator and no discriminator:
//! `usr_{userId}_tag_{tagId}` is the whole key, which is what enforces
//! one reputation document per (user, tag) pair.

use crate::error::{ReputationError, Result};
use crate::ident::{self, Identifier};

/// Segment separator. Excluded from the handle alphabet so values can
/// never be confused with structure.
pub const SEPARATOR: char = '_';

/// Segment prefix for user/owner identifiers
pub const SEG_USER: &str = "usr";
/// Segment prefix for tag identifiers
pub const SEG_TAG: &str = "tag";
/// Segment prefix for vote target identifiers
pub const SEG_TARGET: &str = "tar";
/// Segment prefix for vote identifiers
pub const SEG_VOTE: &str = "key";
/// Segment prefix for handle index entries
pub const SEG_HANDLE: &str = "hdl";

/// Minimum handle length
pub const HANDLE_MIN_LEN: usize = 3;
/// Maximum handle length
pub const HANDLE_MAX_LEN: usize = 30;

/// The closed set of collections this subsystem persists to.
///
/// Each variant carries its own key grammar and validator; callers resolve
/// the collection once at the store entry point instead of re-dispatching
/// on collection-name strings throughout the codebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Tags,
    Votes,
    Reputations,
    HandleIndex,
}

impl Collection {
    /// All collections, for store adapters that pre-open trees
    pub const ALL: [Collection; 5] = [
        Collection::Users,
        Collection::Tags,
        Collection::Votes,
        Collection::Reputations,
        Collection::HandleIndex,
    ];

    /// Stable collection name used in store trees and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Tags => "tags",
            Collection::Votes => "votes",
            Collection::Reputations => "reputations",
            Collection::HandleIndex => "handle_index",
        }
    }

    /// Validate a key against this collection's grammar
    pub fn validate_key(&self, key: &str) -> Result<()> {
        parse_key(*self, key).map(|_| ())
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One decoded `(prefix, value)` segment of a composite key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySegment {
    pub prefix: String,
    pub value: String,
}

/// A fully parsed composite key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub segments: Vec<KeySegment>,
}

impl ParsedKey {
    /// Value of the first segment with the given prefix
    pub fn get(&self, prefix: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|s| s.prefix == prefix)
            .map(|s| s.value.as_str())
    }

    /// Value of the nth segment, by position
    pub fn value_at(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(|s| s.value.as_str())
    }
}

// =============================================================================
// Key builders
// =============================================================================

/// `usr_{userId}_`
pub fn user_key(user_id: &Identifier) -> String {
    format!("{}_{}_", SEG_USER, user_id)
}

/// `usr_{creatorId}_tag_{tagId}_`
pub fn tag_key(creator_id: &Identifier, tag_id: &Identifier) -> String {
    format!("{}_{}_{}_{}_", SEG_USER, creator_id, SEG_TAG, tag_id)
}

/// `usr_{voterId}_tag_{tagId}_tar_{targetId}_key_{voteId}_`
pub fn vote_key(
    voter_id: &Identifier,
    tag_id: &Identifier,
    target_id: &Identifier,
    vote_id: &Identifier,
) -> String {
    format!(
        "{}_{}_{}_{}_{}_{}_{}_{}_",
        SEG_USER, voter_id, SEG_TAG, tag_id, SEG_TARGET, target_id, SEG_VOTE, vote_id
    )
}

/// `usr_{userId}_tag_{tagId}` - no trailing separator, no discriminator.
/// The key itself is the uniqueness guarantee for the (user, tag) pair.
pub fn reputation_key(user_id: &Identifier, tag_id: &Identifier) -> String {
    format!("{}_{}_{}_{}", SEG_USER, user_id, SEG_TAG, tag_id)
}

/// `hdl_{handle}_usr_{userId}_` - handle lowercased for the key segment
pub fn handle_index_user_key(handle: &str, user_id: &Identifier) -> String {
    format!(
        "{}_{}_{}_{}_",
        SEG_HANDLE,
        normalize_handle(handle),
        SEG_USER,
        user_id
    )
}

/// `hdl_{handle}_tag_{tagId}_` variant for handle-bearing tags
pub fn handle_index_tag_key(handle: &str, tag_id: &Identifier) -> String {
    format!(
        "{}_{}_{}_{}_",
        SEG_HANDLE,
        normalize_handle(handle),
        SEG_TAG,
        tag_id
    )
}

// =============================================================================
// Query fragments
// =============================================================================

/// Key prefix matching exactly the votes cast *by* `voter_id` in `tag_id`
pub fn votes_by_prefix(voter_id: &Identifier, tag_id: &Identifier) -> String {
    format!("{}_{}_{}_{}_", SEG_USER, voter_id, SEG_TAG, tag_id)
}

/// Key substring matching exactly the votes cast *on* `target_id` in
/// `tag_id`. A substring, not a prefix: it sits mid-key, after the voter
/// segment.
pub fn votes_on_fragment(tag_id: &Identifier, target_id: &Identifier) -> String {
    format!("{}_{}_{}_{}_", SEG_TAG, tag_id, SEG_TARGET, target_id)
}

/// Key prefix matching every handle index entry for a handle
pub fn handle_index_prefix(handle: &str) -> String {
    format!("{}_{}_", SEG_HANDLE, normalize_handle(handle))
}

/// Key substring matching every handle index entry pointing at an entity,
/// regardless of which handle it is filed under
pub fn handle_index_entity_fragment(entity_prefix: &str, entity_id: &Identifier) -> String {
    format!("{}_{}_", entity_prefix, entity_id)
}

/// Key substring matching every reputation document in a tag. Works
/// because the reputation key ends with the tag segment.
pub fn reputations_in_tag_fragment(tag_id: &Identifier) -> String {
    format!("{}_{}", SEG_TAG, tag_id)
}

/// Key substring locating a tag document by tag identifier alone, when
/// the creator half of the key is unknown
pub fn tag_id_fragment(tag_id: &Identifier) -> String {
    format!("{}_{}_", SEG_TAG, tag_id)
}

// =============================================================================
// Parsing
// =============================================================================

/// Expected value type of a grammar slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegKind {
    Ident,
    Handle,
}

/// Parse a key against a collection's grammar.
///
/// Rejects malformed arity deterministically: a vote key must contain
/// exactly four identifier segments in voter/tag/target/vote order, and so
/// on for every other collection.
pub fn parse_key(collection: Collection, key: &str) -> Result<ParsedKey> {
    let (grammar, trailing): (&[(&[&str], SegKind)], bool) = match collection {
        Collection::Users => (&[(&[SEG_USER], SegKind::Ident)], true),
        Collection::Tags => (
            &[(&[SEG_USER], SegKind::Ident), (&[SEG_TAG], SegKind::Ident)],
            true,
        ),
        Collection::Votes => (
            &[
                (&[SEG_USER], SegKind::Ident),
                (&[SEG_TAG], SegKind::Ident),
                (&[SEG_TARGET], SegKind::Ident),
                (&[SEG_VOTE], SegKind::Ident),
            ],
            true,
        ),
        Collection::Reputations => (
            &[(&[SEG_USER], SegKind::Ident), (&[SEG_TAG], SegKind::Ident)],
            false,
        ),
        // The entity segment may point at either a user or a tag
        Collection::HandleIndex => (
            &[
                (&[SEG_HANDLE], SegKind::Handle),
                (&[SEG_USER, SEG_TAG], SegKind::Ident),
            ],
            true,
        ),
    };

    let malformed = |reason: &str| {
        ReputationError::Format(format!(
            "malformed {} key {:?}: {}",
            collection.name(),
            key,
            reason
        ))
    };

    let mut tokens: Vec<&str> = key.split(SEPARATOR).collect();

    if trailing {
        match tokens.pop() {
            Some("") => {}
            _ => return Err(malformed("missing trailing separator")),
        }
    }

    if tokens.len() != grammar.len() * 2 {
        return Err(malformed(&format!(
            "expected {} segments, found {} tokens",
            grammar.len(),
            tokens.len()
        )));
    }

    let mut segments = Vec::with_capacity(grammar.len());
    for (i, (prefixes, kind)) in grammar.iter().enumerate() {
        let prefix = tokens[i * 2];
        let value = tokens[i * 2 + 1];

        if !prefixes.contains(&prefix) {
            return Err(malformed(&format!(
                "segment {} has prefix {:?}, expected one of {:?}",
                i, prefix, prefixes
            )));
        }

        match kind {
            SegKind::Ident => ident::validate(value)?,
            SegKind::Handle => {
                validate_handle(value)?;
                if value != normalize_handle(value) {
                    return Err(malformed("handle segment must be lowercase"));
                }
            }
        }

        segments.push(KeySegment {
            prefix: prefix.to_string(),
            value: value.to_string(),
        });
    }

    Ok(ParsedKey { segments })
}

// =============================================================================
// Handle rules
// =============================================================================

/// Canonical key form of a handle: lowercase. Original case is preserved
/// in document bodies; only key segments are normalized.
pub fn normalize_handle(handle: &str) -> String {
    handle.to_lowercase()
}

/// Validate handle format: 3-30 chars, ASCII alphanumeric plus hyphen.
/// The separator character is excluded by the alphabet, so a handle can
/// never inject structure into a key.
pub fn validate_handle(handle: &str) -> Result<()> {
    if handle.len() < HANDLE_MIN_LEN || handle.len() > HANDLE_MAX_LEN {
        return Err(ReputationError::Validation(format!(
            "handle must be {}-{} chars, got {}: {:?}",
            HANDLE_MIN_LEN,
            HANDLE_MAX_LEN,
            handle.len(),
            handle
        )));
    }

    if !handle
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(ReputationError::Validation(format!(
            "handle may contain only ASCII letters, digits and hyphens: {:?}",
            handle
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> Identifier {
        Identifier::generate()
    }

    #[test]
    fn test_user_key_round_trip() {
        let u = id();
        let key = user_key(&u);
        let parsed = parse_key(Collection::Users, &key).unwrap();
        assert_eq!(parsed.get(SEG_USER), Some(u.as_str()));
    }

    #[test]
    fn test_tag_key_round_trip() {
        let (c, t) = (id(), id());
        let key = tag_key(&c, &t);
        let parsed = parse_key(Collection::Tags, &key).unwrap();
        assert_eq!(parsed.get(SEG_USER), Some(c.as_str()));
        assert_eq!(parsed.get(SEG_TAG), Some(t.as_str()));
    }

    #[test]
    fn test_vote_key_round_trip() {
        let (v, t, u, k) = (id(), id(), id(), id());
        let key = vote_key(&v, &t, &u, &k);
        let parsed = parse_key(Collection::Votes, &key).unwrap();
        assert_eq!(parsed.get(SEG_USER), Some(v.as_str()));
        assert_eq!(parsed.get(SEG_TAG), Some(t.as_str()));
        assert_eq!(parsed.get(SEG_TARGET), Some(u.as_str()));
        assert_eq!(parsed.get(SEG_VOTE), Some(k.as_str()));
    }

    #[test]
    fn test_reputation_key_round_trip() {
        let (u, t) = (id(), id());
        let key = reputation_key(&u, &t);
        assert!(!key.ends_with('_'), "reputation key has no trailing separator");
        let parsed = parse_key(Collection::Reputations, &key).unwrap();
        assert_eq!(parsed.get(SEG_USER), Some(u.as_str()));
        assert_eq!(parsed.get(SEG_TAG), Some(t.as_str()));
    }

    #[test]
    fn test_handle_index_round_trip_both_variants() {
        let u = id();
        let key = handle_index_user_key("Alice", &u);
        let parsed = parse_key(Collection::HandleIndex, &key).unwrap();
        assert_eq!(parsed.get(SEG_HANDLE), Some("alice"));
        assert_eq!(parsed.get(SEG_USER), Some(u.as_str()));

        let t = id();
        let key = handle_index_tag_key("good-drivers", &t);
        let parsed = parse_key(Collection::HandleIndex, &key).unwrap();
        assert_eq!(parsed.get(SEG_TAG), Some(t.as_str()));
    }

    #[test]
    fn test_vote_key_supports_both_query_fragments() {
        let (v, t, u, k) = (id(), id(), id(), id());
        let key = vote_key(&v, &t, &u, &k);
        assert!(key.starts_with(&votes_by_prefix(&v, &t)));
        assert!(key.contains(&votes_on_fragment(&t, &u)));
    }

    #[test]
    fn test_trailing_separator_prevents_false_prefix_match() {
        // A prefix built for one identifier must not match a key whose
        // identifier merely starts with the same characters.
        let v = id();
        let prefix = format!("{}_{}", SEG_USER, &v.as_str()[..10]);
        let full = user_key(&v);
        assert!(full.starts_with(&prefix)); // raw truncation does match...
        let exact = format!("{}_{}_", SEG_USER, v);
        assert!(full.starts_with(&exact)); // ...the separator-terminated form is exact
        assert_ne!(prefix, exact);
    }

    #[test]
    fn test_vote_key_rejects_wrong_arity() {
        let (v, t) = (id(), id());
        // A tag key is not a vote key
        assert!(parse_key(Collection::Votes, &tag_key(&v, &t)).is_err());
        // Missing trailing separator
        let mut key = vote_key(&v, &t, &id(), &id());
        key.pop();
        assert!(parse_key(Collection::Votes, &key).is_err());
    }

    #[test]
    fn test_rejects_wrong_segment_order() {
        let (v, t) = (id(), id());
        let swapped = format!("{}_{}_{}_{}_", SEG_TAG, t, SEG_USER, v);
        assert!(parse_key(Collection::Tags, &swapped).is_err());
    }

    #[test]
    fn test_rejects_invalid_identifier_segment() {
        let key = format!("{}_{}_", SEG_USER, "not-a-real-identifier-here!");
        assert!(parse_key(Collection::Users, &key).is_err());
    }

    #[test]
    fn test_handle_index_rejects_uppercase_handle_segment() {
        let u = id();
        let key = format!("{}_{}_{}_{}_", SEG_HANDLE, "Alice", SEG_USER, u);
        assert!(parse_key(Collection::HandleIndex, &key).is_err());
    }

    #[test]
    fn test_validate_handle() {
        assert!(validate_handle("alice").is_ok());
        assert!(validate_handle("good-drivers-2024").is_ok());
        assert!(validate_handle("ab").is_err()); // too short
        assert!(validate_handle(&"x".repeat(31)).is_err()); // too long
        assert!(validate_handle("under_score").is_err()); // separator char
        assert!(validate_handle("spaced out").is_err());
        assert!(validate_handle("émile").is_err()); // non-ASCII
    }

    #[test]
    fn test_collection_validate_key_dispatch() {
        let (u, t) = (id(), id());
        assert!(Collection::Users.validate_key(&user_key(&u)).is_ok());
        assert!(Collection::Reputations
            .validate_key(&reputation_key(&u, &t))
            .is_ok());
        assert!(Collection::Users.validate_key(&tag_key(&u, &t)).is_err());
    }
}
