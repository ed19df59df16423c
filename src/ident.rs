//! Sortable time-ordered identifiers
//!
//! ULID-style: a 48-bit millisecond timestamp followed by an 80-bit random
//! suffix, encoded as 26 Crockford base32 characters. Lexicographic order
//! equals creation order, which is what makes composite keys built from
//! these identifiers range-scannable.
//!
//! Identifiers are generated and accepted only in canonical uppercase.

use std::fmt;

use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{ReputationError, Result};

/// Crockford base32: excludes I, L, O, U to avoid visual ambiguity
const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Encoded identifier length: 10 time chars + 16 random chars
pub const IDENTIFIER_LEN: usize = 26;

const TIME_CHARS: usize = 10;

/// Earliest plausible timestamp: 2020-01-01T00:00:00Z in ms.
/// Anything older is corrupt input, not a real identifier.
const MIN_EPOCH_MS: u64 = 1_577_836_800_000;

/// Latest plausible timestamp: 2100-01-01T00:00:00Z in ms
const MAX_EPOCH_MS: u64 = 4_102_444_800_000;

/// A fixed-length, time-ordered, randomly-suffixed unique identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Generate a new identifier from the system clock and thread RNG
    pub fn generate() -> Self {
        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        let mut random = [0u8; 10];
        rand::thread_rng().fill_bytes(&mut random);
        Self::from_parts(now_ms, &random)
    }

    /// Build an identifier from an explicit timestamp and 80 random bits.
    /// Used by `generate` and by tests that need deterministic ordering.
    pub fn from_parts(timestamp_ms: u64, random: &[u8; 10]) -> Self {
        let mut out = [0u8; IDENTIFIER_LEN];

        // 48-bit timestamp, most significant group first
        let mut ts = timestamp_ms & 0xFFFF_FFFF_FFFF;
        for i in (0..TIME_CHARS).rev() {
            out[i] = ALPHABET[(ts & 0x1F) as usize];
            ts >>= 5;
        }

        // 80 random bits into 16 base32 chars
        let mut acc: u128 = 0;
        for &b in random {
            acc = (acc << 8) | b as u128;
        }
        for i in (TIME_CHARS..IDENTIFIER_LEN).rev() {
            out[i] = ALPHABET[(acc & 0x1F) as usize];
            acc >>= 5;
        }

        // Alphabet bytes are valid UTF-8
        Identifier(String::from_utf8_lossy(&out).into_owned())
    }

    /// Parse and validate an identifier string.
    ///
    /// Checks exact length, alphabet membership, canonical uppercase form,
    /// and that the decoded timestamp falls in a sane epoch range.
    pub fn parse(s: &str) -> Result<Self> {
        validate(s)?;
        Ok(Identifier(s.to_string()))
    }

    /// The canonical string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the millisecond timestamp component
    pub fn timestamp_ms(&self) -> u64 {
        decode_timestamp(&self.0).unwrap_or(0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate an identifier string without allocating
pub fn validate(s: &str) -> Result<()> {
    if s.len() != IDENTIFIER_LEN {
        return Err(ReputationError::Format(format!(
            "identifier must be {} chars, got {}: {:?}",
            IDENTIFIER_LEN,
            s.len(),
            s
        )));
    }

    for (i, c) in s.bytes().enumerate() {
        if symbol_value(c).is_none() {
            return Err(ReputationError::Format(format!(
                "identifier has invalid symbol {:?} at position {}: {:?}",
                c as char, i, s
            )));
        }
    }

    let ts = decode_timestamp(s).ok_or_else(|| {
        ReputationError::Format(format!("identifier timestamp undecodable: {:?}", s))
    })?;

    if !(MIN_EPOCH_MS..MAX_EPOCH_MS).contains(&ts) {
        return Err(ReputationError::Format(format!(
            "identifier timestamp {} outside sane epoch range: {:?}",
            ts, s
        )));
    }

    Ok(())
}

/// Map a canonical-uppercase base32 byte to its 5-bit value
fn symbol_value(c: u8) -> Option<u64> {
    ALPHABET.iter().position(|&a| a == c).map(|p| p as u64)
}

fn decode_timestamp(s: &str) -> Option<u64> {
    let mut ts: u64 = 0;
    for c in s.bytes().take(TIME_CHARS) {
        ts = (ts << 5) | symbol_value(c)?;
    }
    Some(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_validates() {
        for _ in 0..100 {
            let id = Identifier::generate();
            assert!(validate(id.as_str()).is_ok(), "generated id invalid: {}", id);
        }
    }

    #[test]
    fn test_generate_time_ordered() {
        let mut last = Identifier::generate().timestamp_ms();
        for _ in 0..50 {
            let id = Identifier::generate();
            let ts = id.timestamp_ms();
            assert!(ts >= last, "time component went backwards");
            last = ts;
        }
    }

    #[test]
    fn test_timestamp_round_trip() {
        let ts = 1_700_000_000_123u64;
        let id = Identifier::from_parts(ts, &[7u8; 10]);
        assert_eq!(id.timestamp_ms(), ts);
        assert_eq!(id.as_str().len(), IDENTIFIER_LEN);
    }

    #[test]
    fn test_sorts_by_creation_time() {
        let a = Identifier::from_parts(1_700_000_000_000, &[0xFF; 10]);
        let b = Identifier::from_parts(1_700_000_000_001, &[0x00; 10]);
        assert!(a < b);
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!(Identifier::parse("01HZX").is_err());
        assert!(Identifier::parse("").is_err());
    }

    #[test]
    fn test_rejects_lowercase() {
        let id = Identifier::generate();
        let lower = id.as_str().to_lowercase();
        assert!(Identifier::parse(&lower).is_err());
    }

    #[test]
    fn test_rejects_ambiguous_symbols() {
        // I, L, O, U are excluded from the alphabet
        let mut s = Identifier::generate().as_str().to_string();
        s.replace_range(12..13, "O");
        assert!(Identifier::parse(&s).is_err());
    }

    #[test]
    fn test_rejects_all_zero() {
        let s = "0".repeat(IDENTIFIER_LEN);
        assert!(Identifier::parse(&s).is_err());
    }

    #[test]
    fn test_rejects_far_future_timestamp() {
        let id = Identifier::from_parts(MAX_EPOCH_MS + 1, &[1u8; 10]);
        assert!(Identifier::parse(id.as_str()).is_err());
    }
}
