//! Core type definitions for the Harbor storage node.
//!
//! # Key Types
//!
//! - [`ContentId`]: fixed-length base-36 identifier assigned at upload time
//! - [`ShardLabel`]: a suffix-derived partition label of the content keyspace
//! - [`NodeId`]: a storage node's stable public identity
//!
//! A [`ContentId`] maps to exactly one shard: its trailing suffix characters.
//! Validation happens once, at [`ContentId::parse`]; everything downstream
//! operates on already-valid identifiers.

use crate::error::{HarborError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// The base-36 alphabet content ids and shard labels are drawn from,
/// in canonical enumeration order.
pub const ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Fixed length of every content id.
pub const CONTENT_ID_LEN: usize = 25;

/// Unique identifier for a piece of uploaded content.
///
/// Always exactly [`CONTENT_ID_LEN`] characters of lowercase base-36. An id
/// of the wrong length or alphabet is a hard error, never a silent fallback.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Parse and validate a content id.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != CONTENT_ID_LEN {
            return Err(HarborError::InvalidContentId(format!(
                "expected {} characters, got {}",
                CONTENT_ID_LEN,
                s.len()
            )));
        }
        if !s.bytes().all(|b| ALPHABET.contains(&b)) {
            return Err(HarborError::InvalidContentId(format!(
                "id contains characters outside base-36 alphabet: {}",
                s
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Generate a fresh random content id.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let id: String = (0..CONTENT_ID_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The trailing `k` characters of the id.
    pub fn suffix(&self, k: usize) -> &str {
        &self.0[self.0.len() - k..]
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ContentId {
    type Err = HarborError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// One partition of the content-id keyspace, identified by a fixed-length
/// base-36 suffix. The shard space for suffix length `k` has 36^k members
/// and is static and fully enumerable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardLabel(String);

impl ShardLabel {
    /// Construct a label without membership checking. Callers that accept
    /// labels from outside must go through `Sharder::check_known` first.
    pub(crate) fn new_unchecked(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShardLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A storage node's stable, cryptographically derived public identity.
///
/// Used both as the rendezvous-hash input and as the registry key. Node ids
/// are opaque to Harbor; ordering (for hash tie-breaks) is plain lexicographic
/// byte order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A job is keyed by the content id of the upload that created it.
pub type JobId = ContentId;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_parse_valid() {
        let id = ContentId::parse("clbcdefgaclbcdefgaclbcdef").unwrap();
        assert_eq!(id.as_str().len(), CONTENT_ID_LEN);
        assert_eq!(id.suffix(1), "f");
    }

    #[test]
    fn test_content_id_wrong_length() {
        let err = ContentId::parse("tooshort").unwrap_err();
        assert!(matches!(err, HarborError::InvalidContentId(_)));
    }

    #[test]
    fn test_content_id_bad_alphabet() {
        // uppercase and punctuation are outside the alphabet
        let err = ContentId::parse("CLBCDEFGACLBCDEFGACLBCDEF").unwrap_err();
        assert!(matches!(err, HarborError::InvalidContentId(_)));
    }

    #[test]
    fn test_content_id_generate_is_valid() {
        for _ in 0..50 {
            let id = ContentId::generate();
            ContentId::parse(id.as_str()).unwrap();
        }
    }

    #[test]
    fn test_node_id_ordering_is_lexicographic() {
        let a = NodeId::new("0xaaa");
        let b = NodeId::new("0xbbb");
        assert!(a < b);
    }
}
