//! Suffix sharding of the content-id keyspace.
//!
//! A content id maps to exactly one shard: its trailing `k` characters. The
//! complete shard space for a suffix length `k` has 36^k members and is
//! enumerable in a fixed order, so every node derives the identical shard set
//! without any communication.

use crate::error::{HarborError, Result};
use crate::types::{ContentId, ShardLabel, ALPHABET};
use std::collections::HashSet;

/// Pure mapping from content ids to shard labels.
#[derive(Debug, Clone)]
pub struct Sharder {
    suffix_len: usize,
    known: HashSet<String>,
}

impl Sharder {
    /// Create a sharder for the given suffix length.
    pub fn new(suffix_len: usize) -> Self {
        let known = enumerate_labels(suffix_len).into_iter().collect();
        Self { suffix_len, known }
    }

    /// The configured suffix length `k`.
    pub fn suffix_len(&self) -> usize {
        self.suffix_len
    }

    /// Map a raw id string to its shard. Validates the id first; a wrong
    /// length or alphabet is a hard error, not a fallback.
    pub fn shard_for_str(&self, id: &str) -> Result<ShardLabel> {
        let id = ContentId::parse(id)?;
        Ok(self.shard_for(&id))
    }

    /// Map a validated content id to its shard: the trailing `k` characters.
    pub fn shard_for(&self, id: &ContentId) -> ShardLabel {
        ShardLabel::new_unchecked(id.suffix(self.suffix_len))
    }

    /// All 36^k shard labels, in a fixed deterministic order.
    pub fn enumerate_shards(&self) -> Vec<ShardLabel> {
        enumerate_labels(self.suffix_len)
            .into_iter()
            .map(ShardLabel::new_unchecked)
            .collect()
    }

    /// Check a label received from outside against the enumerated set.
    pub fn check_known(&self, label: &str) -> Result<ShardLabel> {
        if self.known.contains(label) {
            Ok(ShardLabel::new_unchecked(label))
        } else {
            Err(HarborError::UnknownShard(label.to_string()))
        }
    }
}

/// Generate every base-36 string of length `k`, alphabet order, most
/// significant position first.
fn enumerate_labels(k: usize) -> Vec<String> {
    let mut labels = vec![String::new()];
    for _ in 0..k {
        let mut next = Vec::with_capacity(labels.len() * ALPHABET.len());
        for prefix in &labels {
            for &c in ALPHABET.iter() {
                let mut label = prefix.clone();
                label.push(c as char);
                next.push(label);
            }
        }
        labels = next;
    }
    labels
}
