//! Token ↔ internal-id mapping with hashed directory fan-out.
//!
//! A [`KeyMapper`] is configured with an internal prefix (for example
//! `file:`) and a hash-path pattern. The pattern is either empty, giving a
//! flat namespace, or `#`-groups separated by `/`. Each group consumes that
//! many leading hex digits of the token's 128-bit path digest and becomes
//! one directory segment:
//!
//! ```text
//! pattern  "##/##/##"
//! token    urn:example1
//! digest   1f7ac0…                    (32 hex digits)
//! id       file:1f/7a/c0/urn%3Aexample1
//! ```
//!
//! The leaf is the percent-encoded token, so the mapping is reversible.
//! Construction rejects invalid patterns; mapping never fails on a
//! configuration problem.

use dor_crypto::{PathHasher, PATH_DIGEST_HEX_LEN};
use dor_types::encoding::{is_canonical, percent_decode, percent_encode, LEAF_UNRESERVED};

use crate::blob::{BlobId, TempKind};
use crate::error::{StoreError, StoreResult};

/// Longest encoded leaf accepted, in bytes. Common filesystems cap a name
/// at 255 bytes; the rest is kept for suffixes such as `.json`.
pub const MAX_LEAF_LEN: usize = 240;

/// Deterministic, reversible mapping from tokens to internal blob ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyMapper {
    internal_prefix: String,
    pattern: String,
    groups: Vec<usize>,
}

impl KeyMapper {
    /// Build a mapper, validating the hash-path pattern.
    ///
    /// # Errors
    ///
    /// `StoreError::Configuration` if the pattern contains anything other
    /// than `#` and `/`, has an empty group, or uses more `#` than the
    /// digest has hex digits.
    pub fn new(internal_prefix: &str, pattern: &str) -> StoreResult<Self> {
        let groups = parse_pattern(pattern)?;
        Ok(Self {
            internal_prefix: internal_prefix.to_string(),
            pattern: pattern.to_string(),
            groups,
        })
    }

    /// A mapper with no hashing: every id is `prefix + leaf`.
    pub fn flat(internal_prefix: &str) -> Self {
        Self {
            internal_prefix: internal_prefix.to_string(),
            pattern: String::new(),
            groups: Vec::new(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn internal_prefix(&self) -> &str {
        &self.internal_prefix
    }

    /// Map a token to its internal id.
    pub fn to_internal(&self, token: &str) -> StoreResult<BlobId> {
        if token.is_empty() {
            return Err(StoreError::InvalidKey {
                key: String::new(),
                reason: "token must not be empty".into(),
            });
        }

        let mut id = self.internal_prefix.clone();
        if !self.groups.is_empty() {
            let hex = PathHasher::STORAGE.digest(token).to_hex();
            let mut offset = 0;
            for &len in &self.groups {
                id.push_str(&hex[offset..offset + len]);
                id.push('/');
                offset += len;
            }
        }
        let leaf = percent_encode(token, LEAF_UNRESERVED);
        if leaf.len() > MAX_LEAF_LEN {
            return Err(StoreError::InvalidKey {
                key: token.to_string(),
                reason: format!(
                    "encoded name is {} bytes, the limit is {MAX_LEAF_LEN}",
                    leaf.len()
                ),
            });
        }
        id.push_str(&leaf);
        Ok(BlobId::new(id))
    }

    /// Map an internal id back to its token.
    ///
    /// Only ids that [`to_internal`](Self::to_internal) could have produced
    /// are accepted: the prefix, segment count, leaf encoding and hash
    /// directories must all match.
    pub fn to_external(&self, id: &BlobId) -> StoreResult<String> {
        let invalid = |reason: &str| StoreError::InvalidKey {
            key: id.to_string(),
            reason: reason.to_string(),
        };

        let rest = id
            .as_str()
            .strip_prefix(self.internal_prefix.as_str())
            .ok_or_else(|| invalid("missing internal prefix"))?;

        let segments: Vec<&str> = rest.split('/').collect();
        if segments.len() != self.groups.len() + 1 {
            return Err(invalid("wrong number of path segments"));
        }
        let leaf = segments[segments.len() - 1];
        if leaf.is_empty() || !is_canonical(leaf, LEAF_UNRESERVED) {
            return Err(invalid("leaf is not a canonical encoding"));
        }
        let token = percent_decode(leaf).map_err(|e| invalid(&e.to_string()))?;

        if !self.groups.is_empty() && self.to_internal(&token)? != *id {
            return Err(invalid("hash directories do not match the token"));
        }
        Ok(token)
    }

    /// A listing prefix for tokens starting with `partial`.
    ///
    /// Only available for a flat layout; hashing scatters tokens that share
    /// a prefix across directories, so `None` is returned otherwise.
    pub fn prefix_for(&self, partial: &str) -> Option<String> {
        if !self.groups.is_empty() {
            return None;
        }
        Some(format!(
            "{}{}",
            self.internal_prefix,
            percent_encode(partial, LEAF_UNRESERVED)
        ))
    }

    /// If `id` is a safe-overwrite temporary of a mapped id, its base id
    /// and kind.
    pub fn temporary(&self, id: &BlobId) -> Option<(BlobId, TempKind)> {
        let (base, kind) = id.split_suffix()?;
        self.to_external(&base).ok().map(|_| (base, kind))
    }
}

fn parse_pattern(pattern: &str) -> StoreResult<Vec<usize>> {
    let bad = |reason: String| StoreError::Configuration {
        pattern: pattern.to_string(),
        reason,
    };

    if pattern.is_empty() {
        return Ok(Vec::new());
    }

    let mut groups = Vec::new();
    for group in pattern.split('/') {
        if group.is_empty() {
            return Err(bad("empty group".into()));
        }
        if let Some(ch) = group.chars().find(|c| *c != '#') {
            return Err(bad(format!("unexpected character {ch:?}")));
        }
        groups.push(group.len());
    }

    let total: usize = groups.iter().sum();
    if total > PATH_DIGEST_HEX_LEN {
        return Err(bad(format!(
            "uses {total} hex digits but the digest only has {PATH_DIGEST_HEX_LEN}"
        )));
    }
    Ok(groups)
}
