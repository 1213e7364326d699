//! Hashing primitives for the digital object repository.
//!
//! Provides the domain-separated 128-bit digest the storage key mapper uses
//! for directory fan-out, and BLAKE3 content checksums computed while
//! content streams into storage.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod checksum;
pub mod hasher;

pub use checksum::{ChecksumError, ContentDigest, HashingReader};
pub use hasher::{PathDigest, PathHasher, PATH_DIGEST_HEX_LEN, PATH_DIGEST_LEN};
