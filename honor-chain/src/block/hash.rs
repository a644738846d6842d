use std::fmt;

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A SHA-256d hash of a block.
///
/// The hash covers the block header and the block payload, so two blocks at
/// the same height with different contents always have different hashes.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Hash(pub [u8; 32]);

/// An error parsing a [`Hash`] from a hex string.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("block hash must be 32 hex-encoded bytes")]
pub struct ParseHashError;

impl Hash {
    /// The all-zero hash.
    ///
    /// Storage uses it for "no block", for example as the parent of the
    /// genesis block, or as the hash of an empty candidate record.
    pub const NULL: Hash = Hash([0; 32]);

    /// Returns `true` if this is the all-zero hash.
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("block::Hash")
            .field(&hex::encode(self.0))
            .finish()
    }
}

impl std::str::FromStr for Hash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; 32];
        if hex::decode_to_slice(s, &mut bytes[..]).is_err() {
            Err(ParseHashError)
        } else {
            Ok(Hash(bytes))
        }
    }
}
