//! Honor node identities.

use std::fmt;

use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

/// The stable numeric identity of a block-producing honor node.
///
/// Honor node identities are assigned by the node registry, and are used to
/// look up the network address of the peer that announced a block.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
#[serde(transparent)]
pub struct HonorNodeId(pub u64);

impl fmt::Display for HonorNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for HonorNodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}
