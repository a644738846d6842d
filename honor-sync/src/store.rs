//! The chain storage [`tower::Service`] interface, and an in-memory implementation.
//!
//! Chain storage holds the local chain blocks, the local chain head
//! ([`ChainHead`]), and the queue of blocks announced by peers
//! ([`SyncCandidate`]s). The sync engine only talks to storage through
//! [`Request`]s and [`Response`]s, so production storage can be swapped in
//! without changing the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use honor_chain::{
    block::{self, Block, Height},
    HonorNodeId,
};

mod memory;
mod request;
mod response;

pub use memory::{MemoryStore, MemoryStoreError};
pub use request::Request;
pub use response::Response;

/// The local node's canonical chain head.
///
/// Always describes the last block that was fully applied to the local chain.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChainHead {
    /// The height of the head block.
    pub height: Height,

    /// The hash of the head block.
    pub hash: block::Hash,

    /// The time the head block was produced.
    pub time: DateTime<Utc>,

    /// The honor node that produced the head block.
    pub honor_node_id: HonorNodeId,

    /// A digest of every block rolled back from this chain.
    ///
    /// Maintained by storage. The sync engine treats it as opaque, but must
    /// restore it exactly when it restores the chain.
    pub rollbacks_hash: block::Hash,
}

impl ChainHead {
    /// Returns the head that results from applying `block` on top of a head
    /// with `rollbacks_hash`.
    pub fn from_block(block: &Block, rollbacks_hash: block::Hash) -> Self {
        Self {
            height: block.header.height,
            hash: block.hash(),
            time: block.header.time,
            honor_node_id: block.header.honor_node_id,
            rollbacks_hash,
        }
    }
}

/// A block announced by a peer, waiting to be synced.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SyncCandidate {
    /// The height of the announced block.
    pub height: Height,

    /// The hash of the announced block.
    ///
    /// A stored candidate with a [`block::Hash::NULL`] hash is an empty
    /// record, and is treated as if there was no candidate.
    pub hash: block::Hash,

    /// The honor node that announced the block.
    pub honor_node_id: HonorNodeId,
}

impl SyncCandidate {
    /// Returns a candidate announcing `block`, from `honor_node_id`.
    pub fn for_block(block: &Block, honor_node_id: HonorNodeId) -> Self {
        Self {
            height: block.header.height,
            hash: block.hash(),
            honor_node_id,
        }
    }
}
