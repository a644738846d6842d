//! Chain storage [`tower::Service`] request types.

use std::sync::Arc;

use honor_chain::block::{self, Block, Height};

// Allow *only* this unused import, so that rustdoc link resolution
// will work with inline links.
#[allow(unused_imports)]
use super::{ChainHead, Response, SyncCandidate};

/// A request to the chain storage service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Returns the local chain head.
    ///
    /// Returns [`Response::Head`] with the head, or `None` if storage has no
    /// blocks.
    Head,

    /// Returns the queued [`SyncCandidate`] with the lowest height.
    ///
    /// Returns [`Response::Candidate`], with `None` if the queue is empty.
    Candidate,

    /// Deletes every queued candidate at or below `up_to`.
    ///
    /// Returns [`Response::Deleted`] with the number of deleted candidates.
    DeleteStaleCandidates {
        /// The highest stale candidate height.
        up_to: Height,
    },

    /// Deletes the queued candidates with this hash.
    ///
    /// Returns [`Response::Deleted`] with the number of deleted candidates.
    DeleteCandidate(block::Hash),

    /// Returns the hash of the local block at a height.
    ///
    /// Returns [`Response::BlockHash`], with `None` if there is no local block
    /// at that height.
    BlockHash(Height),

    /// Returns the local block at a height.
    ///
    /// Returns [`Response::Block`], with `None` if there is no local block at
    /// that height.
    Block(Height),

    /// Returns every local block above a height, in ascending height order.
    ///
    /// Returns [`Response::Blocks`].
    BlocksAbove(Height),

    /// Removes every local block above a height, and moves the chain head to
    /// the block at that height.
    ///
    /// Returns [`Response::RolledBack`] with the removed blocks, in ascending
    /// height order.
    ///
    /// Fails if there is no local block at that height.
    RollbackTo(Height),

    /// Applies a block on top of the local chain head, and makes it the new head.
    ///
    /// Returns [`Response::Committed`] with the new head.
    ///
    /// Fails if the block does not extend the current head.
    CommitBlock(Arc<Block>),

    /// Overwrites the chain head record.
    ///
    /// Returns [`Response::Committed`] with the new head.
    ///
    /// Fails if the head does not describe the highest local block.
    SetHead(ChainHead),
}

impl Request {
    /// Returns `true` if this request changes the local chain or the candidate queue.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Request::DeleteStaleCandidates { .. }
                | Request::DeleteCandidate(_)
                | Request::RollbackTo(_)
                | Request::CommitBlock(_)
                | Request::SetHead(_)
        )
    }
}
