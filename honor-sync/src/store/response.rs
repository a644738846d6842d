//! Chain storage [`tower::Service`] response types.

use std::sync::Arc;

use honor_chain::block::{self, Block};

// Allow *only* this unused import, so that rustdoc link resolution
// will work with inline links.
#[allow(unused_imports)]
use super::Request;
use super::{ChainHead, SyncCandidate};

/// A response to a chain storage [`Request`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// Response to [`Request::Head`].
    Head(Option<ChainHead>),

    /// Response to [`Request::Candidate`].
    Candidate(Option<SyncCandidate>),

    /// Response to [`Request::DeleteStaleCandidates`] and
    /// [`Request::DeleteCandidate`], with the number of deleted candidates.
    Deleted(usize),

    /// Response to [`Request::BlockHash`].
    BlockHash(Option<block::Hash>),

    /// Response to [`Request::Block`].
    Block(Option<Arc<Block>>),

    /// Response to [`Request::BlocksAbove`].
    Blocks(Vec<Arc<Block>>),

    /// Response to [`Request::RollbackTo`], with the removed blocks.
    RolledBack(Vec<Arc<Block>>),

    /// Response to [`Request::CommitBlock`] and [`Request::SetHead`], with the new head.
    Committed(ChainHead),
}
