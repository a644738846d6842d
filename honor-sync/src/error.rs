//! Error types for block sync.

use thiserror::Error;

use honor_chain::{
    block::{self, Height},
    HonorNodeId,
};

use crate::{peer::PeerAddress, BoxError};

/// An error describing why a chain storage request failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The storage service returned an error.
    #[error("chain storage request failed")]
    Request(#[source] BoxError),

    /// The storage has no chain head, so it was never initialized, or it is corrupt.
    #[error("chain storage has no head block")]
    MissingHead,

    /// A block below the chain head is missing.
    #[error("chain storage is missing block {height:?} below the head")]
    MissingBlock {
        /// The height of the missing block.
        height: Height,
    },

    /// The stored blocks do not match the stored chain head.
    #[error(
        "chain storage is inconsistent: \
         blocks above {fork_height:?} do not end at head {head_height:?} {head_hash}"
    )]
    InconsistentHead {
        /// The height the blocks were read from.
        fork_height: Height,
        /// The height of the stored chain head.
        head_height: Height,
        /// The hash of the stored chain head.
        head_hash: block::Hash,
    },
}

impl From<BoxError> for StorageError {
    fn from(source: BoxError) -> Self {
        Self::Request(source)
    }
}

/// An error describing why a peer's chain segment can't be applied as-is.
///
/// Segment errors are detected before any local blocks are rolled back.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum SegmentError {
    /// The peer returned no blocks.
    #[error("peer returned an empty chain segment")]
    Empty,

    /// The peer returned a block at an unexpected height.
    #[error("expected block at height {expected:?}, got {actual:?}")]
    UnexpectedHeight {
        /// The next height in the segment.
        expected: Height,
        /// The height of the returned block.
        actual: Height,
    },

    /// A block does not extend the previous block in the segment, or the fork point.
    #[error("block {height:?} does not extend parent {expected_parent}")]
    BrokenLink {
        /// The height of the unlinked block.
        height: Height,
        /// The hash the block should have as its parent.
        expected_parent: block::Hash,
    },

    /// The segment does not end at the announced candidate block.
    #[error("segment ends at {actual_height:?} {actual_hash}, not candidate {expected_hash}")]
    WrongTip {
        /// The candidate block hash.
        expected_hash: block::Hash,
        /// The height of the last block in the segment.
        actual_height: Height,
        /// The hash of the last block in the segment.
        actual_hash: block::Hash,
    },

    /// The peer does not have a block at a height we asked about.
    #[error("peer has no block at height {height:?}")]
    MissingPeerBlock {
        /// The requested height.
        height: Height,
    },

    /// The peer transport answered a request with the wrong kind of response.
    #[error("peer transport returned an unexpected response to a {request} request")]
    UnexpectedResponse {
        /// The kind of request that was sent.
        request: &'static str,
    },
}

/// An error describing why a block sync cycle failed.
///
/// All errors except [`SyncError::RecoveryFailed`] leave the local chain
/// exactly as it was before the cycle started.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// Chain storage is unreachable or corrupt.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The candidate block is too far above the local chain, or the fork is too
    /// far below the candidate block.
    #[error(
        "candidate block {candidate_height:?} is outside the configured fork limit {limit_height:?}"
    )]
    ForkTooDeep {
        /// The height of the rejected candidate block.
        candidate_height: Height,
        /// The highest acceptable candidate height, or the lowest acceptable
        /// fork height.
        limit_height: Height,
    },

    /// The announcing honor node has no usable address.
    #[error("honor node {honor_node_id} has no resolvable address")]
    UnknownPeer {
        /// The announcing honor node.
        honor_node_id: HonorNodeId,
        /// The registry or address parsing error.
        #[source]
        source: BoxError,
    },

    /// The peer's blocks could not be fetched, or were not a valid chain segment.
    #[error("fetching blocks from peer {peer} failed")]
    FetchFailed {
        /// The peer we tried to fetch from.
        peer: PeerAddress,
        /// The transport or segment error.
        #[source]
        source: BoxError,
    },

    /// A peer block failed to apply, and the local chain was restored.
    #[error("applying peer block {height:?} {hash} failed, local chain was restored")]
    ApplyFailed {
        /// The height of the failed block.
        height: Height,
        /// The hash of the failed block.
        hash: block::Hash,
        /// The validator or storage error.
        #[source]
        source: BoxError,
    },

    /// Restoring the local chain after a failed reorganization failed.
    ///
    /// The local chain may be inconsistent, so sync must stop until an
    /// operator intervenes.
    #[error(
        "restoring the local chain above fork {fork_height:?} failed: \
         chain state may be inconsistent, operator intervention is required"
    )]
    RecoveryFailed {
        /// The fork point the chain was being restored from.
        fork_height: Height,
        /// The storage error, or the head mismatch.
        #[source]
        source: BoxError,
    },

    /// Sync is halted after an earlier [`SyncError::RecoveryFailed`].
    #[error("block sync is halted after an unrecoverable reorganization failure")]
    Halted,
}

impl SyncError {
    /// Returns `true` if this error must stop further sync cycles.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::RecoveryFailed { .. } | SyncError::Halted)
    }

    /// Returns `true` if this error leaves the candidate queued, and counts
    /// against its attempt limit.
    pub fn is_candidate_failure(&self) -> bool {
        matches!(
            self,
            SyncError::FetchFailed { .. } | SyncError::ApplyFailed { .. }
        )
    }
}

/// The restored chain head does not match the snapshot.
#[derive(Debug, Error)]
#[error("restored chain head {actual:?} does not match the snapshot head {expected:?}")]
pub(crate) struct RestoreMismatch {
    pub expected: crate::ChainHead,
    pub actual: crate::ChainHead,
}
