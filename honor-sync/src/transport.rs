//! The peer block transport [`tower::Service`] interface.
//!
//! The sync engine fetches block hashes and chain segments from the peer that
//! announced a candidate. Each request names its peer, so a single transport
//! service can talk to every honor node.

use std::{ops::RangeInclusive, sync::Arc};

use honor_chain::block::{self, Block, Height};

use crate::peer::PeerAddress;

/// A request to a peer's block transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Returns the hash of the peer's block at `height`.
    ///
    /// Returns [`Response::BlockHash`], with `None` if the peer has no block at
    /// that height.
    BlockHash {
        /// The peer to ask.
        peer: PeerAddress,
        /// The requested height.
        height: Height,
    },

    /// Returns the peer's blocks at `heights`, in ascending height order.
    ///
    /// Returns [`Response::Blocks`]. The peer may return fewer blocks than
    /// requested, so callers must check the returned segment.
    ChainSegment {
        /// The peer to ask.
        peer: PeerAddress,
        /// The requested heights.
        heights: RangeInclusive<Height>,
    },
}

impl Request {
    /// Returns the peer this request is sent to.
    pub fn peer(&self) -> &PeerAddress {
        match self {
            Request::BlockHash { peer, .. } | Request::ChainSegment { peer, .. } => peer,
        }
    }
}

/// A response from a peer's block transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// Response to [`Request::BlockHash`].
    BlockHash(Option<block::Hash>),

    /// Response to [`Request::ChainSegment`].
    Blocks(Vec<Arc<Block>>),
}
