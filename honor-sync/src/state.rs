//! Typed access to the chain storage service.

use std::sync::Arc;

use tower::{Service, ServiceExt};

use honor_chain::block::{self, Block, Height};

use crate::{
    error::StorageError,
    store::{self, ChainHead, SyncCandidate},
    BoxError,
};

/// A typed wrapper around a chain storage [`Service`].
///
/// Reads are available to every sync component. Chain mutations are
/// crate-private, because only the reorg engine may change the local chain.
#[derive(Clone, Debug)]
pub struct ChainState<ZS> {
    state: ZS,
}

impl<ZS> ChainState<ZS>
where
    ZS: Service<store::Request, Response = store::Response, Error = BoxError>
        + Send
        + Sync
        + Clone
        + 'static,
    ZS::Future: Send,
{
    /// Returns a wrapper around `state`.
    pub fn new(state: ZS) -> Self {
        Self { state }
    }

    async fn call(&self, request: store::Request) -> Result<store::Response, StorageError> {
        self.state
            .clone()
            .oneshot(request)
            .await
            .map_err(StorageError::from)
    }

    /// Returns the local chain head.
    ///
    /// Storage without a head is uninitialized or corrupt, so it is an error.
    pub async fn read_head(&self) -> Result<ChainHead, StorageError> {
        match self.call(store::Request::Head).await? {
            store::Response::Head(Some(head)) => Ok(head),
            store::Response::Head(None) => Err(StorageError::MissingHead),
            _ => unreachable!("Head request can only result in Response::Head"),
        }
    }

    /// Returns the lowest queued candidate, or `None` if there is nothing to sync.
    ///
    /// Empty candidate records are treated as if there was no candidate.
    pub async fn read_candidate(&self) -> Result<Option<SyncCandidate>, StorageError> {
        match self.call(store::Request::Candidate).await? {
            store::Response::Candidate(candidate) => {
                Ok(candidate.filter(|candidate| !candidate.hash.is_null()))
            }
            _ => unreachable!("Candidate request can only result in Response::Candidate"),
        }
    }

    /// Deletes every candidate at or below `up_to`.
    pub async fn delete_stale_candidates(&self, up_to: Height) -> Result<usize, StorageError> {
        match self
            .call(store::Request::DeleteStaleCandidates { up_to })
            .await?
        {
            store::Response::Deleted(count) => Ok(count),
            _ => unreachable!("DeleteStaleCandidates request can only result in Response::Deleted"),
        }
    }

    /// Deletes the candidates with `hash`.
    pub async fn delete_candidate(&self, hash: block::Hash) -> Result<usize, StorageError> {
        match self.call(store::Request::DeleteCandidate(hash)).await? {
            store::Response::Deleted(count) => Ok(count),
            _ => unreachable!("DeleteCandidate request can only result in Response::Deleted"),
        }
    }

    /// Returns the hash of the local block at `height`, if there is one.
    pub async fn block_hash(&self, height: Height) -> Result<Option<block::Hash>, StorageError> {
        match self.call(store::Request::BlockHash(height)).await? {
            store::Response::BlockHash(hash) => Ok(hash),
            _ => unreachable!("BlockHash request can only result in Response::BlockHash"),
        }
    }

    /// Returns the local block at `height`, if there is one.
    pub async fn block(&self, height: Height) -> Result<Option<Arc<Block>>, StorageError> {
        match self.call(store::Request::Block(height)).await? {
            store::Response::Block(block) => Ok(block),
            _ => unreachable!("Block request can only result in Response::Block"),
        }
    }

    /// Returns every local block above `height`, in ascending height order.
    pub async fn blocks_above(&self, height: Height) -> Result<Vec<Arc<Block>>, StorageError> {
        match self.call(store::Request::BlocksAbove(height)).await? {
            store::Response::Blocks(blocks) => Ok(blocks),
            _ => unreachable!("BlocksAbove request can only result in Response::Blocks"),
        }
    }

    /// Removes every local block above `height`, and returns the removed blocks.
    pub(crate) async fn rollback_to(
        &self,
        height: Height,
    ) -> Result<Vec<Arc<Block>>, StorageError> {
        match self.call(store::Request::RollbackTo(height)).await? {
            store::Response::RolledBack(blocks) => Ok(blocks),
            _ => unreachable!("RollbackTo request can only result in Response::RolledBack"),
        }
    }

    /// Applies `block` on top of the local chain head, and returns the new head.
    pub(crate) async fn commit_block(&self, block: Arc<Block>) -> Result<ChainHead, StorageError> {
        match self.call(store::Request::CommitBlock(block)).await? {
            store::Response::Committed(head) => Ok(head),
            _ => unreachable!("CommitBlock request can only result in Response::Committed"),
        }
    }

    /// Overwrites the chain head record.
    pub(crate) async fn set_head(&self, head: ChainHead) -> Result<ChainHead, StorageError> {
        match self.call(store::Request::SetHead(head)).await? {
            store::Response::Committed(head) => Ok(head),
            _ => unreachable!("SetHead request can only result in Response::Committed"),
        }
    }
}
