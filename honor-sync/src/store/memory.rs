//! An in-memory chain storage service.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use futures::future::{ready, Ready};
use thiserror::Error;
use tower::Service;

use honor_chain::block::{self, Block, Height};

use crate::BoxError;

use super::{ChainHead, Request, Response, SyncCandidate};

#[cfg(test)]
mod tests;

/// An error from the in-memory chain storage.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum MemoryStoreError {
    /// The committed block is not the child of the current head.
    #[error(
        "block {height:?} with parent {parent} does not extend head {head_height:?} {head_hash}"
    )]
    DoesNotExtendHead {
        /// The committed block height.
        height: Height,
        /// The committed block's parent hash.
        parent: block::Hash,
        /// The current head height, or `None` for an empty chain.
        head_height: Option<Height>,
        /// The current head hash, or the null hash for an empty chain.
        head_hash: block::Hash,
    },

    /// There is no block at the rollback height.
    #[error("can't roll back to missing block {0:?}")]
    MissingRollbackTarget(Height),

    /// The new head record does not describe the highest block.
    #[error("head {height:?} {hash} is not the highest stored block")]
    HeadMismatch {
        /// The rejected head height.
        height: Height,
        /// The rejected head hash.
        hash: block::Hash,
    },
}

/// Chain storage that keeps every block in memory.
///
/// Used in tests, and as a reference for the behaviour the sync engine expects
/// from persistent storage. Clones share the same chain.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    chain: Arc<Mutex<MemoryChain>>,
}

#[derive(Debug, Default)]
struct MemoryChain {
    /// Local chain blocks, by height.
    blocks: BTreeMap<Height, Arc<Block>>,

    /// The local chain head.
    head: Option<ChainHead>,

    /// Queued candidates, lowest height first.
    candidates: BTreeMap<(Height, block::Hash), SyncCandidate>,

    /// The number of requests that changed the chain or the candidate queue.
    mutation_count: usize,
}

impl MemoryStore {
    /// Returns an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a store containing `blocks`, which must start at genesis.
    pub fn with_chain(
        blocks: impl IntoIterator<Item = Arc<Block>>,
    ) -> Result<Self, MemoryStoreError> {
        let store = Self::new();

        {
            let mut chain = store.lock();
            for block in blocks {
                chain.commit_block(block)?;
            }
        }

        Ok(store)
    }

    /// Queues a candidate announced by a peer.
    ///
    /// This stands in for the block announcement handler, so it is not counted
    /// as a mutation.
    pub fn queue_candidate(&self, candidate: SyncCandidate) {
        self.lock()
            .candidates
            .insert((candidate.height, candidate.hash), candidate);
    }

    /// Returns the current chain head.
    pub fn head(&self) -> Option<ChainHead> {
        self.lock().head.clone()
    }

    /// Returns the hashes of every local block, in ascending height order.
    pub fn block_hashes(&self) -> Vec<block::Hash> {
        self.lock()
            .blocks
            .values()
            .map(|block| block.hash())
            .collect()
    }

    /// Returns every queued candidate, lowest height first.
    pub fn candidates(&self) -> Vec<SyncCandidate> {
        self.lock().candidates.values().copied().collect()
    }

    /// Returns the number of storage requests that changed the chain or the
    /// candidate queue.
    pub fn mutation_count(&self) -> usize {
        self.lock().mutation_count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryChain> {
        self.chain
            .lock()
            .expect("unexpected panic while the memory store was locked")
    }
}

impl MemoryChain {
    fn handle(&mut self, request: Request) -> Result<Response, MemoryStoreError> {
        let is_mutation = request.is_mutation();

        let response = match request {
            Request::Head => Response::Head(self.head.clone()),
            Request::Candidate => {
                Response::Candidate(self.candidates.values().next().copied())
            }
            Request::DeleteStaleCandidates { up_to } => {
                let before = self.candidates.len();
                self.candidates.retain(|(height, _), _| *height > up_to);
                Response::Deleted(before - self.candidates.len())
            }
            Request::DeleteCandidate(hash) => {
                let before = self.candidates.len();
                self.candidates.retain(|(_, candidate_hash), _| *candidate_hash != hash);
                Response::Deleted(before - self.candidates.len())
            }
            Request::BlockHash(height) => {
                Response::BlockHash(self.blocks.get(&height).map(|block| block.hash()))
            }
            Request::Block(height) => Response::Block(self.blocks.get(&height).cloned()),
            Request::BlocksAbove(height) => Response::Blocks(
                self.blocks
                    .range(height..)
                    .filter(|(block_height, _)| **block_height > height)
                    .map(|(_, block)| block.clone())
                    .collect(),
            ),
            Request::RollbackTo(height) => Response::RolledBack(self.rollback_to(height)?),
            Request::CommitBlock(block) => Response::Committed(self.commit_block(block)?),
            Request::SetHead(head) => Response::Committed(self.set_head(head)?),
        };

        if is_mutation {
            self.mutation_count += 1;
        }

        Ok(response)
    }

    fn commit_block(&mut self, block: Arc<Block>) -> Result<ChainHead, MemoryStoreError> {
        let extends_head = match &self.head {
            Some(head) => {
                head.height.next().ok() == Some(block.header.height)
                    && head.hash == block.header.previous_block_hash
            }
            None => block.header.height == Height(0) && block.header.previous_block_hash.is_null(),
        };

        if !extends_head {
            return Err(MemoryStoreError::DoesNotExtendHead {
                height: block.header.height,
                parent: block.header.previous_block_hash,
                head_height: self.head.as_ref().map(|head| head.height),
                head_hash: self
                    .head
                    .as_ref()
                    .map(|head| head.hash)
                    .unwrap_or(block::Hash::NULL),
            });
        }

        let rollbacks_hash = self
            .head
            .as_ref()
            .map(|head| head.rollbacks_hash)
            .unwrap_or(block::Hash::NULL);
        let head = ChainHead::from_block(&block, rollbacks_hash);

        trace!(height = ?head.height, hash = %head.hash, "committed block to memory store");

        self.blocks.insert(block.header.height, block);
        self.head = Some(head.clone());

        Ok(head)
    }

    fn rollback_to(&mut self, height: Height) -> Result<Vec<Arc<Block>>, MemoryStoreError> {
        let target = self
            .blocks
            .get(&height)
            .cloned()
            .ok_or(MemoryStoreError::MissingRollbackTarget(height))?;

        let removed: Vec<Arc<Block>> = match height.next() {
            Ok(split_height) => self.blocks.split_off(&split_height).into_values().collect(),
            Err(_) => Vec::new(),
        };

        let mut rollbacks_hash = self
            .head
            .as_ref()
            .map(|head| head.rollbacks_hash)
            .unwrap_or(block::Hash::NULL);
        for block in &removed {
            for (digest, byte) in rollbacks_hash.0.iter_mut().zip(block.hash().0) {
                *digest ^= byte;
            }
        }

        self.head = Some(ChainHead::from_block(&target, rollbacks_hash));

        trace!(?height, removed = removed.len(), "rolled back memory store");

        Ok(removed)
    }

    fn set_head(&mut self, head: ChainHead) -> Result<ChainHead, MemoryStoreError> {
        let is_highest = self
            .blocks
            .last_key_value()
            .map(|(height, block)| *height == head.height && block.hash() == head.hash)
            .unwrap_or(false);

        if !is_highest {
            return Err(MemoryStoreError::HeadMismatch {
                height: head.height,
                hash: head.hash,
            });
        }

        self.head = Some(head.clone());

        Ok(head)
    }
}

impl Service<Request> for MemoryStore {
    type Response = Response;
    type Error = BoxError;
    type Future = Ready<Result<Response, BoxError>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        ready(self.lock().handle(request).map_err(Into::into))
    }
}
