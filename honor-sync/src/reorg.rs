//! Reorganizing the local chain onto a peer's chain.
//!
//! A reorganization finds the highest block the local chain shares with the
//! peer, fetches the peer's blocks above it, rolls the local chain back to the
//! shared block, and applies the peer's blocks. If any peer block fails to
//! apply, the local blocks that were rolled back are re-applied, so the local
//! chain ends up either fully on the peer's chain, or exactly where it started.
//!
//! Every check that can fail without touching the chain runs before the
//! rollback.

use std::{sync::Arc, time::Duration};

use tower::{timeout::Timeout, Service, ServiceExt};

use honor_chain::block::{self, Block, Height};

use crate::{
    daemon::CycleOutcome,
    error::{RestoreMismatch, SegmentError, StorageError},
    peer::PeerAddress,
    policy::ForkDepthPolicy,
    state::ChainState,
    store::{self, ChainHead, SyncCandidate},
    transport, BoxError, SyncError,
};


/// The local blocks above a fork point, captured before they are rolled back.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    /// The height of the block shared by the local and peer chains.
    pub fork_height: Height,

    /// The local blocks above the fork point, in ascending height order.
    pub blocks: Vec<Arc<Block>>,

    /// The local chain head when the snapshot was taken.
    pub head: ChainHead,
}

impl Snapshot {
    /// Returns the number of local blocks that a rollback to the fork point removes.
    pub fn rolled_back(&self) -> usize {
        self.blocks.len()
    }
}

/// The progress of a single reorganization.
///
/// Only the transitions in [`ReorgState::can_transition_to`] are allowed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReorgState {
    /// The local chain has not been changed yet.
    Idle,

    /// The local chain was rolled back to the fork point.
    RolledBack {
        /// The fork point height.
        fork_height: Height,
    },

    /// Peer blocks are being applied above the fork point.
    Applying {
        /// The fork point height.
        fork_height: Height,
        /// The number of peer blocks applied so far.
        applied: usize,
    },

    /// Every peer block was applied. This state is final.
    Committed {
        /// The new chain tip.
        tip: Height,
    },

    /// The local blocks from the snapshot are being re-applied.
    Recovering {
        /// The fork point height.
        fork_height: Height,
    },

    /// The local chain was restored to the snapshot. This state is final.
    Restored,
}

impl ReorgState {
    /// Returns `true` if a reorganization can move from `self` to `next`.
    pub fn can_transition_to(&self, next: &ReorgState) -> bool {
        use ReorgState::*;

        match (*self, *next) {
            (Idle, RolledBack { .. }) => true,
            // A failed rollback may have removed some blocks.
            (Idle, Recovering { .. }) => true,

            (RolledBack { fork_height }, Applying { fork_height: next_fork, applied }) => {
                fork_height == next_fork && applied == 0
            }
            (RolledBack { fork_height }, Recovering { fork_height: next_fork }) => {
                fork_height == next_fork
            }

            (
                Applying {
                    fork_height,
                    applied,
                },
                Applying {
                    fork_height: next_fork,
                    applied: next_applied,
                },
            ) => fork_height == next_fork && next_applied == applied + 1,
            (
                Applying {
                    fork_height,
                    applied,
                },
                Committed { tip },
            ) => applied > 0 && fork_height.checked_add(applied as u32) == Ok(tip),
            (Applying { fork_height, .. }, Recovering { fork_height: next_fork }) => {
                fork_height == next_fork
            }

            (Recovering { .. }, Restored) => true,

            _ => false,
        }
    }

    /// Returns `true` if the reorganization is finished.
    pub fn is_final(&self) -> bool {
        matches!(self, ReorgState::Committed { .. } | ReorgState::Restored)
    }

    fn advance(&mut self, next: ReorgState) {
        debug_assert!(
            self.can_transition_to(&next),
            "invalid reorg state transition from {self:?} to {next:?}"
        );
        trace!(from = ?self, to = ?next, "reorg state transition");

        *self = next;
    }
}

/// Checks that `blocks` is a chain segment that links the fork point to `candidate`.
pub(crate) fn check_segment(
    fork_height: Height,
    fork_hash: block::Hash,
    candidate: &SyncCandidate,
    blocks: &[Arc<Block>],
) -> Result<(), SegmentError> {
    let Some(tip) = blocks.last() else {
        return Err(SegmentError::Empty);
    };

    let mut expected_height = fork_height;
    let mut expected_parent = fork_hash;

    for block in blocks {
        // The fork point is always below the candidate, so this can't overflow.
        expected_height = expected_height
            .next()
            .map_err(|_| SegmentError::UnexpectedHeight {
                expected: Height::MAX,
                actual: block.height(),
            })?;

        if block.height() != expected_height {
            return Err(SegmentError::UnexpectedHeight {
                expected: expected_height,
                actual: block.height(),
            });
        }

        if block.header.previous_block_hash != expected_parent {
            return Err(SegmentError::BrokenLink {
                height: block.height(),
                expected_parent,
            });
        }

        expected_parent = block.hash();
    }

    if tip.height() != candidate.height || expected_parent != candidate.hash {
        return Err(SegmentError::WrongTip {
            expected_hash: candidate.hash,
            actual_height: tip.height(),
            actual_hash: expected_parent,
        });
    }

    Ok(())
}

/// Reorganizes the local chain onto the chain of the peer that announced a candidate.
#[derive(Clone, Debug)]
pub struct ChainReorg<ZS, ZN, ZV> {
    state: ChainState<ZS>,
    transport: Timeout<ZN>,
    verifier: ZV,
}

impl<ZS, ZN, ZV> ChainReorg<ZS, ZN, ZV>
where
    ZS: Service<store::Request, Response = store::Response, Error = BoxError>
        + Send
        + Sync
        + Clone
        + 'static,
    ZS::Future: Send,
    ZN: Service<transport::Request, Response = transport::Response, Error = BoxError>
        + Send
        + Sync
        + Clone
        + 'static,
    ZN::Future: Send,
    ZV: Service<Arc<Block>, Response = block::Hash, Error = BoxError>
        + Send
        + Sync
        + Clone
        + 'static,
    ZV::Future: Send,
{
    /// Returns a reorganizer that fetches peer blocks through `transport`, with
    /// `fetch_timeout` for each request, and applies them with `verifier`.
    pub fn new(
        state: ChainState<ZS>,
        transport: ZN,
        verifier: ZV,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            state,
            transport: Timeout::new(transport, fetch_timeout),
            verifier,
        }
    }

    /// Brings the local chain up to `candidate`, using the blocks from `peer`.
    ///
    /// `head` must be the current local chain head, and the caller must hold
    /// the storage lock until this future finishes.
    ///
    /// If the candidate is already in the local chain, it is deleted, and the
    /// chain is left unchanged. Otherwise, the local chain is reorganized onto
    /// the peer's chain, and the candidate is deleted.
    ///
    /// # Errors
    ///
    /// Every error except [`SyncError::RecoveryFailed`] leaves the local chain
    /// exactly as it was. [`SyncError::FetchFailed`] and
    /// [`SyncError::ApplyFailed`] keep the candidate queued, so it can be
    /// retried on a later cycle.
    #[instrument(
        skip_all,
        fields(
            candidate.height = ?candidate.height,
            candidate.hash = %candidate.hash,
            %peer,
        )
    )]
    pub async fn sync_to_candidate(
        &self,
        head: &ChainHead,
        candidate: &SyncCandidate,
        peer: &PeerAddress,
        policy: &ForkDepthPolicy,
    ) -> Result<CycleOutcome, SyncError> {
        if candidate.height <= head.height
            && self.state.block_hash(candidate.height).await? == Some(candidate.hash)
        {
            let deleted = self.state.delete_candidate(candidate.hash).await?;
            debug!(deleted, "candidate is already in the local chain");

            return Ok(CycleOutcome::AlreadySynced {
                height: candidate.height,
            });
        }

        let lowest_fork_height = policy.lowest_fork_height(head, candidate);
        let (fork_height, fork_hash) = self
            .find_fork_point(head, candidate, peer, lowest_fork_height)
            .await?;

        let segment = self
            .fetch_segment(fork_height, fork_hash, candidate, peer)
            .await?;

        let snapshot = self.take_snapshot(fork_height).await?;

        info!(
            ?fork_height,
            rolled_back = snapshot.rolled_back(),
            applying = segment.len(),
            "reorganizing local chain onto peer chain"
        );
        metrics::counter!("sync.reorg.started").increment(1);
        metrics::histogram!("sync.reorg.depth").record(snapshot.rolled_back() as f64);

        let new_head = self.replace_blocks(&snapshot, &segment).await?;

        // The chain has already changed, so a stale candidate is left for the
        // already-synced check on the next cycle.
        if let Err(error) = self.state.delete_candidate(candidate.hash).await {
            warn!(?error, "failed to delete synced candidate");
        }

        info!(
            new_head.height = ?new_head.height,
            new_head.hash = %new_head.hash,
            "reorganized local chain onto peer chain"
        );
        metrics::counter!("sync.reorg.completed").increment(1);
        metrics::gauge!("sync.head.height").set(new_head.height.0 as f64);

        Ok(CycleOutcome::Reorganized {
            fork_height,
            rolled_back: snapshot.rolled_back(),
            applied: segment.len(),
            new_head,
        })
    }

    /// Returns the highest height where the local and peer chains have the same block.
    ///
    /// The search starts at the local head, or just below the candidate if the
    /// head is higher, and stops at `lowest_fork_height`.
    async fn find_fork_point(
        &self,
        head: &ChainHead,
        candidate: &SyncCandidate,
        peer: &PeerAddress,
        lowest_fork_height: Height,
    ) -> Result<(Height, block::Hash), SyncError> {
        let Ok(below_candidate) = candidate.height.previous() else {
            return Err(self.refuse_fork(candidate, lowest_fork_height).await);
        };
        let mut height = head.height.min(below_candidate);

        loop {
            if height < lowest_fork_height {
                return Err(self.refuse_fork(candidate, lowest_fork_height).await);
            }

            let local_hash = self
                .state
                .block_hash(height)
                .await?
                .ok_or(StorageError::MissingBlock { height })?;
            let peer_hash = self.peer_block_hash(peer, height).await?;

            if peer_hash == local_hash {
                debug!(?height, hash = %local_hash, "found fork point");
                return Ok((height, local_hash));
            }

            trace!(?height, %local_hash, %peer_hash, "local and peer chains differ");

            match height.previous() {
                Ok(previous) => height = previous,
                Err(_) => return Err(self.refuse_fork(candidate, lowest_fork_height).await),
            }
        }
    }

    /// Deletes `candidate`, and returns the error for a fork that is too deep.
    async fn refuse_fork(&self, candidate: &SyncCandidate, lowest_fork_height: Height) -> SyncError {
        info!(
            ?lowest_fork_height,
            "no shared block above the rollback limit, discarding candidate"
        );
        metrics::counter!("sync.candidate.discarded").increment(1);

        if let Err(error) = self.state.delete_candidate(candidate.hash).await {
            return error.into();
        }

        SyncError::ForkTooDeep {
            candidate_height: candidate.height,
            limit_height: lowest_fork_height,
        }
    }

    async fn peer_block_hash(
        &self,
        peer: &PeerAddress,
        height: Height,
    ) -> Result<block::Hash, SyncError> {
        let response = self
            .transport
            .clone()
            .oneshot(transport::Request::BlockHash {
                peer: peer.clone(),
                height,
            })
            .await
            .map_err(|source| SyncError::FetchFailed {
                peer: peer.clone(),
                source,
            })?;

        match response {
            transport::Response::BlockHash(Some(hash)) => Ok(hash),
            transport::Response::BlockHash(None) => Err(SyncError::FetchFailed {
                peer: peer.clone(),
                source: SegmentError::MissingPeerBlock { height }.into(),
            }),
            transport::Response::Blocks(_) => Err(SyncError::FetchFailed {
                peer: peer.clone(),
                source: SegmentError::UnexpectedResponse {
                    request: "block hash",
                }
                .into(),
            }),
        }
    }

    /// Fetches the peer's blocks above the fork point, up to the candidate.
    async fn fetch_segment(
        &self,
        fork_height: Height,
        fork_hash: block::Hash,
        candidate: &SyncCandidate,
        peer: &PeerAddress,
    ) -> Result<Vec<Arc<Block>>, SyncError> {
        let fetch_failed = |source: BoxError| SyncError::FetchFailed {
            peer: peer.clone(),
            source,
        };

        let first_height = fork_height.next().map_err(|e| fetch_failed(e.into()))?;

        let response = self
            .transport
            .clone()
            .oneshot(transport::Request::ChainSegment {
                peer: peer.clone(),
                heights: first_height..=candidate.height,
            })
            .await
            .map_err(fetch_failed)?;

        let blocks = match response {
            transport::Response::Blocks(blocks) => blocks,
            transport::Response::BlockHash(_) => {
                return Err(fetch_failed(
                    SegmentError::UnexpectedResponse {
                        request: "chain segment",
                    }
                    .into(),
                ))
            }
        };

        check_segment(fork_height, fork_hash, candidate, &blocks)
            .map_err(|e| fetch_failed(e.into()))?;

        debug!(blocks = blocks.len(), "fetched peer chain segment");

        Ok(blocks)
    }

    /// Captures the local blocks above `fork_height`, and the current head.
    async fn take_snapshot(&self, fork_height: Height) -> Result<Snapshot, SyncError> {
        let head = self.state.read_head().await?;
        let blocks = self.state.blocks_above(fork_height).await?;

        let expected_len = head.height.blocks_above(fork_height) as usize;
        let tip_hash = blocks.last().map(|block| block.hash());
        let ends_at_head = match tip_hash {
            Some(hash) => hash == head.hash,
            None => head.height == fork_height,
        };

        if blocks.len() != expected_len || !ends_at_head {
            return Err(StorageError::InconsistentHead {
                fork_height,
                head_height: head.height,
                head_hash: head.hash,
            }
            .into());
        }

        Ok(Snapshot {
            fork_height,
            blocks,
            head,
        })
    }

    /// Rolls back to the snapshot fork point and applies `segment`, restoring
    /// the snapshot if anything fails.
    async fn replace_blocks(
        &self,
        snapshot: &Snapshot,
        segment: &[Arc<Block>],
    ) -> Result<ChainHead, SyncError> {
        let fork_height = snapshot.fork_height;
        let mut progress = ReorgState::Idle;

        if let Err(error) = self.state.rollback_to(fork_height).await {
            warn!(?error, "rollback to fork point failed, restoring local chain");
            progress.advance(ReorgState::Recovering { fork_height });
            self.restore(snapshot, &mut progress).await?;

            return Err(error.into());
        }
        progress.advance(ReorgState::RolledBack { fork_height });
        progress.advance(ReorgState::Applying {
            fork_height,
            applied: 0,
        });

        let mut new_head = snapshot.head.clone();

        for (applied, block) in segment.iter().enumerate() {
            match self.apply_block(block.clone()).await {
                Ok(head) => {
                    new_head = head;
                    progress.advance(ReorgState::Applying {
                        fork_height,
                        applied: applied + 1,
                    });
                }
                Err(source) => {
                    warn!(
                        height = ?block.height(),
                        hash = %block.hash(),
                        error = ?source,
                        "peer block failed to apply, restoring local chain"
                    );
                    metrics::counter!("sync.reorg.failed").increment(1);

                    progress.advance(ReorgState::Recovering { fork_height });
                    self.restore(snapshot, &mut progress).await?;

                    return Err(SyncError::ApplyFailed {
                        height: block.height(),
                        hash: block.hash(),
                        source,
                    });
                }
            }
        }

        progress.advance(ReorgState::Committed {
            tip: new_head.height,
        });

        Ok(new_head)
    }

    /// Validates `block`, then commits it on top of the local chain.
    async fn apply_block(&self, block: Arc<Block>) -> Result<ChainHead, BoxError> {
        let hash = self.verifier.clone().oneshot(block.clone()).await?;
        trace!(height = ?block.height(), %hash, "validated peer block");

        Ok(self.state.commit_block(block).await?)
    }

    /// Puts the local chain back exactly as it was when `snapshot` was taken.
    async fn restore(&self, snapshot: &Snapshot, progress: &mut ReorgState) -> Result<(), SyncError> {
        let fork_height = snapshot.fork_height;
        let recovery_failed = |source: BoxError| {
            error!(
                ?fork_height,
                ?source,
                "failed to restore local chain, stopping block sync"
            );
            metrics::counter!("sync.reorg.recovery_failed").increment(1);

            SyncError::RecoveryFailed {
                fork_height,
                source,
            }
        };

        self.state
            .rollback_to(fork_height)
            .await
            .map_err(|e| recovery_failed(e.into()))?;

        for block in &snapshot.blocks {
            self.state
                .commit_block(block.clone())
                .await
                .map_err(|e| recovery_failed(e.into()))?;
        }

        self.state
            .set_head(snapshot.head.clone())
            .await
            .map_err(|e| recovery_failed(e.into()))?;

        let restored = self
            .state
            .read_head()
            .await
            .map_err(|e| recovery_failed(e.into()))?;

        if restored != snapshot.head {
            return Err(recovery_failed(
                RestoreMismatch {
                    expected: snapshot.head.clone(),
                    actual: restored,
                }
                .into(),
            ));
        }

        progress.advance(ReorgState::Restored);

        info!(
            ?fork_height,
            restored = snapshot.rolled_back(),
            head.height = ?snapshot.head.height,
            head.hash = %snapshot.head.hash,
            "restored local chain"
        );
        metrics::counter!("sync.reorg.recovered").increment(1);

        Ok(())
    }
}
