//! Fork depth limits, and the policy that applies them to sync candidates.

use tokio::sync::watch;

use honor_chain::block::Height;

use crate::{
    constants::{DEFAULT_FORK_DEPTH_LIMIT, DEFAULT_MAX_ROLLBACK_DEPTH},
    state::ChainState,
    store::{self, ChainHead, SyncCandidate},
    BoxError, SyncError,
};

/// The limits on how far the local chain can be reorganized.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ForkLimits {
    /// How far above the local chain head a candidate block may be, in blocks.
    pub fork_depth_limit: u32,

    /// How far below the candidate block the fork point may be, in blocks.
    pub max_rollback_depth: u32,
}

impl Default for ForkLimits {
    fn default() -> Self {
        Self {
            fork_depth_limit: DEFAULT_FORK_DEPTH_LIMIT,
            max_rollback_depth: DEFAULT_MAX_ROLLBACK_DEPTH,
        }
    }
}

/// Runtime-adjustable sync parameters.
///
/// Each sync cycle reads the latest limits once, so an update takes effect
/// from the next cycle, and never changes the limits of a running cycle.
#[derive(Clone, Debug)]
pub struct SyncParameters {
    limits: watch::Receiver<ForkLimits>,
}

impl SyncParameters {
    /// Returns parameters starting at `limits`, and a sender that updates them.
    pub fn new(limits: ForkLimits) -> (watch::Sender<ForkLimits>, Self) {
        let (sender, receiver) = watch::channel(limits);

        (sender, Self { limits: receiver })
    }

    /// Returns parameters that always use `limits`.
    pub fn fixed(limits: ForkLimits) -> Self {
        // The receiver keeps the last value after the sender is dropped.
        Self::new(limits).1
    }

    /// Returns the current limits.
    pub fn fork_limits(&self) -> ForkLimits {
        *self.limits.borrow()
    }
}

/// Decides which candidates are close enough to the local chain to sync.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ForkDepthPolicy {
    limits: ForkLimits,
}

impl ForkDepthPolicy {
    /// Returns a policy using `limits`.
    pub fn new(limits: ForkLimits) -> Self {
        Self { limits }
    }

    /// Returns the highest candidate height this policy accepts above `head`.
    pub fn highest_candidate_height(&self, head: &ChainHead) -> Height {
        head.height.saturating_add(self.limits.fork_depth_limit)
    }

    /// Returns the lowest fork point this policy accepts below `candidate`.
    ///
    /// A fork at the local head removes no local blocks, so it is always
    /// accepted, even when the rollback depth is smaller than the fork depth
    /// limit.
    pub fn lowest_fork_height(&self, head: &ChainHead, candidate: &SyncCandidate) -> Height {
        candidate
            .height
            .saturating_sub(self.limits.max_rollback_depth)
            .min(head.height)
    }

    /// Checks that `candidate` is close enough to `head` to be synced.
    ///
    /// Candidates more than the fork depth limit above the head are rejected.
    /// Rejecting a candidate also deletes it, and every other candidate at or
    /// below its height, so the rejected candidates are not tried again.
    pub async fn check_candidate<ZS>(
        &self,
        state: &ChainState<ZS>,
        head: &ChainHead,
        candidate: &SyncCandidate,
    ) -> Result<(), SyncError>
    where
        ZS: tower::Service<store::Request, Response = store::Response, Error = BoxError>
            + Send
            + Sync
            + Clone
            + 'static,
        ZS::Future: Send,
    {
        let limit_height = self.highest_candidate_height(head);

        if candidate.height <= limit_height {
            return Ok(());
        }

        let deleted = state.delete_stale_candidates(candidate.height).await?;

        info!(
            candidate_height = ?candidate.height,
            candidate_hash = %candidate.hash,
            head_height = ?head.height,
            ?limit_height,
            deleted,
            "discarded candidates too far above the local chain head"
        );
        metrics::counter!("sync.candidate.discarded").increment(deleted as u64);

        Err(SyncError::ForkTooDeep {
            candidate_height: candidate.height,
            limit_height,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use honor_chain::{
        block::{arbitrary::FakeChainHelper, Block},
        HonorNodeId,
    };

    use super::*;
    use crate::store::MemoryStore;

    fn limits(fork_depth_limit: u32, max_rollback_depth: u32) -> ForkLimits {
        ForkLimits {
            fork_depth_limit,
            max_rollback_depth,
        }
    }

    fn head_at(height: u32) -> ChainHead {
        let genesis = honor_chain::block::arbitrary::fake_genesis();
        let mut block: Block = (*genesis).clone();
        block.header.height = Height(height);

        ChainHead::from_block(&block, Default::default())
    }

    fn candidate_at(height: u32, hash_byte: u8) -> SyncCandidate {
        SyncCandidate {
            height: Height(height),
            hash: honor_chain::block::Hash([hash_byte; 32]),
            honor_node_id: HonorNodeId(7),
        }
    }

    #[test]
    fn parameter_updates_are_seen_by_later_reads() {
        honor_test::init();

        let (sender, parameters) = SyncParameters::new(limits(60, 120));
        let running_cycle_limits = parameters.fork_limits();

        sender
            .send(limits(10, 20))
            .expect("parameters are still alive");

        assert_eq!(running_cycle_limits, limits(60, 120));
        assert_eq!(parameters.fork_limits(), limits(10, 20));
    }

    #[test]
    fn fixed_parameters_keep_their_limits() {
        honor_test::init();

        let parameters = SyncParameters::fixed(limits(3, 4));

        assert_eq!(parameters.fork_limits(), limits(3, 4));
        assert_eq!(parameters.clone().fork_limits(), limits(3, 4));
    }

    #[test]
    fn limits_saturate_at_the_ends_of_the_chain() {
        honor_test::init();

        let policy = ForkDepthPolicy::new(limits(u32::MAX, 120));

        assert_eq!(policy.highest_candidate_height(&head_at(5)), Height::MAX);
        assert_eq!(
            policy.lowest_fork_height(&head_at(100), &candidate_at(100, 1)),
            Height::MIN
        );
        assert_eq!(
            policy.lowest_fork_height(&head_at(500), &candidate_at(500, 1)),
            Height(380)
        );
    }

    #[test]
    fn fork_at_head_is_within_a_small_rollback_depth() {
        honor_test::init();

        let policy = ForkDepthPolicy::new(limits(5, 2));

        // Pure catch-up to the fork depth limit.
        assert_eq!(
            policy.lowest_fork_height(&head_at(10), &candidate_at(15, 1)),
            Height(10)
        );
        // Forks below the head still use the rollback depth.
        assert_eq!(
            policy.lowest_fork_height(&head_at(20), &candidate_at(15, 1)),
            Height(13)
        );
    }

    #[tokio::test]
    async fn candidate_at_the_limit_is_accepted() {
        honor_test::init();

        let store = MemoryStore::new();
        let state = ChainState::new(store.clone());
        let policy = ForkDepthPolicy::new(limits(5, 120));

        let result = policy
            .check_candidate(&state, &head_at(100), &candidate_at(105, 1))
            .await;

        assert!(result.is_ok());
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn candidate_above_the_limit_is_rejected_with_lower_candidates() {
        honor_test::init();

        let store = MemoryStore::new();
        let state = ChainState::new(store.clone());
        let policy = ForkDepthPolicy::new(limits(5, 120));

        store.queue_candidate(candidate_at(104, 2));
        store.queue_candidate(candidate_at(106, 1));
        store.queue_candidate(candidate_at(110, 3));

        let result = policy
            .check_candidate(&state, &head_at(100), &candidate_at(106, 1))
            .await;

        assert!(matches!(
            result,
            Err(SyncError::ForkTooDeep {
                candidate_height: Height(106),
                limit_height: Height(105),
            })
        ));
        assert_eq!(store.candidates(), vec![candidate_at(110, 3)]);
    }

    #[tokio::test]
    async fn rejection_does_not_touch_the_chain() {
        honor_test::init();

        let genesis = honor_chain::block::arbitrary::fake_genesis();
        let chain: Vec<Arc<Block>> = genesis.make_fake_chain(3, 0);
        let store = MemoryStore::with_chain(std::iter::once(genesis).chain(chain))
            .expect("fake chain is linked");
        let before = store.block_hashes();
        let head = store.head().expect("store has a head");
        let state = ChainState::new(store.clone());

        let candidate = candidate_at(head.height.0 + 2, 9);
        store.queue_candidate(candidate);

        let result = ForkDepthPolicy::new(limits(1, 120))
            .check_candidate(&state, &head, &candidate)
            .await;

        assert!(matches!(result, Err(SyncError::ForkTooDeep { .. })));
        assert_eq!(store.block_hashes(), before);
        assert_eq!(store.head(), Some(head));
        assert!(store.candidates().is_empty());
    }
}
