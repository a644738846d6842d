//! Randomised property tests for sync cycles.

use std::env;

use honor_test::prelude::*;

use crate::{tests::*, CycleOutcome, SyncError};

const DEFAULT_SYNC_PROPTEST_CASES: u32 = 64;

proptest! {
    #![proptest_config(
        proptest::test_runner::Config::with_cases(env::var("PROPTEST_CASES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SYNC_PROPTEST_CASES))
    )]

    /// After any cycle, the local chain is either the peer's chain up to the
    /// candidate, or exactly the chain it started with.
    #[test]
    fn chain_is_either_replaced_or_untouched(
        local_len in 1..30_usize,
        fork_back in 0..30_u32,
        peer_extra in 1..15_usize,
        branch in 1..=u8::MAX,
        rejected_offset in proptest::option::of(0..15_usize),
    ) {
        let runtime = honor_test::init_async();

        let local = local_chain(local_len);
        let fork_height = (local_len as u32).saturating_sub(fork_back);
        let peer_chain = fork_of(&local, fork_height, peer_extra, branch);
        let candidate = tip_candidate(&peer_chain, PEER_ID);

        let verifier = match rejected_offset {
            Some(offset) if offset < peer_extra => {
                FakeVerifier::rejecting([&peer_chain[fork_height as usize + 1 + offset]])
            }
            _ => FakeVerifier::accept_all(),
        };

        let store = store_with(&local);
        store.queue_candidate(candidate);
        let before_hashes = store.block_hashes();
        let before_head = store.head();

        let daemon = test_daemon(
            test_config(60, 120),
            store.clone(),
            FakePeer::new(&peer_chain),
            verifier,
        );

        let result = runtime.block_on(daemon.run_sync_cycle());

        match result {
            Ok(CycleOutcome::Reorganized { fork_height: reorg_fork, new_head, .. }) => {
                prop_assert_eq!(reorg_fork.0, fork_height);
                prop_assert_eq!(new_head.hash, candidate.hash);
                prop_assert_eq!(
                    store.block_hashes(),
                    peer_chain.iter().map(|block| block.hash()).collect::<Vec<_>>()
                );
                prop_assert!(store.candidates().is_empty());
            }
            Ok(CycleOutcome::AlreadySynced { height }) => {
                prop_assert_eq!(height, candidate.height);
                prop_assert_eq!(store.block_hashes(), before_hashes);
            }
            Err(SyncError::ApplyFailed { .. }) => {
                prop_assert!(rejected_offset.is_some());
                prop_assert_eq!(store.block_hashes(), before_hashes);
                prop_assert_eq!(store.head(), before_head);
                prop_assert_eq!(store.candidates(), vec![candidate]);
            }
            other => prop_assert!(false, "unexpected cycle result: {:?}", other),
        }

        prop_assert!(!daemon.is_halted());
    }
}
