//! Tests for the in-memory chain storage.

use std::sync::Arc;

use tower::ServiceExt;

use honor_chain::{
    block::{
        self,
        arbitrary::{fake_genesis, FakeChainHelper},
        Block, Height,
    },
    HonorNodeId,
};

use crate::store::{ChainHead, Request, Response, SyncCandidate};

use super::{MemoryStore, MemoryStoreError};

fn chain(len: usize) -> Vec<Arc<Block>> {
    let genesis = fake_genesis();
    let mut chain = vec![genesis.clone()];
    chain.extend(genesis.make_fake_chain(len, 0));

    chain
}

async fn call(store: &MemoryStore, request: Request) -> Result<Response, crate::BoxError> {
    store.clone().oneshot(request).await
}

fn candidate(height: u32, hash_byte: u8) -> SyncCandidate {
    SyncCandidate {
        height: Height(height),
        hash: block::Hash([hash_byte; 32]),
        honor_node_id: HonorNodeId(3),
    }
}

#[test]
fn with_chain_sets_head_to_last_block() {
    honor_test::init();

    let blocks = chain(4);
    let store = MemoryStore::with_chain(blocks.clone()).expect("chain is linked");

    let head = store.head().expect("store has a head");
    assert_eq!(head, ChainHead::from_block(&blocks[4], block::Hash::NULL));
    assert_eq!(store.block_hashes().len(), 5);
    assert_eq!(store.mutation_count(), 0);
}

#[test]
fn with_chain_rejects_unlinked_blocks() {
    honor_test::init();

    let mut blocks = chain(4);
    blocks.remove(2);

    assert!(matches!(
        MemoryStore::with_chain(blocks),
        Err(MemoryStoreError::DoesNotExtendHead {
            height: Height(3),
            head_height: Some(Height(1)),
            ..
        })
    ));

    // The first block must be a genesis block.
    assert!(matches!(
        MemoryStore::with_chain(chain(2).into_iter().skip(1)),
        Err(MemoryStoreError::DoesNotExtendHead {
            head_height: None,
            ..
        })
    ));
}

#[tokio::test]
async fn commit_must_extend_head() {
    honor_test::init();

    let blocks = chain(3);
    let store = MemoryStore::with_chain(blocks.clone()).expect("chain is linked");

    let fork = blocks[2].make_fake_child_with_data(b"fork".to_vec());
    assert!(call(&store, Request::CommitBlock(fork)).await.is_err());
    assert_eq!(store.mutation_count(), 0);

    let child = blocks[3].make_fake_child();
    let response = call(&store, Request::CommitBlock(child.clone()))
        .await
        .expect("child extends head");

    assert_eq!(
        response,
        Response::Committed(ChainHead::from_block(&child, block::Hash::NULL))
    );
    assert_eq!(store.mutation_count(), 1);
}

#[tokio::test]
async fn rollback_removes_blocks_and_records_them() {
    honor_test::init();

    let blocks = chain(6);
    let store = MemoryStore::with_chain(blocks.clone()).expect("chain is linked");

    let response = call(&store, Request::RollbackTo(Height(4)))
        .await
        .expect("block 4 exists");
    assert_eq!(response, Response::RolledBack(blocks[5..].to_vec()));

    let head = store.head().expect("store has a head");
    assert_eq!(head.height, Height(4));
    assert_eq!(head.hash, blocks[4].hash());

    let mut expected_rollbacks = [0; 32];
    for removed in &blocks[5..] {
        for (digest, byte) in expected_rollbacks.iter_mut().zip(removed.hash().0) {
            *digest ^= byte;
        }
    }
    assert_eq!(head.rollbacks_hash, block::Hash(expected_rollbacks));

    // Re-committing keeps the rollback digest.
    call(&store, Request::CommitBlock(blocks[5].clone()))
        .await
        .expect("block 5 extends head");
    assert_eq!(
        store.head().map(|head| head.rollbacks_hash),
        Some(block::Hash(expected_rollbacks))
    );
}

#[tokio::test]
async fn rollback_to_head_removes_nothing() {
    honor_test::init();

    let blocks = chain(3);
    let store = MemoryStore::with_chain(blocks).expect("chain is linked");
    let head = store.head();

    let response = call(&store, Request::RollbackTo(Height(3)))
        .await
        .expect("head block exists");

    assert_eq!(response, Response::RolledBack(Vec::new()));
    assert_eq!(store.head(), head);
}

#[tokio::test]
async fn rollback_to_missing_block_fails() {
    honor_test::init();

    let store = MemoryStore::with_chain(chain(3)).expect("chain is linked");

    let error = call(&store, Request::RollbackTo(Height(7)))
        .await
        .expect_err("block 7 is missing");

    assert_eq!(
        error.downcast_ref::<MemoryStoreError>(),
        Some(&MemoryStoreError::MissingRollbackTarget(Height(7)))
    );
    assert_eq!(store.mutation_count(), 0);
}

#[tokio::test]
async fn set_head_must_match_highest_block() {
    honor_test::init();

    let blocks = chain(3);
    let store = MemoryStore::with_chain(blocks.clone()).expect("chain is linked");

    let stale = ChainHead::from_block(&blocks[2], block::Hash::NULL);
    assert!(call(&store, Request::SetHead(stale)).await.is_err());

    let restored = ChainHead::from_block(&blocks[3], block::Hash([9; 32]));
    assert_eq!(
        call(&store, Request::SetHead(restored.clone()))
            .await
            .expect("head matches highest block"),
        Response::Committed(restored.clone())
    );
    assert_eq!(store.head(), Some(restored));
}

#[tokio::test]
async fn candidates_are_read_lowest_first() {
    honor_test::init();

    let store = MemoryStore::new();
    store.queue_candidate(candidate(12, 1));
    store.queue_candidate(candidate(10, 2));
    store.queue_candidate(candidate(11, 3));

    assert_eq!(
        call(&store, Request::Candidate).await.expect("memory store"),
        Response::Candidate(Some(candidate(10, 2)))
    );
    assert_eq!(
        call(&store, Request::Head).await.expect("memory store"),
        Response::Head(None)
    );
    assert_eq!(store.mutation_count(), 0);
}

#[tokio::test]
async fn candidate_deletes() {
    honor_test::init();

    let store = MemoryStore::new();
    for (height, hash_byte) in [(10, 1), (11, 2), (11, 3), (12, 2), (14, 4)] {
        store.queue_candidate(candidate(height, hash_byte));
    }

    assert_eq!(
        call(&store, Request::DeleteStaleCandidates { up_to: Height(11) })
            .await
            .expect("memory store"),
        Response::Deleted(3)
    );
    assert_eq!(
        store.candidates(),
        vec![candidate(12, 2), candidate(14, 4)]
    );

    assert_eq!(
        call(&store, Request::DeleteCandidate(block::Hash([2; 32])))
            .await
            .expect("memory store"),
        Response::Deleted(1)
    );
    assert_eq!(
        call(&store, Request::DeleteCandidate(block::Hash([2; 32])))
            .await
            .expect("memory store"),
        Response::Deleted(0)
    );

    assert_eq!(store.candidates(), vec![candidate(14, 4)]);
    assert_eq!(store.mutation_count(), 3);
}

#[tokio::test]
async fn block_reads() {
    honor_test::init();

    let blocks = chain(5);
    let store = MemoryStore::with_chain(blocks.clone()).expect("chain is linked");

    assert_eq!(
        call(&store, Request::BlockHash(Height(2))).await.expect("memory store"),
        Response::BlockHash(Some(blocks[2].hash()))
    );
    assert_eq!(
        call(&store, Request::BlockHash(Height(9))).await.expect("memory store"),
        Response::BlockHash(None)
    );
    assert_eq!(
        call(&store, Request::Block(Height(4))).await.expect("memory store"),
        Response::Block(Some(blocks[4].clone()))
    );
    assert_eq!(
        call(&store, Request::BlocksAbove(Height(2))).await.expect("memory store"),
        Response::Blocks(blocks[3..].to_vec())
    );
    assert_eq!(store.mutation_count(), 0);
}
