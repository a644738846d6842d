//! Fake chains and proptest strategies for blocks.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use proptest::{
    arbitrary::{any, Arbitrary},
    collection::vec,
    prelude::*,
};

use crate::HonorNodeId;

use super::*;

/// The time between consecutive fake blocks.
const FAKE_BLOCK_SPACING_SECONDS: i64 = 2;

/// The honor node that produces fake blocks, unless a caller picks another.
pub const FAKE_HONOR_NODE_ID: HonorNodeId = HonorNodeId(1);

/// Returns a fake genesis block, with a fixed time and payload.
pub fn fake_genesis() -> Arc<Block> {
    Arc::new(Block {
        header: Header {
            height: Height(0),
            previous_block_hash: Hash::NULL,
            time: Utc
                .timestamp_opt(1_600_000_000, 0)
                .single()
                .expect("fixed genesis time is valid"),
            honor_node_id: FAKE_HONOR_NODE_ID,
        },
        data: b"genesis".to_vec(),
    })
}

/// Helper trait for constructing "valid" looking chains of blocks.
pub trait FakeChainHelper {
    /// Returns a child of this block, with a payload derived from its height.
    fn make_fake_child(&self) -> Arc<Block>;

    /// Returns a child of this block with `data` as its payload.
    ///
    /// Children of the same parent with different payloads are forks.
    fn make_fake_child_with_data(&self, data: Vec<u8>) -> Arc<Block>;

    /// Returns `count` descendants of this block, in ascending height order.
    ///
    /// `branch` is mixed into every payload, so chains built from the same
    /// parent with different branches diverge immediately.
    fn make_fake_chain(&self, count: usize, branch: u8) -> Vec<Arc<Block>>;
}

impl FakeChainHelper for Block {
    fn make_fake_child(&self) -> Arc<Block> {
        let height = self.header.height.next().expect("fake chains stay below max height");
        self.make_fake_child_with_data(height.0.to_le_bytes().to_vec())
    }

    fn make_fake_child_with_data(&self, data: Vec<u8>) -> Arc<Block> {
        Arc::new(Block {
            header: Header {
                height: self
                    .header
                    .height
                    .next()
                    .expect("fake chains stay below max height"),
                previous_block_hash: self.hash(),
                time: self.header.time + Duration::seconds(FAKE_BLOCK_SPACING_SECONDS),
                honor_node_id: self.header.honor_node_id,
            },
            data,
        })
    }

    fn make_fake_chain(&self, count: usize, branch: u8) -> Vec<Arc<Block>> {
        let mut chain: Vec<Arc<Block>> = Vec::with_capacity(count);

        for _ in 0..count {
            let parent = chain.last().map(|block| block.as_ref()).unwrap_or(self);
            let mut data = parent
                .header
                .height
                .next()
                .expect("fake chains stay below max height")
                .0
                .to_le_bytes()
                .to_vec();
            data.push(branch);

            let child = parent.make_fake_child_with_data(data);
            chain.push(child);
        }

        chain
    }
}

impl Arbitrary for Header {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (
            any::<Height>(),
            any::<Hash>(),
            0..i64::from(u32::MAX),
            any::<HonorNodeId>(),
        )
            .prop_map(|(height, previous_block_hash, timestamp, honor_node_id)| Header {
                height,
                previous_block_hash,
                time: Utc
                    .timestamp_opt(timestamp, 0)
                    .single()
                    .expect("in-range timestamps are valid"),
                honor_node_id,
            })
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for Block {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (any::<Header>(), vec(any::<u8>(), 0..64))
            .prop_map(|(header, data)| Block { header, data })
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}
