use std::io;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::HonorNodeId;

use super::{Hash, Height};

/// A block header, containing metadata about a block.
///
/// The header links each block to its parent via `previous_block_hash`, so a
/// sequence of headers describes a single chain.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// The height of this block.
    pub height: Height,

    /// The hash of the previous block, used to create a chain of blocks back
    /// to the genesis block.
    ///
    /// The genesis block uses [`Hash::NULL`].
    pub previous_block_hash: Hash,

    /// The time the honor node produced this block.
    pub time: DateTime<Utc>,

    /// The honor node that produced this block.
    pub honor_node_id: HonorNodeId,
}

impl Header {
    /// Write the canonical header encoding, used for hashing.
    pub(crate) fn write_canonical<W: io::Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.height.0.to_le_bytes())?;
        writer.write_all(&self.previous_block_hash.0)?;
        writer.write_all(&self.time.timestamp().to_le_bytes())?;
        writer.write_all(&self.honor_node_id.0.to_le_bytes())?;
        Ok(())
    }
}
