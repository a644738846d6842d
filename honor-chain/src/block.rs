//! Blocks and block-related structures (heights, headers, hashes).

mod hash;
mod header;
mod height;

#[cfg(any(test, feature = "proptest-impl"))]
pub mod arbitrary;

use std::{fmt, io};

pub use hash::{Hash, ParseHashError};
pub use header::Header;
pub use height::{Height, HeightError};

use serde::{Deserialize, Serialize};

use crate::sha256d_writer::Sha256dWriter;

/// A block, containing a header and the opaque block payload.
///
/// The payload is applied by the block validator, so the synchronization code
/// never looks inside it.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// The block header, containing block metadata.
    pub header: Header,
    /// The serialized block body.
    pub data: Vec<u8>,
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("height", &self.header.height)
            .field("hash", &self.hash())
            .field("previous_block_hash", &self.header.previous_block_hash)
            .field("data.len", &self.data.len())
            .finish()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({:?}, {})", self.header.height, self.hash())
    }
}

impl Block {
    /// Compute the hash of this block.
    pub fn hash(&self) -> Hash {
        Hash::from(self)
    }

    /// Returns the height of this block.
    pub fn height(&self) -> Height {
        self.header.height
    }

    /// Write the canonical encoding of this block, used for hashing.
    pub(crate) fn write_canonical<W: io::Write>(&self, mut writer: W) -> io::Result<()> {
        self.header.write_canonical(&mut writer)?;
        writer.write_all(&(self.data.len() as u64).to_le_bytes())?;
        writer.write_all(&self.data)?;
        Ok(())
    }
}

impl<'a> From<&'a Block> for Hash {
    fn from(block: &'a Block) -> Self {
        let mut hash_writer = Sha256dWriter::default();
        block
            .write_canonical(&mut hash_writer)
            .expect("Sha256dWriter is infallible");
        Self(hash_writer.finish())
    }
}
