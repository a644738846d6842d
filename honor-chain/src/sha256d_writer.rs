//! A Writer for Sha256d-related (two rounds of SHA256) types.

use std::io::prelude::*;

use sha2::{Digest, Sha256};

/// A type that lets you write out SHA256d (double-SHA256, as in two rounds).
#[derive(Default)]
pub struct Sha256dWriter {
    hash: Sha256,
}

impl Sha256dWriter {
    /// Consume the Writer and produce the hash result.
    pub fn finish(self) -> [u8; 32] {
        let first = self.hash.finalize();
        Sha256::digest(first).into()
    }
}

impl Write for Sha256dWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.hash.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
