//! Fork detection and chain reorganization for honor-node block synchronization.
//!
//! On each scheduler tick, [`SyncDaemon::run_sync_cycle`] checks whether a
//! peer has announced a block that the local chain is missing, and if so,
//! reorganizes the local chain to match the peer's chain, restoring the local
//! chain exactly if any peer block fails to apply.
//!
//! The chain storage, network transport and block validator are
//! [`tower::Service`]s, so they can be wrapped with the usual tower
//! middleware. The node registry is a plain [`ResolveHost`] trait.

#![warn(missing_docs)]
#![allow(clippy::try_err)]
#![deny(clippy::await_holding_lock)]
#![forbid(unsafe_code)]

#[macro_use]
extern crate tracing;

pub mod config;
pub mod constants;
mod daemon;
mod error;
mod guard;
pub mod peer;
mod policy;
mod reorg;
mod state;
pub mod store;
pub mod transport;

#[cfg(test)]
mod tests;

pub use crate::config::Config;
pub use daemon::{CycleOutcome, SyncDaemon};
pub use error::{SegmentError, StorageError, SyncError};
pub use guard::{ExecutionGuard, ExecutionToken, StorageLock, StorageLockGuard};
pub use peer::{HonorNodeTable, PeerAddress, PeerResolver, ResolveHost};
pub use policy::{ForkDepthPolicy, ForkLimits, SyncParameters};
pub use reorg::{ChainReorg, ReorgState, Snapshot};
pub use state::ChainState;
pub use store::{ChainHead, MemoryStore, SyncCandidate};

/// A boxed [`std::error::Error`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
