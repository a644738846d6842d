//! Core block and honor node data structures for block synchronization.
//!
//! These types are shared by the chain storage, the network transport, and the
//! fork resolution engine in `honor-sync`.

#![warn(missing_docs)]
#![allow(clippy::try_err)]
#![deny(clippy::await_holding_lock)]
#![forbid(unsafe_code)]

pub mod block;
pub mod honor_node;

mod sha256d_writer;

pub use honor_node::HonorNodeId;
