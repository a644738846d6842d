//! Fake services and chains shared by the sync tests.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
    time::Duration,
};

use futures::future::{ready, BoxFuture, FutureExt, Ready};
use tokio::sync::Semaphore;
use tower::Service;

use honor_chain::{
    block::{
        self,
        arbitrary::{fake_genesis, FakeChainHelper},
        Block, Height,
    },
    HonorNodeId,
};

use crate::{
    config::Config,
    peer::HonorNodeTable,
    policy::{ForkLimits, SyncParameters},
    store::{self, MemoryStore, SyncCandidate},
    transport, BoxError, SyncDaemon,
};

/// The honor node that announces candidates in tests.
pub(crate) const PEER_ID: HonorNodeId = HonorNodeId(7);

/// The registered host of [`PEER_ID`].
pub(crate) const PEER_HOST: &str = "peer.test:7078";

/// Returns genesis and `len` blocks above it.
pub(crate) fn local_chain(len: usize) -> Vec<Arc<Block>> {
    let genesis = fake_genesis();
    let mut chain = vec![genesis.clone()];
    chain.extend(genesis.make_fake_chain(len, 0));

    chain
}

/// Returns `chain` up to `fork_height`, followed by `extra` blocks on `branch`.
pub(crate) fn fork_of(
    chain: &[Arc<Block>],
    fork_height: u32,
    extra: usize,
    branch: u8,
) -> Vec<Arc<Block>> {
    let fork_index = fork_height as usize;
    let mut fork = chain[..=fork_index].to_vec();
    fork.extend(chain[fork_index].make_fake_chain(extra, branch));

    fork
}

/// Returns a candidate announcing the last block in `chain`.
pub(crate) fn tip_candidate(chain: &[Arc<Block>], honor_node_id: HonorNodeId) -> SyncCandidate {
    SyncCandidate::for_block(chain.last().expect("chain is not empty"), honor_node_id)
}

/// Returns a memory store containing `chain`.
pub(crate) fn store_with(chain: &[Arc<Block>]) -> MemoryStore {
    MemoryStore::with_chain(chain.iter().cloned()).expect("fake chains are linked")
}

/// Returns a config with the given limits, and short timeouts.
pub(crate) fn test_config(fork_depth_limit: u32, max_rollback_depth: u32) -> Config {
    Config {
        fork_depth_limit,
        max_rollback_depth,
        sync_interval: Duration::from_millis(10),
        fetch_timeout: Duration::from_secs(5),
        ..Config::default()
    }
}

/// Returns a registry containing only [`PEER_ID`].
pub(crate) fn test_registry() -> HonorNodeTable {
    [(PEER_ID, PEER_HOST)].into_iter().collect()
}

/// A sync daemon wired to fake services.
pub(crate) type TestDaemon<ZS> = SyncDaemon<ZS, FakePeer, FakeVerifier, HonorNodeTable>;

/// Returns a daemon that syncs `state` from `peer`, using `config`.
pub(crate) fn test_daemon<ZS>(
    config: Config,
    state: ZS,
    peer: FakePeer,
    verifier: FakeVerifier,
) -> TestDaemon<ZS>
where
    ZS: Service<store::Request, Response = store::Response, Error = BoxError>
        + Send
        + Sync
        + Clone
        + 'static,
    ZS::Future: Send,
{
    let parameters = SyncParameters::fixed(config.fork_limits());

    SyncDaemon::new(config, parameters, state, peer, verifier, test_registry())
}

/// Returns fork limits for tests that build their own parameters.
pub(crate) fn limits(fork_depth_limit: u32, max_rollback_depth: u32) -> ForkLimits {
    ForkLimits {
        fork_depth_limit,
        max_rollback_depth,
    }
}

/// A peer block transport that serves a fixed chain.
#[derive(Clone, Debug, Default)]
pub(crate) struct FakePeer {
    blocks: Arc<Mutex<BTreeMap<Height, Arc<Block>>>>,
    requests: Arc<AtomicUsize>,
    unreachable: bool,
    mismatched: bool,
    gate: Option<Arc<Semaphore>>,
}

impl FakePeer {
    /// Returns a peer serving `chain`.
    pub(crate) fn new(chain: &[Arc<Block>]) -> Self {
        let peer = Self::default();
        peer.blocks
            .lock()
            .expect("unexpected panic in fake peer")
            .extend(chain.iter().map(|block| (block.height(), block.clone())));

        peer
    }

    /// Returns a peer that fails every request.
    pub(crate) fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Answers every request with the response kind of the other request.
    pub(crate) fn mismatched(mut self) -> Self {
        self.mismatched = true;
        self
    }

    /// Makes every request wait for a permit from `gate`.
    pub(crate) fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Stops serving the block at `height`.
    pub(crate) fn forget(&self, height: u32) {
        self.blocks
            .lock()
            .expect("unexpected panic in fake peer")
            .remove(&Height(height));
    }

    /// Returns the number of requests this peer has received.
    pub(crate) fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn respond(&self, request: transport::Request) -> Result<transport::Response, BoxError> {
        if self.unreachable {
            return Err(format!("peer {} is unreachable", request.peer()).into());
        }

        let blocks = self.blocks.lock().expect("unexpected panic in fake peer");

        if self.mismatched {
            return Ok(match request {
                transport::Request::BlockHash { .. } => {
                    transport::Response::Blocks(blocks.values().cloned().collect())
                }
                transport::Request::ChainSegment { .. } => transport::Response::BlockHash(None),
            });
        }

        Ok(match request {
            transport::Request::BlockHash { height, .. } => {
                transport::Response::BlockHash(blocks.get(&height).map(|block| block.hash()))
            }
            transport::Request::ChainSegment { heights, .. } => {
                transport::Response::Blocks(blocks.range(heights).map(|(_, b)| b.clone()).collect())
            }
        })
    }
}

impl Service<transport::Request> for FakePeer {
    type Response = transport::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<transport::Response, BoxError>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: transport::Request) -> Self::Future {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let peer = self.clone();

        async move {
            if let Some(gate) = &peer.gate {
                let _permit = gate.acquire().await?;
            }

            peer.respond(request)
        }
        .boxed()
    }
}

/// A block validator that accepts every block except the rejected hashes.
#[derive(Clone, Debug, Default)]
pub(crate) struct FakeVerifier {
    rejected: Arc<HashSet<block::Hash>>,
}

impl FakeVerifier {
    /// Returns a validator that accepts every block.
    pub(crate) fn accept_all() -> Self {
        Self::default()
    }

    /// Returns a validator that rejects `blocks`.
    pub(crate) fn rejecting<'a>(blocks: impl IntoIterator<Item = &'a Arc<Block>>) -> Self {
        Self {
            rejected: Arc::new(blocks.into_iter().map(|block| block.hash()).collect()),
        }
    }
}

impl Service<Arc<Block>> for FakeVerifier {
    type Response = block::Hash;
    type Error = BoxError;
    type Future = Ready<Result<block::Hash, BoxError>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, block: Arc<Block>) -> Self::Future {
        let hash = block.hash();

        if self.rejected.contains(&hash) {
            ready(Err(format!("block {hash} is invalid").into()))
        } else {
            ready(Ok(hash))
        }
    }
}

/// A request predicate that decides which storage requests fail.
type FaultFn = dyn Fn(&store::Request) -> bool + Send + Sync;

/// A memory store that fails the requests matched by a predicate.
#[derive(Clone)]
pub(crate) struct FaultyStore {
    inner: MemoryStore,
    fault: Arc<FaultFn>,
}

impl FaultyStore {
    /// Returns a store that wraps `inner`, and fails every request matching `fault`.
    pub(crate) fn new(
        inner: MemoryStore,
        fault: impl Fn(&store::Request) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner,
            fault: Arc::new(fault),
        }
    }
}

impl Service<store::Request> for FaultyStore {
    type Response = store::Response;
    type Error = BoxError;
    type Future = Ready<Result<store::Response, BoxError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: store::Request) -> Self::Future {
        if (self.fault)(&request) {
            return ready(Err(format!("injected storage failure for {request:?}").into()));
        }

        self.inner.call(request)
    }
}
