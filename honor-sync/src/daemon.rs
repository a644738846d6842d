//! The block sync daemon, which runs sync cycles on a fixed schedule.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Instant,
};

use color_eyre::eyre::Report;
use tokio::time::MissedTickBehavior;
use tower::Service;

use honor_chain::block::{self, Block, Height};

use crate::{
    config::Config,
    guard::{ExecutionGuard, StorageLock},
    peer::{PeerResolver, ResolveHost},
    policy::{ForkDepthPolicy, SyncParameters},
    reorg::ChainReorg,
    state::ChainState,
    store::{self, ChainHead, SyncCandidate},
    transport, BoxError, SyncError,
};


/// The result of a sync cycle that did not fail.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CycleOutcome {
    /// Another cycle was already running, so this cycle did nothing.
    Skipped,

    /// There were no queued candidates.
    NoCandidate,

    /// The candidate was already in the local chain, and it was deleted.
    AlreadySynced {
        /// The candidate height.
        height: Height,
    },

    /// The local chain was reorganized onto the peer's chain.
    Reorganized {
        /// The height of the block shared by the old and new chains.
        fork_height: Height,
        /// The new local chain head.
        new_head: ChainHead,
        /// The number of local blocks removed.
        rolled_back: usize,
        /// The number of peer blocks applied.
        applied: usize,
    },
}

/// Keeps the local chain in sync with the blocks announced by honor nodes.
///
/// Each call to [`SyncDaemon::run_sync_cycle`] handles at most one queued
/// candidate. [`SyncDaemon::run`] calls it on a fixed interval.
pub struct SyncDaemon<ZS, ZN, ZV, R> {
    config: Config,
    parameters: SyncParameters,
    state: ChainState<ZS>,
    reorg: ChainReorg<ZS, ZN, ZV>,
    resolver: PeerResolver<R>,
    guard: Arc<ExecutionGuard>,
    storage_lock: StorageLock,

    /// The candidate that failed the last cycle, and how many cycles in a row it failed.
    failing_candidate: Mutex<Option<(block::Hash, u32)>>,

    /// Set after a failed recovery, until an operator calls [`SyncDaemon::resume`].
    halted: AtomicBool,
}

impl<ZS, ZN, ZV, R> std::fmt::Debug for SyncDaemon<ZS, ZN, ZV, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncDaemon")
            .field("config", &self.config)
            .field("parameters", &self.parameters)
            .field("guard", &self.guard)
            .field("storage_lock", &self.storage_lock)
            .field("failing_candidate", &self.failing_candidate)
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}

impl<ZS, ZN, ZV, R> SyncDaemon<ZS, ZN, ZV, R>
where
    ZS: Service<store::Request, Response = store::Response, Error = BoxError>
        + Send
        + Sync
        + Clone
        + 'static,
    ZS::Future: Send,
    ZN: Service<transport::Request, Response = transport::Response, Error = BoxError>
        + Send
        + Sync
        + Clone
        + 'static,
    ZN::Future: Send,
    ZV: Service<Arc<Block>, Response = block::Hash, Error = BoxError>
        + Send
        + Sync
        + Clone
        + 'static,
    ZV::Future: Send,
    R: ResolveHost + Send + Sync + 'static,
{
    /// Returns a new sync daemon.
    ///
    /// - `state` is the chain storage service,
    /// - `transport` fetches block hashes and blocks from peers,
    /// - `verifier` validates each peer block before it is committed,
    /// - `registry` maps honor node identities to host strings.
    ///
    /// The fork limits are read from `parameters` at the start of each cycle.
    pub fn new(
        config: Config,
        parameters: SyncParameters,
        state: ZS,
        transport: ZN,
        verifier: ZV,
        registry: R,
    ) -> Self {
        let state = ChainState::new(state);
        let reorg = ChainReorg::new(state.clone(), transport, verifier, config.fetch_timeout);
        let resolver = PeerResolver::new(registry, config.default_tcp_port);

        Self {
            config,
            parameters,
            state,
            reorg,
            resolver,
            guard: Arc::new(ExecutionGuard::new()),
            storage_lock: StorageLock::new(),
            failing_candidate: Mutex::new(None),
            halted: AtomicBool::new(false),
        }
    }

    /// Shares `storage_lock` with the other tasks that write to chain storage.
    pub fn with_storage_lock(mut self, storage_lock: StorageLock) -> Self {
        self.storage_lock = storage_lock;
        self
    }

    /// Replaces this daemon's execution guard with `guard`.
    ///
    /// Daemons that share a guard never run cycles at the same time.
    pub fn with_guard(mut self, guard: Arc<ExecutionGuard>) -> Self {
        self.guard = guard;
        self
    }

    /// Returns this daemon's execution guard.
    pub fn guard(&self) -> Arc<ExecutionGuard> {
        self.guard.clone()
    }

    /// Returns `true` if sync is halted after a failed recovery.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Allows sync cycles to run again after a failed recovery.
    ///
    /// Only call this after an operator has checked, and if needed repaired,
    /// the local chain.
    pub fn resume(&self) {
        if self.halted.swap(false, Ordering::AcqRel) {
            warn!("resuming block sync after operator intervention");
        }
    }

    /// Runs a single sync cycle.
    ///
    /// Returns [`CycleOutcome::Skipped`] without doing anything if another
    /// cycle is already running. Returns [`SyncError::Halted`] while sync is
    /// halted.
    #[instrument(skip(self))]
    pub async fn run_sync_cycle(&self) -> Result<CycleOutcome, SyncError> {
        if self.is_halted() {
            return Err(SyncError::Halted);
        }

        let Some(_token) = self.guard.try_enter() else {
            debug!("previous sync cycle is still running, skipping this cycle");
            metrics::counter!("sync.cycle.skipped").increment(1);

            return Ok(CycleOutcome::Skipped);
        };

        let started = Instant::now();
        metrics::counter!("sync.cycle.started").increment(1);

        let result = self.sync_next_candidate().await;

        metrics::histogram!("sync.cycle.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(CycleOutcome::NoCandidate) => trace!("no candidates to sync"),
            Ok(outcome) => debug!(?outcome, "finished sync cycle"),
            Err(error) if error.is_fatal() => {
                self.halted.store(true, Ordering::Release);
                metrics::counter!("sync.cycle.halted").increment(1);

                error!(
                    ?error,
                    "block sync halted: local chain needs operator intervention"
                );
            }
            Err(error) => {
                metrics::counter!("sync.cycle.failed").increment(1);

                warn!(?error, "sync cycle failed");
            }
        }

        result
    }

    /// Syncs the lowest queued candidate, holding the storage lock.
    async fn sync_next_candidate(&self) -> Result<CycleOutcome, SyncError> {
        let _storage = self.storage_lock.lock().await;

        let policy = ForkDepthPolicy::new(self.parameters.fork_limits());

        let head = self.state.read_head().await?;
        metrics::gauge!("sync.head.height").set(head.height.0 as f64);

        let Some(candidate) = self.state.read_candidate().await? else {
            return Ok(CycleOutcome::NoCandidate);
        };

        debug!(
            head.height = ?head.height,
            candidate.height = ?candidate.height,
            candidate.hash = %candidate.hash,
            candidate.honor_node_id = %candidate.honor_node_id,
            "checking sync candidate"
        );

        policy.check_candidate(&self.state, &head, &candidate).await?;

        let peer = match self.resolver.resolve(candidate.honor_node_id) {
            Ok(peer) => peer,
            Err(error) => {
                self.state.delete_candidate(candidate.hash).await?;
                metrics::counter!("sync.candidate.discarded").increment(1);

                return Err(error);
            }
        };

        let result = self
            .reorg
            .sync_to_candidate(&head, &candidate, &peer, &policy)
            .await;

        match &result {
            Ok(_) => self.set_failing_candidate(None),
            Err(error) if error.is_candidate_failure() => {
                self.count_failed_attempt(&candidate).await;
            }
            Err(_) => {}
        }

        result
    }

    /// Counts a failed attempt to sync `candidate`, and discards it after
    /// `max_candidate_attempts` failures in a row.
    ///
    /// Must be called while holding the storage lock.
    async fn count_failed_attempt(&self, candidate: &SyncCandidate) {
        let attempts = {
            let failing = self
                .failing_candidate
                .lock()
                .expect("unexpected panic while holding the failing candidate lock");

            match *failing {
                Some((hash, attempts)) if hash == candidate.hash => attempts.saturating_add(1),
                _ => 1,
            }
        };

        if attempts < self.config.max_candidate_attempts.max(1) {
            self.set_failing_candidate(Some((candidate.hash, attempts)));
            debug!(attempts, "candidate stays queued for another attempt");

            return;
        }

        match self.state.delete_candidate(candidate.hash).await {
            Ok(deleted) => {
                self.set_failing_candidate(None);

                info!(
                    candidate.height = ?candidate.height,
                    candidate.hash = %candidate.hash,
                    attempts,
                    deleted,
                    "discarded candidate after repeated sync failures"
                );
                metrics::counter!("sync.candidate.discarded").increment(deleted as u64);
            }
            Err(error) => {
                self.set_failing_candidate(Some((candidate.hash, attempts)));

                warn!(?error, "failed to delete repeatedly failing candidate");
            }
        }
    }

    fn set_failing_candidate(&self, failing: Option<(block::Hash, u32)>) {
        *self
            .failing_candidate
            .lock()
            .expect("unexpected panic while holding the failing candidate lock") = failing;
    }

    /// Runs sync cycles every `sync_interval`, until sync halts.
    ///
    /// Cycles that would start while a cycle is still running are skipped.
    /// Non-fatal cycle errors are logged, and the candidate is handled again on
    /// a later cycle if it is still queued. A candidate that fails to fetch or
    /// apply `max_candidate_attempts` cycles in a row is discarded.
    pub async fn run(self) -> Result<(), Report> {
        info!(
            sync_interval = ?self.config.sync_interval,
            fetch_timeout = ?self.config.fetch_timeout,
            limits = ?self.parameters.fork_limits(),
            "starting block sync"
        );

        let mut interval = tokio::time::interval(self.config.sync_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            match self.run_sync_cycle().await {
                Err(error) if error.is_fatal() => {
                    return Err(Report::new(error).wrap_err("block sync stopped"));
                }
                // Already logged by the cycle.
                _ => {}
            }
        }
    }
}
