//! Constants that impact block sync behaviour.

use std::time::Duration;

/// The default fork depth limit, in blocks.
///
/// A candidate block more than this many blocks above the local chain head is
/// too far ahead to reconcile, and is discarded along with older candidates.
pub const DEFAULT_FORK_DEPTH_LIMIT: u32 = 60;

/// The default maximum rollback depth, in blocks.
///
/// The fork point search stops after walking this many blocks below the
/// candidate block. Deeper forks are refused, which bounds the amount of local
/// chain that a single peer can make us roll back.
pub const DEFAULT_MAX_ROLLBACK_DEPTH: u32 = 120;

/// The default number of failed sync attempts before a candidate is discarded.
///
/// Candidates are synced lowest first, so a candidate that keeps failing would
/// otherwise stop every candidate queued above it from being synced.
pub const DEFAULT_MAX_CANDIDATE_ATTEMPTS: u32 = 3;

/// The default TCP port of honor nodes, used when a registered host has no port.
pub const DEFAULT_TCP_PORT: u16 = 7078;

/// The default interval between sync cycles.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(2);

/// The default timeout for each block hash or chain segment request to a peer.
///
/// ## Correctness
///
/// If this timeout is removed (or set too high), a stuck peer can hold the
/// storage lock indefinitely, blocking every other chain writer.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
