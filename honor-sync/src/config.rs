//! Block sync configuration.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use honor_chain::HonorNodeId;

use crate::{
    constants::{
        DEFAULT_FETCH_TIMEOUT, DEFAULT_FORK_DEPTH_LIMIT, DEFAULT_MAX_CANDIDATE_ATTEMPTS,
        DEFAULT_MAX_ROLLBACK_DEPTH, DEFAULT_SYNC_INTERVAL, DEFAULT_TCP_PORT,
    },
    peer::HonorNodeTable,
    policy::ForkLimits,
};


/// Configuration for block sync.
///
/// The config is a TOML-encoded version of this structure, and every field can
/// be overridden by an environment variable with the `HONOR_` prefix. See
/// [`Config::load`] for details.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// How far above the local chain head a candidate block may be before it is
    /// discarded, in blocks.
    ///
    /// Can be changed at runtime through [`SyncParameters`](crate::SyncParameters).
    pub fork_depth_limit: u32,

    /// How far below the candidate block the fork point search may walk before
    /// the fork is refused, in blocks.
    ///
    /// Can be changed at runtime through [`SyncParameters`](crate::SyncParameters).
    pub max_rollback_depth: u32,

    /// How many cycles in a row a candidate may fail to fetch or apply before
    /// it is discarded.
    ///
    /// Zero is treated as one.
    pub max_candidate_attempts: u32,

    /// The time between sync cycles run by [`SyncDaemon::run`](crate::SyncDaemon::run).
    #[serde(with = "humantime_serde")]
    pub sync_interval: Duration,

    /// The timeout for each request to a peer.
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// The port used for honor node hosts that are registered without a port.
    pub default_tcp_port: u16,

    /// The registered honor nodes.
    pub honor_nodes: Vec<HonorNodeConfig>,
}

/// A registered honor node.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HonorNodeConfig {
    /// The honor node's identity, as announced with its blocks.
    pub id: HonorNodeId,

    /// The honor node's TCP address, as `host` or `host:port`.
    pub tcp_address: String,
}

impl Config {
    /// Loads the configuration from the conventional sources.
    ///
    /// Configuration is loaded from three sources, in order of precedence:
    /// 1. Hard-coded defaults (lowest precedence)
    /// 2. TOML configuration file (if provided)
    /// 3. Environment variables with `HONOR_` prefix (highest precedence)
    ///
    /// Environment variables use the format `HONOR_KEY`, for example
    /// `HONOR_FORK_DEPTH_LIMIT=30` or `HONOR_SYNC_INTERVAL=5s`.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("HONOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Returns the configured fork limits.
    pub fn fork_limits(&self) -> ForkLimits {
        ForkLimits {
            fork_depth_limit: self.fork_depth_limit,
            max_rollback_depth: self.max_rollback_depth,
        }
    }

    /// Returns a registry containing the configured honor nodes.
    pub fn honor_node_table(&self) -> HonorNodeTable {
        self.honor_nodes
            .iter()
            .map(|node| (node.id, node.tcp_address.clone()))
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fork_depth_limit: DEFAULT_FORK_DEPTH_LIMIT,
            max_rollback_depth: DEFAULT_MAX_ROLLBACK_DEPTH,
            max_candidate_attempts: DEFAULT_MAX_CANDIDATE_ATTEMPTS,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            default_tcp_port: DEFAULT_TCP_PORT,
            honor_nodes: Vec::new(),
        }
    }
}
