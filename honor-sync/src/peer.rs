//! Honor node address resolution.

use std::{collections::HashMap, fmt, str::FromStr};

use thiserror::Error;

use honor_chain::HonorNodeId;

use crate::{BoxError, SyncError};

/// A node registry, which maps honor node identities to their host strings.
///
/// Host strings are `host` or `host:port`. Hosts without a port use the
/// configured default port.
pub trait ResolveHost {
    /// Returns the host string registered for `honor_node_id`.
    fn resolve_host(&self, honor_node_id: HonorNodeId) -> Result<String, BoxError>;
}

/// The honor node has no registered host.
#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
#[error("honor node {0} is not registered")]
pub struct UnregisteredNode(pub HonorNodeId);

/// A fixed node registry, usually loaded from the sync config.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HonorNodeTable {
    hosts: HashMap<HonorNodeId, String>,
}

impl HonorNodeTable {
    /// Returns an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `host` for `honor_node_id`, replacing any earlier host.
    pub fn insert(&mut self, honor_node_id: HonorNodeId, host: impl Into<String>) {
        self.hosts.insert(honor_node_id, host.into());
    }

    /// Returns the number of registered honor nodes.
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Returns `true` if no honor nodes are registered.
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(HonorNodeId, S)> for HonorNodeTable {
    fn from_iter<I: IntoIterator<Item = (HonorNodeId, S)>>(iter: I) -> Self {
        Self {
            hosts: iter
                .into_iter()
                .map(|(honor_node_id, host)| (honor_node_id, host.into()))
                .collect(),
        }
    }
}

impl ResolveHost for HonorNodeTable {
    fn resolve_host(&self, honor_node_id: HonorNodeId) -> Result<String, BoxError> {
        self.hosts
            .get(&honor_node_id)
            .cloned()
            .ok_or_else(|| UnregisteredNode(honor_node_id).into())
    }
}

/// The network address of a peer's block transport.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PeerAddress {
    /// The peer's host name or IP address, without IPv6 brackets.
    pub host: String,

    /// The peer's TCP port.
    pub port: u16,
}

/// A registered host string is not a valid peer address.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum PeerAddressError {
    /// The host part is empty.
    #[error("peer address {0:?} has an empty host")]
    EmptyHost(String),

    /// The port part is not a valid TCP port.
    #[error("peer address {0:?} has an invalid port")]
    InvalidPort(String),

    /// An IPv6 host is missing its closing bracket.
    #[error("peer address {0:?} has an unterminated IPv6 host")]
    UnterminatedBracket(String),
}

impl PeerAddress {
    /// Parses `address` as `host` or `host:port`.
    ///
    /// IPv6 hosts with a port must be bracketed, as in `[::1]:7078`. A bare
    /// IPv6 host is used with `default_port`.
    pub fn parse(address: &str, default_port: u16) -> Result<Self, PeerAddressError> {
        let address = address.trim();

        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, rest) = rest
                .split_once(']')
                .ok_or_else(|| PeerAddressError::UnterminatedBracket(address.to_string()))?;

            let port = match rest {
                "" => default_port,
                _ => rest
                    .strip_prefix(':')
                    .and_then(|port| u16::from_str(port).ok())
                    .ok_or_else(|| PeerAddressError::InvalidPort(address.to_string()))?,
            };

            (host, port)
        } else if let Some((host, port)) = address
            .split_once(':')
            .filter(|(_, port)| !port.contains(':'))
        {
            let port =
                u16::from_str(port).map_err(|_| PeerAddressError::InvalidPort(address.to_string()))?;

            (host, port)
        } else {
            (address, default_port)
        };

        if host.is_empty() {
            return Err(PeerAddressError::EmptyHost(address.to_string()));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Turns the honor node that announced a candidate into a peer address.
#[derive(Clone, Debug)]
pub struct PeerResolver<R> {
    registry: R,
    default_port: u16,
}

impl<R> PeerResolver<R>
where
    R: ResolveHost,
{
    /// Returns a resolver that looks up hosts in `registry`, and uses
    /// `default_port` for hosts without a port.
    pub fn new(registry: R, default_port: u16) -> Self {
        Self {
            registry,
            default_port,
        }
    }

    /// Returns the address of `honor_node_id`.
    ///
    /// Returns [`SyncError::UnknownPeer`] if the honor node is not registered,
    /// or if its registered host is not a valid address.
    pub fn resolve(&self, honor_node_id: HonorNodeId) -> Result<PeerAddress, SyncError> {
        let host = self
            .registry
            .resolve_host(honor_node_id)
            .map_err(|source| SyncError::UnknownPeer {
                honor_node_id,
                source,
            })?;

        PeerAddress::parse(&host, self.default_port).map_err(|source| SyncError::UnknownPeer {
            honor_node_id,
            source: source.into(),
        })
    }
}
