use std::collections::BTreeMap;
use std::time::Duration;

use rand::{thread_rng, Rng};
use serde_derive::{Deserialize, Serialize};

use crate::Peer;

/// Where clients can reach a server of the key-value store.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Static configuration of one Raft instance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RaftConfig {
    /// The identity of this instance. Must be one of `servers`.
    pub me: Peer,
    /// All servers of the cluster, including this one.
    pub servers: BTreeMap<Peer, ServerAddress>,
    pub election_timeout_min_millis: u64,
    pub election_timeout_max_millis: u64,
}

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("the cluster has no servers")]
    EmptyCluster,
    #[error("{0:?} is not a server of the cluster")]
    UnknownSelf(Peer),
    #[error("a connection to unknown server {0:?} was given")]
    UnknownPeer(Peer),
    #[error("no connection was given for server {0:?}")]
    MissingPeer(Peer),
    #[error("invalid election timeout range [{min}, {max}) ms")]
    InvalidElectionTimeout { min: u64, max: u64 },
}

pub(crate) const DEFAULT_ELECTION_TIMEOUT_MIN_MILLIS: u64 = 150;
pub(crate) const DEFAULT_ELECTION_TIMEOUT_MAX_MILLIS: u64 = 300;

impl RaftConfig {
    pub fn new(me: Peer, servers: BTreeMap<Peer, ServerAddress>) -> Self {
        Self {
            me,
            servers,
            election_timeout_min_millis: DEFAULT_ELECTION_TIMEOUT_MIN_MILLIS,
            election_timeout_max_millis: DEFAULT_ELECTION_TIMEOUT_MAX_MILLIS,
        }
    }

    pub fn with_election_timeout(
        mut self,
        min: Duration,
        max: Duration,
    ) -> Self {
        self.election_timeout_min_millis = min.as_millis() as u64;
        self.election_timeout_max_millis = max.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::EmptyCluster);
        }
        if !self.servers.contains_key(&self.me) {
            return Err(ConfigError::UnknownSelf(self.me));
        }
        let (min, max) = (
            self.election_timeout_min_millis,
            self.election_timeout_max_millis,
        );
        if min == 0 || min >= max {
            return Err(ConfigError::InvalidElectionTimeout { min, max });
        }
        Ok(())
    }

    /// Checks that exactly one connection is given for every other server.
    pub(crate) fn validate_peers<'a>(
        &self,
        peers: impl IntoIterator<Item = &'a Peer>,
    ) -> Result<(), ConfigError> {
        let mut expected: Vec<Peer> = self.peers().collect();
        for peer in peers {
            match expected.iter().position(|p| p == peer) {
                Some(pos) => {
                    expected.remove(pos);
                }
                None => return Err(ConfigError::UnknownPeer(*peer)),
            }
        }
        match expected.first() {
            Some(missing) => Err(ConfigError::MissingPeer(*missing)),
            None => Ok(()),
        }
    }

    pub fn cluster_size(&self) -> usize {
        self.servers.len()
    }

    /// All servers except this one.
    pub fn peers(&self) -> impl Iterator<Item = Peer> + '_ {
        let me = self.me;
        self.servers.keys().copied().filter(move |peer| *peer != me)
    }

    pub fn address_of(&self, peer: Peer) -> Option<&ServerAddress> {
        self.servers.get(&peer)
    }

    /// How often a leader replicates, which is also its heartbeat interval.
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.election_timeout_min_millis * 3 / 4)
    }

    /// A fresh random duration in `[min, max)`.
    pub fn random_election_timeout(&self) -> Duration {
        Duration::from_millis(thread_rng().gen_range(
            self.election_timeout_min_millis..self.election_timeout_max_millis,
        ))
    }
}
