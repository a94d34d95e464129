use std::collections::BTreeMap;

use crate::log_array::LogArray;
use crate::utils::is_quorum;
use crate::{Index, Peer, Term};

/// What a leader knows about the log of one follower.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct PeerProgress {
    /// The next entry to send.
    pub next_index: Index,
    /// The highest entry known to be replicated.
    pub match_index: Index,
}

/// Replication progress of all followers, owned by one leadership term.
pub(crate) struct ProgressTable {
    peers: BTreeMap<Peer, PeerProgress>,
}

impl ProgressTable {
    pub fn create(
        peers: impl IntoIterator<Item = Peer>,
        last_index: Index,
    ) -> Self {
        let peers = peers
            .into_iter()
            .map(|peer| {
                (
                    peer,
                    PeerProgress {
                        next_index: last_index + 1,
                        match_index: 0,
                    },
                )
            })
            .collect();
        Self { peers }
    }

    #[cfg(test)]
    pub fn get(&self, peer: Peer) -> Option<PeerProgress> {
        self.peers.get(&peer).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Peer, PeerProgress)> + '_ {
        self.peers.iter().map(|(peer, progress)| (*peer, *progress))
    }

    /// The follower accepted everything up to and including `last_sent`.
    /// Stale replies never move progress backwards.
    pub fn record_success(&mut self, peer: Peer, last_sent: Index) {
        if let Some(progress) = self.peers.get_mut(&peer) {
            progress.match_index = progress.match_index.max(last_sent);
            progress.next_index = progress.next_index.max(last_sent + 1);
        }
    }

    /// The follower rejected a request whose entries started at `next_sent`.
    /// Back off by one entry, but never below the first real entry.
    pub fn record_failure(&mut self, peer: Peer, next_sent: Index) {
        if let Some(progress) = self.peers.get_mut(&peer) {
            let next_index = progress.next_index.min(next_sent - 1).max(1);
            progress.next_index = next_index.max(progress.match_index + 1);
        }
    }

    /// The highest index after `commit_index` that can be committed in `term`.
    ///
    /// Only entries of the leader's own term are counted. Entries of earlier
    /// terms become committed when a later entry does.
    pub fn compute_commit_index(
        &self,
        log: &LogArray,
        term: Term,
        commit_index: Index,
        cluster_size: usize,
    ) -> Option<Index> {
        let mut index = log.last_index_term().index;
        while index > commit_index {
            let entry_term = log.at(index).term;
            if entry_term < term {
                break;
            }
            if entry_term == term {
                let replicated = 1 + self
                    .peers
                    .values()
                    .filter(|progress| progress.match_index >= index)
                    .count();
                if is_quorum(replicated, cluster_size) {
                    return Some(index);
                }
            }
            index -= 1;
        }
        None
    }
}
