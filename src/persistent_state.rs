use parking_lot::Mutex;

use crate::storage::SharedStorage;
use crate::{Peer, Term};

/// The current term and the vote cast in it.
///
/// Every change is written to storage before the method returns. A storage
/// failure panics: an instance that cannot remember its vote must not keep
/// participating.
pub(crate) struct PersistentState {
    term_vote: Mutex<TermVote>,
    storage: SharedStorage,
}

#[derive(Clone, Copy, Debug)]
struct TermVote {
    current_term: Term,
    voted_for: Option<Peer>,
}

impl PersistentState {
    pub fn create(
        current_term: Term,
        voted_for: Option<Peer>,
        storage: SharedStorage,
    ) -> Self {
        Self {
            term_vote: Mutex::new(TermVote {
                current_term,
                voted_for,
            }),
            storage,
        }
    }

    pub fn current_term(&self) -> Term {
        self.term_vote.lock().current_term
    }

    /// The candidate voted for in the current term.
    #[cfg(test)]
    pub fn voted_for(&self) -> Option<Peer> {
        self.term_vote.lock().voted_for
    }

    /// Move to `term` if it is newer than the current term, forgetting the
    /// vote. Returns true if the term changed.
    pub fn observe_term(&self, term: Term) -> bool {
        let mut term_vote = self.term_vote.lock();
        if term <= term_vote.current_term {
            return false;
        }
        term_vote.current_term = term;
        term_vote.voted_for = None;
        self.persist(&term_vote);
        true
    }

    /// Start a new term and vote for `me` in it. Returns the new term.
    pub fn start_election(&self, me: Peer) -> Term {
        let mut term_vote = self.term_vote.lock();
        term_vote.current_term.0 += 1;
        term_vote.voted_for = Some(me);
        self.persist(&term_vote);
        term_vote.current_term
    }

    /// Vote for `candidate` in `term`, unless a vote has already been cast for
    /// someone else in that term. Voting for the same candidate again is
    /// allowed, so a retried request gets the same answer.
    pub fn grant_vote(&self, term: Term, candidate: Peer) -> bool {
        let mut term_vote = self.term_vote.lock();
        if term != term_vote.current_term {
            return false;
        }
        match term_vote.voted_for {
            Some(voted_for) => voted_for == candidate,
            None => {
                term_vote.voted_for = Some(candidate);
                self.persist(&term_vote);
                true
            }
        }
    }

    fn persist(&self, term_vote: &TermVote) {
        if let Err(e) = self
            .storage
            .save_term_vote(term_vote.current_term, term_vote.voted_for)
        {
            panic!("Failed to save term and vote {:?}: {}", term_vote, e);
        }
    }
}
