use std::cmp::Ordering;

use serde_derive::{Deserialize, Serialize};

use crate::{Index, LogEntry, Term};

/// The index and term of one log entry.
///
/// `IndexTerm`s are ordered by term first and index second. Comparing the last
/// `IndexTerm` of two logs tells which log is more up-to-date.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct IndexTerm {
    pub index: Index,
    pub term: Term,
}

impl IndexTerm {
    pub fn pack(index: Index, term: Term) -> Self {
        Self { index, term }
    }

    pub fn unpack(&self) -> (Index, Term) {
        (self.index, self.term)
    }
}

impl Ord for IndexTerm {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.term, self.index).cmp(&(other.term, other.index))
    }
}

impl PartialOrd for IndexTerm {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&LogEntry> for IndexTerm {
    fn from(entry: &LogEntry) -> Self {
        Self {
            index: entry.index,
            term: entry.term,
        }
    }
}

impl From<IndexTerm> for (Index, Term) {
    fn from(index_term: IndexTerm) -> Self {
        index_term.unpack()
    }
}

impl From<(Index, Term)> for IndexTerm {
    fn from(index_term: (Index, Term)) -> Self {
        IndexTerm::pack(index_term.0, index_term.1)
    }
}
