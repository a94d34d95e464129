use serde_derive::{Deserialize, Serialize};

use crate::index_term::IndexTerm;
use crate::{LogCommand, Term};

/// The in-memory Raft log.
///
/// The log always starts with a sentinel entry at index 0 with term 0. The
/// sentinel carries no command and is never applied or replicated. Real
/// entries start at index 1, so an empty log has `end() == 1` and its last
/// `IndexTerm` is `(0, Term(0))`.
///
/// New entries are appended via `add_command()` or `push()`. Entries after the
/// sentinel can be dropped via `truncate()`.
///
/// All APIs **will** panic if the given index(es) are out of bound.
pub type Index = usize;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
enum LogEntryEnum {
    Sentinel,
    Command(LogCommand),
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: Index,
    pub term: Term,
    command: LogEntryEnum,
}

impl LogEntry {
    pub fn new(index: Index, term: Term, command: LogCommand) -> Self {
        Self {
            index,
            term,
            command: LogEntryEnum::Command(command),
        }
    }

    pub fn command(&self) -> Option<&LogCommand> {
        match &self.command {
            LogEntryEnum::Sentinel => None,
            LogEntryEnum::Command(command) => Some(command),
        }
    }
}

/// NOT THREAD SAFE.
#[derive(Clone, Debug)]
pub(crate) struct LogArray {
    inner: Vec<LogEntry>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ValidationError {
    /// The entry at the position does not carry the expected index.
    IndexMismatch(Index),
    /// The term of the entry at the index is smaller than the one before it.
    TermSpike(Index),
    /// The entry at the index has a term larger than the current term.
    FutureTerm(Term, Index),
    /// Only the sentinel may live at index 0.
    MisplacedSentinel(Index),
}

/// What changed in the log after entries from a leader were accepted.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct Appended {
    /// Set if conflicting entries on and after this index were removed.
    pub truncated_at: Option<Index>,
    /// The first index that was written. Entries on and after this index must
    /// be persisted again. `None` if nothing changed.
    pub first_changed: Option<Index>,
}

impl LogArray {
    /// Create an empty Raft log, holding only the sentinel.
    pub fn create() -> LogArray {
        LogArray {
            inner: vec![LogEntry {
                index: 0,
                term: Term(0),
                command: LogEntryEnum::Sentinel,
            }],
        }
    }

    /// Rebuild a log from entries read from storage. The sentinel must not be
    /// included in `entries`.
    pub fn restore(
        entries: Vec<LogEntry>,
        current_term: Term,
    ) -> Result<LogArray, ValidationError> {
        let mut log = Self::create();
        for entry in entries {
            if entry.index != log.end() {
                return Err(ValidationError::IndexMismatch(log.end()));
            }
            if entry.command().is_none() {
                return Err(ValidationError::MisplacedSentinel(entry.index));
            }
            log.inner.push(entry);
        }
        log.validate(current_term)?;
        Ok(log)
    }
}

// Log accessors
impl LogArray {
    /// The end index of the Raft log.
    pub fn end(&self) -> Index {
        self.inner.len()
    }

    /// The last index and term of the Raft log.
    pub fn last_index_term(&self) -> IndexTerm {
        self.last_entry().into()
    }

    /// The log entry at the given index.
    pub fn at(&self, index: Index) -> &LogEntry {
        let index = self.check_at_index(index);
        &self.inner[index]
    }

    /// The log entry at the given index, if the log is long enough.
    pub fn get(&self, index: Index) -> Option<&LogEntry> {
        self.inner.get(index)
    }

    /// All log entries on and after the given index.
    pub fn after(&self, index: Index) -> &[LogEntry] {
        let index = self.check_range_index(index);
        &self.inner[index..]
    }

    /// All log entries in range [start, end).
    pub fn between(&self, start: Index, end: Index) -> &[LogEntry] {
        let start = self.check_range_index(start);
        let end = self.check_range_index(end);
        &self.inner[start..end]
    }

    /// Whether the entry at `index_term.index` exists and has the same term.
    pub fn matches(&self, index_term: IndexTerm) -> bool {
        self.get(index_term.index)
            .map(|entry| entry.term == index_term.term)
            .unwrap_or(false)
    }

    /// `IndexTerm` of all log entries, without command.
    #[cfg(test)]
    pub fn all_index_term(&self) -> Vec<IndexTerm> {
        self.inner.iter().map(|e| e.into()).collect()
    }

    pub fn validate(&self, current_term: Term) -> Result<(), ValidationError> {
        let mut term = self.inner[0].term;
        for (offset, entry) in self.inner.iter().enumerate() {
            if entry.index != offset {
                return Err(ValidationError::IndexMismatch(offset));
            }
            if offset == 0 {
                continue;
            }
            if entry.term < term {
                return Err(ValidationError::TermSpike(offset));
            }
            if entry.term > current_term {
                return Err(ValidationError::FutureTerm(current_term, offset));
            }
            term = entry.term;
        }
        Ok(())
    }
}

// Mutations
impl LogArray {
    /// Add a new entry to the Raft log, with term and command. The new index is
    /// returned.
    pub fn add_command(&mut self, term: Term, command: LogCommand) -> Index {
        let index = self.end();
        self.push(LogEntry::new(index, term, command));
        index
    }

    /// Push a LogEntry into the Raft log. The index of the log entry must match
    /// the next index in the log.
    pub fn push(&mut self, log_entry: LogEntry) {
        let index = log_entry.index;
        assert_eq!(index, self.end(), "Expecting new index to be exact at len");
        assert!(
            log_entry.command().is_some(),
            "Only the first entry can be a sentinel"
        );
        self.inner.push(log_entry);
        assert_eq!(
            index + 1,
            self.end(),
            "Expecting len increase by one after push",
        );
    }

    /// Remove all log entries on and after `index`.
    pub fn truncate(&mut self, index: Index) {
        let index = self.check_middle_index(index);
        self.inner.truncate(index);
    }

    /// Merge entries sent by a leader into the log.
    ///
    /// Returns `None` if the log does not contain an entry matching `prev`.
    /// Otherwise every entry is compared to the one at the same index. The log
    /// is truncated at the first conflicting term, and all entries from there
    /// on are appended. Entries that already match are left alone, so a stale
    /// or duplicated request never shortens the log.
    pub fn append_entries_after_prev_entry(
        &mut self,
        prev: IndexTerm,
        entries: &[LogEntry],
    ) -> Option<Appended> {
        if !self.matches(prev) {
            return None;
        }
        let mut appended = Appended::default();
        for (offset, entry) in entries.iter().enumerate() {
            let index = prev.index + 1 + offset;
            assert_eq!(index, entry.index, "Entries must be consecutive");
            if index < self.end() {
                if self.at(index).term == entry.term {
                    continue;
                }
                self.truncate(index);
                appended.truncated_at = Some(index);
            }
            appended.first_changed.get_or_insert(index);
            self.push(entry.clone());
        }
        Some(appended)
    }
}

impl LogArray {
    fn last_entry(&self) -> &LogEntry {
        self.inner
            .last()
            .expect("There must be at least one entry in log")
    }

    fn check_at_index(&self, index: Index) -> usize {
        assert!(
            index < self.end(),
            "Accessing log index {} out of range [0, {})",
            index,
            self.end()
        );
        index
    }

    fn check_range_index(&self, index: Index) -> usize {
        assert!(
            index <= self.end(),
            "Accessing end log index {} out of range [0, {}]",
            index,
            self.end()
        );
        index
    }

    fn check_middle_index(&self, index: Index) -> usize {
        assert!(
            index > 0 && index < self.end(),
            "Log index {} out of range (0, {})",
            index,
            self.end()
        );
        index
    }
}
