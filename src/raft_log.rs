use parking_lot::Mutex;

use crate::log_array::{Appended, LogArray};
use crate::storage::SharedStorage;
use crate::{Index, IndexTerm, LogCommand, LogEntry, Term};

/// The Raft log, kept in sync with storage.
///
/// Every mutation is written to storage while the log lock is held, so the
/// stored log always goes through the same sequence of states as the in-memory
/// one. A storage failure panics.
pub(crate) struct RaftLog {
    array: Mutex<LogArray>,
    storage: SharedStorage,
}

impl RaftLog {
    pub fn create(array: LogArray, storage: SharedStorage) -> Self {
        Self {
            array: Mutex::new(array),
            storage,
        }
    }

    /// Append a new entry created by this instance as leader.
    pub fn append_entry(&self, term: Term, command: LogCommand) -> Index {
        let mut array = self.array.lock();
        let index = array.add_command(term, command);
        self.persist(array.after(index));
        index
    }

    /// Merge entries sent by a leader. See
    /// [`LogArray::append_entries_after_prev_entry`].
    pub fn append_entries_after_prev_entry(
        &self,
        prev: IndexTerm,
        entries: &[LogEntry],
    ) -> Option<Appended> {
        let mut array = self.array.lock();
        let appended = array.append_entries_after_prev_entry(prev, entries)?;
        if let Some(first_changed) = appended.first_changed {
            self.persist(array.after(first_changed));
        }
        Some(appended)
    }

    pub fn last_index_term(&self) -> IndexTerm {
        self.array.lock().last_index_term()
    }

    #[cfg(test)]
    pub fn entry_at(&self, index: Index) -> Option<LogEntry> {
        self.array.lock().get(index).cloned()
    }

    /// Run `f` with the log locked.
    pub fn read<R>(&self, f: impl FnOnce(&LogArray) -> R) -> R {
        f(&self.array.lock())
    }

    fn persist(&self, entries: &[LogEntry]) {
        if let Err(e) = self.storage.append_entries(entries) {
            panic!(
                "Failed to save log entries starting at {:?}: {}",
                entries.first().map(|e| e.index),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::{InMemoryStorage, RaftStorage};

    fn set(key: &str) -> LogCommand {
        LogCommand::Set {
            key: key.as_bytes().to_vec(),
            value: vec![],
        }
    }

    fn make_log() -> (RaftLog, InMemoryStorage) {
        let storage = InMemoryStorage::create();
        let log =
            RaftLog::create(LogArray::create(), Arc::new(storage.clone()));
        (log, storage)
    }

    #[test]
    fn test_append_entry_is_persisted() {
        let (log, storage) = make_log();
        assert_eq!(1, log.append_entry(Term(1), set("a")));
        assert_eq!(2, log.append_entry(Term(1), set("b")));
        assert_eq!(IndexTerm::pack(2, Term(1)), log.last_index_term());

        let stored = storage.read_state().expect("Reading never fails").log;
        assert_eq!(2, stored.len());
        assert_eq!(Some(&set("b")), stored[1].command());
    }

    #[test]
    fn test_conflict_is_persisted() {
        let (log, storage) = make_log();
        log.append_entry(Term(1), set("a"));
        log.append_entry(Term(1), set("b"));
        log.append_entry(Term(2), set("c"));

        let appended = log.append_entries_after_prev_entry(
            IndexTerm::pack(2, Term(1)),
            &[LogEntry::new(3, Term(3), set("d"))],
        );
        assert_eq!(Some(3), appended.and_then(|a| a.truncated_at));

        let stored = storage.read_state().expect("Reading never fails").log;
        let commands: Vec<_> =
            stored.iter().filter_map(|e| e.command().cloned()).collect();
        assert_eq!(vec![set("a"), set("b"), set("d")], commands);
        assert_eq!(Term(3), stored[2].term);
    }

    #[test]
    fn test_mismatch_writes_nothing() {
        let (log, storage) = make_log();
        let appended = log.append_entries_after_prev_entry(
            IndexTerm::pack(1, Term(1)),
            &[LogEntry::new(2, Term(1), set("a"))],
        );
        assert_eq!(None, appended);
        assert_eq!(0, storage.log_len());
        assert_eq!(None, log.entry_at(1));
        assert!(log.entry_at(0).is_some());
    }
}
