use std::sync::Arc;

use parking_lot::Mutex;

use crate::storage::{check_append_position, RaftStorage, RaftStoredState};
use crate::{LogEntry, Peer, Term};

/// Storage that only lives as long as the process.
///
/// Clones share the same data, so a test can keep a handle while a Raft
/// instance is killed and started again on the same storage.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<Mutex<RaftStoredState>>,
}

impl InMemoryStorage {
    pub fn create() -> Self {
        Self::default()
    }

    /// Number of log entries saved, excluding the sentinel.
    pub fn log_len(&self) -> usize {
        self.state.lock().log.len()
    }
}

impl RaftStorage for InMemoryStorage {
    fn save_term_vote(
        &self,
        term: Term,
        voted_for: Option<Peer>,
    ) -> std::io::Result<()> {
        let mut state = self.state.lock();
        state.current_term = term;
        state.voted_for = voted_for;
        Ok(())
    }

    fn append_entries(&self, entries: &[LogEntry]) -> std::io::Result<()> {
        let mut state = self.state.lock();
        if let Some(position) = check_append_position(entries, state.log.len())?
        {
            state.log.truncate(position);
            state.log.extend_from_slice(entries);
        }
        Ok(())
    }

    fn read_state(&self) -> std::io::Result<RaftStoredState> {
        Ok(self.state.lock().clone())
    }
}
