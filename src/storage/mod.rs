use std::sync::Arc;

use crate::{LogEntry, Peer, Term};

pub use file_storage::FileStorage;
pub use in_memory::InMemoryStorage;

mod decode_and_encode;
mod file_storage;
mod in_memory;

/// Everything needed to restore a Raft instance after it restarts.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RaftStoredState {
    pub current_term: Term,
    pub voted_for: Option<Peer>,
    /// Log entries starting at index 1, in order.
    pub log: Vec<LogEntry>,
}

/// Durable storage of the Raft state.
///
/// A Raft instance writes to storage before it replies to any RPC or accepts
/// any command that depends on the written data. Once a method returns `Ok`,
/// the data must survive a crash. A failed write is fatal to the instance.
pub trait RaftStorage: Send + Sync + 'static {
    /// Save the current term and the vote cast in that term.
    fn save_term_vote(
        &self,
        term: Term,
        voted_for: Option<Peer>,
    ) -> std::io::Result<()>;

    /// Append a list of entries to the saved log, overriding existing entries
    /// at the same indexes if they are previously appended. The indexes in
    /// `entries` must be consecutive, and the first one must not be greater
    /// than one plus the last saved index. Saved entries after the input range
    /// are discarded. An empty list is a no-op.
    fn append_entries(&self, entries: &[LogEntry]) -> std::io::Result<()>;

    /// Reads out the entire saved state.
    fn read_state(&self) -> std::io::Result<RaftStoredState>;
}

pub type SharedStorage = Arc<dyn RaftStorage>;

fn check_append_position(
    entries: &[LogEntry],
    saved_len: usize,
) -> std::io::Result<Option<usize>> {
    let first = match entries.first() {
        Some(first) => first,
        None => return Ok(None),
    };
    let consecutive = entries
        .iter()
        .enumerate()
        .all(|(offset, entry)| entry.index == first.index + offset);
    // Saved entries start at index 1, so the entry at `index` is stored at
    // position `index - 1`.
    if first.index == 0 || first.index - 1 > saved_len || !consecutive {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!(
                "Cannot append entries starting at {} to {} saved entries",
                first.index, saved_len
            ),
        ));
    }
    Ok(Some(first.index - 1))
}
