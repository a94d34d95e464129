use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::storage::decode_and_encode::{
    decode_log_records, decode_term_vote, encode_log_record, encode_term_vote,
    StoredTermVote,
};
use crate::storage::{check_append_position, RaftStorage, RaftStoredState};
use crate::{LogEntry, Peer, Term};

const TERM_VOTE_FILE: &str = "term_vote";
const TERM_VOTE_TMP_FILE: &str = "term_vote.tmp";
const LOG_FILE: &str = "log";

/// Storage backed by two files in one directory.
///
/// `term_vote` holds the term and vote. It is replaced atomically by writing a
/// temporary file and renaming it. `log` holds framed log entries, and is
/// truncated whenever a suffix of the log is overridden. Every write is synced
/// to disk before the method returns.
pub struct FileStorage {
    dir: PathBuf,
    log: Mutex<LogFile>,
}

struct LogFile {
    file: File,
    /// Offset of the record of each saved entry. The entry at index `i` is at
    /// `offsets[i - 1]`.
    offsets: Vec<u64>,
    end_offset: u64,
}

impl FileStorage {
    /// Open the storage in `dir`, creating the directory if it is missing.
    pub fn open(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.join(LOG_FILE))?;

        let mut stored = vec![];
        file.read_to_end(&mut stored)?;
        let (records, end_offset) = decode_log_records(&stored)?;
        if end_offset != stored.len() as u64 {
            log::warn!(
                "Dropping {} bytes of incomplete log record in {:?}",
                stored.len() as u64 - end_offset,
                dir
            );
            file.set_len(end_offset)?;
            file.sync_all()?;
        }
        let offsets = records.into_iter().map(|(offset, _)| offset).collect();

        Ok(Self {
            dir,
            log: Mutex::new(LogFile {
                file,
                offsets,
                end_offset,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_term_vote(&self) -> std::io::Result<StoredTermVote> {
        match std::fs::read(self.dir.join(TERM_VOTE_FILE)) {
            Ok(bytes) => decode_term_vote(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(StoredTermVote::default())
            }
            Err(e) => Err(e),
        }
    }
}

impl RaftStorage for FileStorage {
    fn save_term_vote(
        &self,
        term: Term,
        voted_for: Option<Peer>,
    ) -> std::io::Result<()> {
        let bytes = encode_term_vote(&StoredTermVote {
            current_term: term,
            voted_for,
        })?;
        let tmp_path = self.dir.join(TERM_VOTE_TMP_FILE);
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
        std::fs::rename(&tmp_path, self.dir.join(TERM_VOTE_FILE))?;
        // Make the rename itself durable.
        File::open(&self.dir)?.sync_all()
    }

    fn append_entries(&self, entries: &[LogEntry]) -> std::io::Result<()> {
        let mut log = self.log.lock();
        let position = match check_append_position(entries, log.offsets.len())?
        {
            Some(position) => position,
            None => return Ok(()),
        };

        let start =
            log.offsets.get(position).copied().unwrap_or(log.end_offset);
        let mut buf = vec![];
        let mut new_offsets = Vec::with_capacity(entries.len());
        for entry in entries {
            new_offsets.push(start + buf.len() as u64);
            encode_log_record(entry, &mut buf)?;
        }

        if start < log.end_offset {
            log.file.set_len(start)?;
        }
        log.file.seek(SeekFrom::Start(start))?;
        log.file.write_all(&buf)?;
        log.file.sync_data()?;

        log.offsets.truncate(position);
        log.offsets.extend(new_offsets);
        log.end_offset = start + buf.len() as u64;
        Ok(())
    }

    fn read_state(&self) -> std::io::Result<RaftStoredState> {
        let term_vote = self.read_term_vote()?;

        let mut log = self.log.lock();
        let end_offset = log.end_offset;
        let mut stored = Vec::with_capacity(end_offset as usize);
        log.file.seek(SeekFrom::Start(0))?;
        (&mut log.file).take(end_offset).read_to_end(&mut stored)?;
        let (records, _) = decode_log_records(&stored)?;

        Ok(RaftStoredState {
            current_term: term_vote.current_term,
            voted_for: term_vote.voted_for,
            log: records.into_iter().map(|(_, entry)| entry).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::{thread_rng, Rng};

    use super::*;
    use crate::LogCommand;

    struct TempDir(PathBuf);

    impl TempDir {
        fn create() -> Self {
            let dir = std::env::temp_dir().join(format!(
                "raft-kv-file-storage-{}",
                thread_rng().gen::<u64>()
            ));
            Self(dir)
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn entry(index: usize, term: usize, value: &str) -> LogEntry {
        LogEntry::new(
            index,
            Term(term),
            LogCommand::Set {
                key: format!("key-{}", index).into_bytes(),
                value: value.as_bytes().to_vec(),
            },
        )
    }

    #[test]
    fn test_empty_dir() {
        let dir = TempDir::create();
        let storage = FileStorage::open(&dir.0).expect("Open should succeed");
        let state = storage.read_state().expect("Read should succeed");
        assert_eq!(RaftStoredState::default(), state);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::create();
        {
            let storage = FileStorage::open(&dir.0).expect("Open");
            storage
                .save_term_vote(Term(2), Some(Peer(1)))
                .expect("Save term vote");
            storage
                .append_entries(&[entry(1, 1, "a"), entry(2, 2, "b")])
                .expect("Append");
            storage
                .save_term_vote(Term(3), None)
                .expect("Save term vote");
        }

        let storage = FileStorage::open(&dir.0).expect("Reopen");
        let state = storage.read_state().expect("Read");
        assert_eq!(Term(3), state.current_term);
        assert_eq!(None, state.voted_for);
        assert_eq!(vec![entry(1, 1, "a"), entry(2, 2, "b")], state.log);
    }

    #[test]
    fn test_override_suffix() {
        let dir = TempDir::create();
        let storage = FileStorage::open(&dir.0).expect("Open");
        storage
            .append_entries(&[
                entry(1, 1, "a"),
                entry(2, 1, "a much longer value"),
                entry(3, 1, "c"),
            ])
            .expect("Append");
        storage
            .append_entries(&[entry(2, 2, "d")])
            .expect("Override");
        storage.append_entries(&[entry(3, 2, "e")]).expect("Append");

        let expected =
            vec![entry(1, 1, "a"), entry(2, 2, "d"), entry(3, 2, "e")];
        assert_eq!(expected, storage.read_state().expect("Read").log);

        drop(storage);
        let storage = FileStorage::open(&dir.0).expect("Reopen");
        assert_eq!(expected, storage.read_state().expect("Read").log);
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = TempDir::create();
        {
            let storage = FileStorage::open(&dir.0).expect("Open");
            storage
                .append_entries(&[entry(1, 1, "a"), entry(2, 1, "b")])
                .expect("Append");
        }
        let log_path = dir.0.join(LOG_FILE);
        let len = std::fs::metadata(&log_path).expect("Log exists").len();
        let file = OpenOptions::new()
            .write(true)
            .open(&log_path)
            .expect("Open log file");
        file.set_len(len - 3).expect("Cut the last record");
        drop(file);

        let storage = FileStorage::open(&dir.0).expect("Reopen");
        assert_eq!(
            vec![entry(1, 1, "a")],
            storage.read_state().expect("Read").log
        );
        // The torn record was removed, so appending continues at index 2.
        storage.append_entries(&[entry(2, 1, "c")]).expect("Append");
        assert_eq!(
            vec![entry(1, 1, "a"), entry(2, 1, "c")],
            storage.read_state().expect("Read").log
        );
    }

    #[test]
    fn test_append_rejects_gap() {
        let dir = TempDir::create();
        let storage = FileStorage::open(&dir.0).expect("Open");
        let err = storage
            .append_entries(&[entry(3, 1, "a")])
            .expect_err("Gap should be rejected");
        assert_eq!(std::io::ErrorKind::InvalidInput, err.kind());
    }
}
