use serde_derive::{Deserialize, Serialize};

use crate::{LogEntry, Peer, Term};

/// Each log record is a little-endian length followed by a bincode entry.
pub(crate) const RECORD_HEADER_LEN: usize = 4;

#[derive(Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoredTermVote {
    pub current_term: Term,
    pub voted_for: Option<Peer>,
}

fn invalid_data(err: bincode::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string())
}

pub(crate) fn encode_term_vote(
    term_vote: &StoredTermVote,
) -> std::io::Result<Vec<u8>> {
    bincode::serialize(term_vote).map_err(invalid_data)
}

pub(crate) fn decode_term_vote(
    stored: &[u8],
) -> std::io::Result<StoredTermVote> {
    bincode::deserialize(stored).map_err(invalid_data)
}

/// Append the framed record of `entry` to `buf`.
pub(crate) fn encode_log_record(
    entry: &LogEntry,
    buf: &mut Vec<u8>,
) -> std::io::Result<()> {
    let bytes = bincode::serialize(entry).map_err(invalid_data)?;
    let len = u32::try_from(bytes.len()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Log entry {} is too large", entry.index),
        )
    })?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&bytes);
    Ok(())
}

/// Split `stored` into framed records.
///
/// Returns the decoded entries together with the offset each record starts
/// at, and the length of the valid prefix. A record cut short by a crash in
/// the middle of a write is ignored, along with everything after it.
pub(crate) fn decode_log_records(
    stored: &[u8],
) -> std::io::Result<(Vec<(u64, LogEntry)>, u64)> {
    let mut records = vec![];
    let mut pos = 0;
    while pos + RECORD_HEADER_LEN <= stored.len() {
        let mut header = [0u8; RECORD_HEADER_LEN];
        header.copy_from_slice(&stored[pos..pos + RECORD_HEADER_LEN]);
        let len = u32::from_le_bytes(header) as usize;
        let start = pos + RECORD_HEADER_LEN;
        if start + len > stored.len() {
            break;
        }
        let entry: LogEntry =
            bincode::deserialize(&stored[start..start + len])
                .map_err(invalid_data)?;
        records.push((pos as u64, entry));
        pos = start + len;
    }
    Ok((records, pos as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogCommand;

    fn entry(index: usize) -> LogEntry {
        LogEntry::new(
            index,
            Term(1),
            LogCommand::Set {
                key: b"key".to_vec(),
                value: vec![index as u8; index],
            },
        )
    }

    #[test]
    fn test_torn_record_is_ignored() {
        let mut buf = vec![];
        encode_log_record(&entry(1), &mut buf).expect("Encode");
        let first_len = buf.len();
        encode_log_record(&entry(2), &mut buf).expect("Encode");

        let (records, valid) = decode_log_records(&buf).expect("Decode");
        assert_eq!(2, records.len());
        assert_eq!(buf.len() as u64, valid);
        assert_eq!(first_len as u64, records[1].0);

        buf.truncate(buf.len() - 1);
        let (records, valid) = decode_log_records(&buf).expect("Decode");
        assert_eq!(vec![(0, entry(1))], records);
        assert_eq!(first_len as u64, valid);
    }

    #[test]
    fn test_term_vote() {
        let term_vote = StoredTermVote {
            current_term: Term(7),
            voted_for: Some(Peer(1)),
        };
        let bytes = encode_term_vote(&term_vote).expect("Encode");
        assert_eq!(term_vote, decode_term_vote(&bytes).expect("Decode"));
        assert!(decode_term_vote(&[1, 2]).is_err());
    }
}
