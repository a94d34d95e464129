use crate::daemon_env::{check_or_record, Component, ErrorKind};
use crate::{AppendEntriesArgs, AppendEntriesReply, IndexTerm, RaftContext};

/// Merge the entries of a leader of the current term into our log.
///
/// On success the commit index follows the leader's, but never goes past the
/// last entry carried by this request. Entries after that might still be
/// leftovers of an older term.
pub(crate) fn accept_append_entries(
    context: &RaftContext,
    args: AppendEntriesArgs,
) -> AppendEntriesReply {
    let term = context.persistent.current_term();
    let reject = AppendEntriesReply {
        term,
        success: false,
    };

    let consecutive = args
        .entries
        .iter()
        .enumerate()
        .all(|(offset, entry)| {
            args.prev_log_index
                .checked_add(offset + 1)
                .map_or(false, |index| entry.index == index)
        });
    if !consecutive {
        check_or_record!(
            context.daemon_env,
            false,
            Component::AppendEntries,
            ErrorKind::NonConsecutiveEntries(args.prev_log_index),
            format!("{:?} sent entries out of order", args.leader_id)
        );
        return reject;
    }

    let commit_index = context.volatile.commit_index();
    let prev = IndexTerm::pack(args.prev_log_index, args.prev_log_term);
    let appended =
        match context.log.append_entries_after_prev_entry(prev, &args.entries) {
            Some(appended) => appended,
            None => {
                log::debug!(
                    "{:?} log does not contain {:?} from {:?}",
                    context.me,
                    prev,
                    args.leader_id
                );
                return reject;
            }
        };
    if let Some(truncated_at) = appended.truncated_at {
        check_or_record!(
            context.daemon_env,
            truncated_at > commit_index,
            Component::AppendEntries,
            ErrorKind::RollbackCommitted(truncated_at),
            format!(
                "Entries from {} were removed, but commit index is {}",
                truncated_at, commit_index
            )
        );
    }

    let last_new_index = args.prev_log_index + args.entries.len();
    if args.leader_commit > commit_index {
        context
            .volatile
            .advance_commit_index(args.leader_commit.min(last_new_index));
    }

    AppendEntriesReply {
        term,
        success: true,
    }
}
