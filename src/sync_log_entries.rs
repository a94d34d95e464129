use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::log_array::LogArray;
use crate::mode_manager::{ActiveScope, Generation, ModeManager};
use crate::peer_progress::ProgressTable;
use crate::rpc_client::PeerReply;
use crate::run_signal::{RunSignal, Wakeup};
use crate::{
    AppendEntriesArgs, AppendEntriesReply, Index, Peer, RaftContext, Term,
};

/// The range of entries carried by one request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SentRange {
    /// The first index sent, i.e. `prev_log_index + 1`.
    pub next_index: Index,
    /// The last index covered by the request. Equals `prev_log_index` for a
    /// heartbeat.
    pub last_index: Index,
}

/// Build one AppendEntries request per peer.
///
/// Each request starts at the peer's `next_index` and carries everything up to
/// the end of the log, unless `heartbeat` is set.
pub(crate) fn build_append_entries(
    context: &RaftContext,
    log: &LogArray,
    progress: &ProgressTable,
    term: Term,
    heartbeat: bool,
) -> Vec<(Peer, AppendEntriesArgs, SentRange)> {
    let leader_commit = context.volatile.commit_index();
    progress
        .iter()
        .map(|(peer, peer_progress)| {
            let next_index = peer_progress.next_index.min(log.end());
            let prev_log_index = next_index - 1;
            let prev_log_term = log.at(prev_log_index).term;
            let entries = if heartbeat {
                vec![]
            } else {
                log.after(next_index).to_vec()
            };
            let range = SentRange {
                next_index,
                last_index: prev_log_index + entries.len(),
            };
            let args = AppendEntriesArgs {
                term,
                leader_id: context.me,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            };
            (peer, args, range)
        })
        .collect()
}

/// Outcome of handling one round of replies.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum RoundOutcome {
    Continue,
    SteppedDown,
}

/// Update progress from the replies of one round, then advance the commit
/// index. Steps down as soon as a reply carries a newer term.
pub(crate) fn handle_append_entries_replies(
    context: &RaftContext,
    scope: &mut ActiveScope,
    progress: &mut ProgressTable,
    term: Term,
    ranges: &BTreeMap<Peer, SentRange>,
    replies: Vec<PeerReply<AppendEntriesReply>>,
) -> RoundOutcome {
    for PeerReply { peer, reply } in replies {
        if reply.term > term {
            log::info!(
                "{:?} saw {:?} from {:?}, stepping down from {:?}",
                context.me,
                reply.term,
                peer,
                term
            );
            context.persistent.observe_term(reply.term);
            scope.become_follower(None);
            return RoundOutcome::SteppedDown;
        }
        let range = match ranges.get(&peer) {
            Some(range) => range,
            None => continue,
        };
        if reply.success {
            progress.record_success(peer, range.last_index);
        } else if reply.term == term {
            progress.record_failure(peer, range.next_index);
        }
    }

    let commit_index = context.volatile.commit_index();
    let new_commit_index = context.log.read(|log| {
        progress.compute_commit_index(
            log,
            term,
            commit_index,
            context.config.cluster_size(),
        )
    });
    if let Some(new_commit_index) = new_commit_index {
        log::debug!(
            "{:?} moving leader commit index to {} at {:?}",
            context.me,
            new_commit_index,
            term
        );
        context.volatile.advance_commit_index(new_commit_index);
    }
    RoundOutcome::Continue
}

/// The run-loop of a leader.
///
/// The first round is a heartbeat announcing the new leader. After that every
/// round sends all entries a peer is missing. Rounds start every broadcast
/// interval, or right away when a new command is submitted.
pub(crate) fn run_replication(
    context: RaftContext,
    signal: RunSignal,
    progress: Arc<Mutex<ProgressTable>>,
    manager: Arc<ModeManager>,
    generation: Generation,
    term: Term,
) {
    let interval = context.config.broadcast_interval();
    let mut heartbeat = true;
    loop {
        let deadline = Instant::now() + interval;
        let requests = manager.run_if_active(generation, |_| {
            let progress = progress.lock();
            context.log.read(|log| {
                build_append_entries(&context, log, &progress, term, heartbeat)
            })
        });
        let requests = match requests {
            Some(requests) => requests,
            None => return,
        };
        heartbeat = false;

        let mut ranges = BTreeMap::new();
        let mut calls = Vec::with_capacity(requests.len());
        for (peer, args, range) in requests {
            ranges.insert(peer, range);
            calls.push((peer, args));
        }
        let replies =
            match context.rpc_client.append_entries(calls, interval, &signal) {
                Some(replies) => replies,
                None => return,
            };

        let outcome = manager.run_if_active(generation, |scope| {
            handle_append_entries_replies(
                &context,
                scope,
                &mut progress.lock(),
                term,
                &ranges,
                replies,
            )
        });
        if outcome != Some(RoundOutcome::Continue) {
            return;
        }
        if signal.sleep_until(deadline) == Wakeup::Stopped {
            return;
        }
    }
}
