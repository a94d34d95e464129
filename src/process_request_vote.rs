use crate::{IndexTerm, RaftContext, RequestVoteArgs, RequestVoteReply};

/// Decide whether to vote for the candidate.
///
/// The caller has already moved to the candidate's term if it was newer, and
/// rejected it if it was older. The vote is granted if no other candidate got
/// the vote in this term, and the candidate's log is at least as up-to-date as
/// ours.
pub(crate) fn decide_vote(
    context: &RaftContext,
    args: &RequestVoteArgs,
) -> RequestVoteReply {
    let term = context.persistent.current_term();
    if args.term != term {
        return RequestVoteReply {
            term,
            vote_granted: false,
        };
    }

    let last_log = context.log.last_index_term();
    let candidate_log =
        IndexTerm::pack(args.last_log_index, args.last_log_term);
    let vote_granted = candidate_log >= last_log
        && context.persistent.grant_vote(term, args.candidate_id);
    log::debug!(
        "{:?} vote for {:?} at {:?}: {} (ours {:?}, theirs {:?})",
        context.me,
        args.candidate_id,
        term,
        vote_granted,
        last_log,
        candidate_log
    );

    RequestVoteReply { term, vote_granted }
}
