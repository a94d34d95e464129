use std::sync::Arc;
use std::time::Instant;

use crate::mode::{redirect, ModeProcessor, RunLoop};
use crate::mode_manager::{Generation, ModeManager};
use crate::rpc_client::PeerReply;
use crate::run_signal::{RunSignal, Wakeup};
use crate::utils::is_quorum;
use crate::{
    AppendEntriesArgs, AppendEntriesReply, Command, RaftContext,
    RequestVoteArgs, RequestVoteReply, SubmitResult, Term,
};

/// Runs election rounds until it wins, or hears from a leader or a newer term.
pub(crate) struct CandidateProcessor {
    context: RaftContext,
    signal: RunSignal,
}

/// What one round of voting came back with.
#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct VoteTally {
    /// Votes granted by peers in the round's term, excluding our own.
    pub granted: usize,
    /// The largest term seen in any reply.
    pub largest_term: Term,
}

impl VoteTally {
    pub fn count(term: Term, replies: &[PeerReply<RequestVoteReply>]) -> Self {
        let mut tally = VoteTally {
            granted: 0,
            largest_term: term,
        };
        for PeerReply { reply, .. } in replies {
            if reply.vote_granted && reply.term == term {
                tally.granted += 1;
            }
            tally.largest_term = tally.largest_term.max(reply.term);
        }
        tally
    }
}

impl CandidateProcessor {
    pub fn create(context: RaftContext) -> Self {
        Self {
            context,
            signal: RunSignal::create(),
        }
    }

    fn run_elections(
        context: RaftContext,
        signal: RunSignal,
        manager: Arc<ModeManager>,
        generation: Generation,
    ) {
        let me = context.me;
        let cluster_size = context.config.cluster_size();
        loop {
            let round = manager.run_if_active(generation, |_| {
                let term = context.persistent.start_election(me);
                let (last_log_index, last_log_term) =
                    context.log.last_index_term().unpack();
                RequestVoteArgs {
                    term,
                    candidate_id: me,
                    last_log_index,
                    last_log_term,
                }
            });
            let args = match round {
                Some(args) => args,
                None => return,
            };
            let term = args.term;
            let timeout = context.config.random_election_timeout();
            let deadline = Instant::now() + timeout;
            log::info!("{:?} starts an election at {:?}", me, term);

            let replies =
                match context.rpc_client.request_votes(args, timeout, &signal) {
                    Some(replies) => replies,
                    None => return,
                };
            let tally = VoteTally::count(term, &replies);

            if tally.largest_term > term {
                manager.run_if_active(generation, |scope| {
                    context.persistent.observe_term(tally.largest_term);
                    scope.become_follower(None);
                });
                return;
            }
            if is_quorum(1 + tally.granted, cluster_size) {
                log::info!(
                    "{:?} won the election at {:?} with {} vote(s)",
                    me,
                    term,
                    1 + tally.granted
                );
                manager
                    .run_if_active(generation, |scope| scope.become_leader());
                return;
            }

            log::info!(
                "{:?} lost the election at {:?} with {} vote(s)",
                me,
                term,
                1 + tally.granted
            );
            if signal.sleep_until(deadline) == Wakeup::Stopped {
                return;
            }
        }
    }
}

impl ModeProcessor for CandidateProcessor {
    // The manager turns a candidate into a follower before any request of the
    // current or a newer term reaches it. Whatever is left is rejected.
    fn process_request_vote(&self, _args: RequestVoteArgs) -> RequestVoteReply {
        RequestVoteReply {
            term: self.context.persistent.current_term(),
            vote_granted: false,
        }
    }

    fn process_append_entries(
        &self,
        _args: AppendEntriesArgs,
    ) -> AppendEntriesReply {
        AppendEntriesReply {
            term: self.context.persistent.current_term(),
            success: false,
        }
    }

    fn submit_command(&self, _command: Command) -> SubmitResult {
        redirect(&self.context)
    }

    fn run_loop(
        &self,
        manager: Arc<ModeManager>,
        generation: Generation,
    ) -> RunLoop {
        let context = self.context.clone();
        let signal = self.signal.clone();
        Box::new(move || {
            Self::run_elections(context, signal, manager, generation)
        })
    }

    fn stop(&self) {
        self.signal.stop();
    }
}
