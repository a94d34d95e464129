use std::sync::Arc;

use crate::election_timer::TimerEvent;
use crate::mode::{redirect, ModeProcessor, RunLoop};
use crate::mode_manager::{Generation, ModeManager, TimeoutOutcome};
use crate::process_append_entries::accept_append_entries;
use crate::process_request_vote::decide_vote;
use crate::run_signal::RunSignal;
use crate::{
    AppendEntriesArgs, AppendEntriesReply, Command, RaftContext,
    RequestVoteArgs, RequestVoteReply, SubmitResult,
};

/// Follows a leader and waits for the election timer to fire.
pub(crate) struct FollowerProcessor {
    context: RaftContext,
    signal: RunSignal,
}

impl FollowerProcessor {
    pub fn create(context: RaftContext) -> Self {
        Self {
            context,
            signal: RunSignal::create(),
        }
    }
}

impl ModeProcessor for FollowerProcessor {
    fn process_request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        let reply = decide_vote(&self.context, &args);
        if reply.vote_granted {
            self.context.election_timer.restart();
        }
        reply
    }

    fn process_append_entries(
        &self,
        args: AppendEntriesArgs,
    ) -> AppendEntriesReply {
        // Any request from the current leader proves it is alive, even if the
        // log does not match yet.
        self.context.election_timer.restart();
        accept_append_entries(&self.context, args)
    }

    fn submit_command(&self, _command: Command) -> SubmitResult {
        redirect(&self.context)
    }

    fn run_loop(
        &self,
        manager: Arc<ModeManager>,
        generation: Generation,
    ) -> RunLoop {
        self.context.election_timer.restart();
        let election_timer = self.context.election_timer.clone();
        let signal = self.signal.clone();
        Box::new(move || loop {
            let ticket = match election_timer.wait_for_expiry(&signal) {
                TimerEvent::Expired(ticket) => ticket,
                TimerEvent::Stopped => break,
            };
            match manager.handle_election_timeout(generation, ticket) {
                TimeoutOutcome::Stale => continue,
                TimeoutOutcome::Transitioned | TimeoutOutcome::Superseded => {
                    break
                }
            }
        })
    }

    fn stop(&self) {
        self.signal.stop();
    }
}
