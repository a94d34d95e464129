use std::sync::Arc;

use parking_lot::Mutex;

use crate::mode::{ModeProcessor, RunLoop};
use crate::mode_manager::{Generation, ModeManager};
use crate::peer_progress::ProgressTable;
use crate::run_signal::RunSignal;
use crate::submission::Submission;
use crate::sync_log_entries::run_replication;
use crate::{
    AppendEntriesArgs, AppendEntriesReply, Command, LogCommand, RaftContext,
    RequestVoteArgs, RequestVoteReply, SubmitError, SubmitResult, Term,
};

/// Replicates the log to followers and accepts commands.
pub(crate) struct LeaderProcessor {
    context: RaftContext,
    signal: RunSignal,
    progress: Arc<Mutex<ProgressTable>>,
    term: Term,
}

impl LeaderProcessor {
    pub fn create(context: RaftContext) -> Self {
        let last_index = context.log.last_index_term().index;
        let progress =
            ProgressTable::create(context.config.peers(), last_index);
        let term = context.persistent.current_term();
        Self {
            context,
            signal: RunSignal::create(),
            progress: Arc::new(Mutex::new(progress)),
            term,
        }
    }
}

impl ModeProcessor for LeaderProcessor {
    // Requests of a newer term turn the leader into a follower first. A
    // candidate of the same term already lost.
    fn process_request_vote(&self, _args: RequestVoteArgs) -> RequestVoteReply {
        RequestVoteReply {
            term: self.term,
            vote_granted: false,
        }
    }

    fn process_append_entries(
        &self,
        _args: AppendEntriesArgs,
    ) -> AppendEntriesReply {
        AppendEntriesReply {
            term: self.term,
            success: false,
        }
    }

    fn submit_command(&self, command: Command) -> SubmitResult {
        let log_command = match LogCommand::try_from(command) {
            Ok(log_command) => log_command,
            Err(command) => {
                return SubmitResult::Success(Submission::direct(
                    self.context.state_machine.submit_direct(command),
                ))
            }
        };
        // Nothing will be applied again.
        if let Some(error) = self.context.submissions.halt_error() {
            return SubmitResult::Success(Submission::failed(error));
        }
        let index = self.context.log.append_entry(self.term, log_command);
        let submission = self.context.submissions.register(index);
        log::debug!(
            "{:?} accepted a command at index {} of {:?}",
            self.context.me,
            index,
            self.term
        );
        self.signal.nudge();
        SubmitResult::Success(submission)
    }

    fn run_loop(
        &self,
        manager: Arc<ModeManager>,
        generation: Generation,
    ) -> RunLoop {
        let context = self.context.clone();
        let signal = self.signal.clone();
        let progress = self.progress.clone();
        let term = self.term;
        Box::new(move || {
            run_replication(
                context, signal, progress, manager, generation, term,
            )
        })
    }

    fn stop(&self) {
        self.signal.stop();
        let failed = self
            .context
            .submissions
            .complete_all_with_failure(|| SubmitError::LeadershipLost);
        if failed > 0 {
            log::info!(
                "{:?} failed {} pending submission(s) of {:?}",
                self.context.me,
                failed,
                self.term
            );
        }
    }
}
