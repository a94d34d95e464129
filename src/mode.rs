use std::sync::Arc;

use crate::candidate::CandidateProcessor;
use crate::follower::FollowerProcessor;
use crate::leader::LeaderProcessor;
use crate::mode_manager::{Generation, ModeManager};
use crate::{
    AppendEntriesArgs, AppendEntriesReply, Command, RaftContext,
    RequestVoteArgs, RequestVoteReply, SubmitResult,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ModeKind {
    Follower,
    Candidate,
    Leader,
}

pub(crate) type RunLoop = Box<dyn FnOnce() + Send + 'static>;

/// The behavior of one mode.
///
/// All methods are called with the mode manager lock held, and only while the
/// processor is the active one.
pub(crate) trait ModeProcessor {
    fn process_request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply;

    fn process_append_entries(
        &self,
        args: AppendEntriesArgs,
    ) -> AppendEntriesReply;

    fn submit_command(&self, command: Command) -> SubmitResult;

    /// The background loop of this mode, run on its own thread. The loop must
    /// exit soon after `stop()` is called.
    fn run_loop(
        &self,
        manager: Arc<ModeManager>,
        generation: Generation,
    ) -> RunLoop;

    fn stop(&self);
}

pub(crate) enum Mode {
    Follower(FollowerProcessor),
    Candidate(CandidateProcessor),
    Leader(LeaderProcessor),
}

impl Mode {
    pub fn create(kind: ModeKind, context: RaftContext) -> Self {
        match kind {
            ModeKind::Follower => {
                Mode::Follower(FollowerProcessor::create(context))
            }
            ModeKind::Candidate => {
                Mode::Candidate(CandidateProcessor::create(context))
            }
            ModeKind::Leader => Mode::Leader(LeaderProcessor::create(context)),
        }
    }

    pub fn kind(&self) -> ModeKind {
        match self {
            Mode::Follower(_) => ModeKind::Follower,
            Mode::Candidate(_) => ModeKind::Candidate,
            Mode::Leader(_) => ModeKind::Leader,
        }
    }

    pub fn processor(&self) -> &dyn ModeProcessor {
        match self {
            Mode::Follower(processor) => processor,
            Mode::Candidate(processor) => processor,
            Mode::Leader(processor) => processor,
        }
    }
}

/// The answer to a command sent to a server that is not the leader.
pub(crate) fn redirect(context: &RaftContext) -> SubmitResult {
    let leader = context
        .volatile
        .leader_id()
        .filter(|leader| *leader != context.me)
        .and_then(|leader| context.config.address_of(leader));
    match leader {
        Some(address) => SubmitResult::NotCurrentLeader {
            host: address.host.clone(),
            port: address.port,
        },
        None => SubmitResult::NoKnownLeader,
    }
}
