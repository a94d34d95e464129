use std::sync::Arc;

use parking_lot::Mutex;

use crate::daemon_env::{check_or_record, Component, ErrorKind};
use crate::daemon_watch::Daemon;
use crate::election_timer::TimerTicket;
use crate::mode::{Mode, ModeKind};
use crate::{
    AppendEntriesArgs, AppendEntriesReply, Command, Peer, RaftContext,
    RequestVoteArgs, RequestVoteReply, SubmitResult,
};

/// Counts mode transitions. A run-loop remembers the generation it was started
/// in, and may only act while that generation is still current.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Generation(u64);

/// Owns the active mode and serializes everything that reads or changes it.
///
/// RPC handlers, command submission and run-loops all go through the manager
/// lock. A transition stops the old processor and starts the run-loop of the
/// new one before the lock is released, so at most one processor acts at a
/// time.
pub(crate) struct ModeManager {
    context: RaftContext,
    active: Mutex<ActiveMode>,
}

struct ActiveMode {
    generation: Generation,
    mode: Mode,
    shut_down: bool,
}

/// Access to the manager for a run-loop whose generation is still current.
pub(crate) struct ActiveScope<'a> {
    manager: &'a Arc<ModeManager>,
    active: &'a mut ActiveMode,
}

impl ActiveScope<'_> {
    pub fn become_follower(&mut self, leader: Option<Peer>) {
        self.manager
            .transition(&mut *self.active, ModeKind::Follower, leader);
    }

    pub fn become_leader(&mut self) {
        self.manager
            .transition(&mut *self.active, ModeKind::Leader, None);
    }
}

#[derive(Debug, Eq, PartialEq)]
pub(crate) enum TimeoutOutcome {
    /// The follower became a candidate.
    Transitioned,
    /// The timer was restarted after it fired. Keep waiting.
    Stale,
    /// The mode that owned the timer is gone.
    Superseded,
}

impl ModeManager {
    pub fn create(context: RaftContext) -> Arc<Self> {
        let mode = Mode::create(ModeKind::Follower, context.clone());
        Arc::new(Self {
            context,
            active: Mutex::new(ActiveMode {
                generation: Generation(0),
                mode,
                shut_down: false,
            }),
        })
    }

    /// Start the run-loop of the initial follower.
    pub fn start(self: &Arc<Self>) {
        let active = self.active.lock();
        self.spawn_run_loop(&active);
    }

    pub fn mode_kind(&self) -> ModeKind {
        self.active.lock().mode.kind()
    }

    pub fn process_request_vote(
        self: &Arc<Self>,
        args: RequestVoteArgs,
    ) -> RequestVoteReply {
        let mut active = self.active.lock();
        let current_term = self.context.persistent.current_term();
        if active.shut_down || args.term < current_term {
            return RequestVoteReply {
                term: current_term,
                vote_granted: false,
            };
        }

        if args.term > current_term {
            self.context.persistent.observe_term(args.term);
            if active.mode.kind() == ModeKind::Follower {
                self.context.volatile.set_leader_id(None);
            } else {
                self.transition(&mut active, ModeKind::Follower, None);
            }
        } else if active.mode.kind() == ModeKind::Candidate {
            // Another candidate of the same term, this election is over.
            self.transition(&mut active, ModeKind::Follower, None);
        }
        active.mode.processor().process_request_vote(args)
    }

    pub fn process_append_entries(
        self: &Arc<Self>,
        args: AppendEntriesArgs,
    ) -> AppendEntriesReply {
        let mut active = self.active.lock();
        let current_term = self.context.persistent.current_term();
        if active.shut_down || args.term < current_term {
            return AppendEntriesReply {
                term: current_term,
                success: false,
            };
        }

        if args.term > current_term {
            self.context.persistent.observe_term(args.term);
        }
        match active.mode.kind() {
            ModeKind::Follower => {}
            ModeKind::Candidate => self.transition(
                &mut active,
                ModeKind::Follower,
                Some(args.leader_id),
            ),
            ModeKind::Leader if args.term > current_term => self.transition(
                &mut active,
                ModeKind::Follower,
                Some(args.leader_id),
            ),
            ModeKind::Leader => {
                check_or_record!(
                    self.context.daemon_env,
                    false,
                    Component::AppendEntries,
                    ErrorKind::SecondLeaderInTerm(current_term),
                    format!(
                        "{:?} received AppendEntries from {:?}",
                        self.context.me, args.leader_id
                    )
                );
                return AppendEntriesReply {
                    term: current_term,
                    success: false,
                };
            }
        }
        self.context.volatile.set_leader_id(Some(args.leader_id));
        active.mode.processor().process_append_entries(args)
    }

    pub fn submit_command(&self, command: Command) -> SubmitResult {
        let active = self.active.lock();
        if active.shut_down {
            return SubmitResult::NoKnownLeader;
        }
        active.mode.processor().submit_command(command)
    }

    /// Called by the follower run-loop when the election timer fires.
    pub fn handle_election_timeout(
        self: &Arc<Self>,
        generation: Generation,
        ticket: TimerTicket,
    ) -> TimeoutOutcome {
        let mut active = self.active.lock();
        if active.shut_down
            || active.generation != generation
            || active.mode.kind() != ModeKind::Follower
        {
            return TimeoutOutcome::Superseded;
        }
        // An RPC restarted the timer after it fired.
        if !self.context.election_timer.is_current(ticket) {
            return TimeoutOutcome::Stale;
        }
        log::info!(
            "{:?} election timer fired at {:?}",
            self.context.me,
            self.context.persistent.current_term()
        );
        self.transition(&mut active, ModeKind::Candidate, None);
        TimeoutOutcome::Transitioned
    }

    /// Run `f` under the manager lock, if `generation` is still current.
    pub fn run_if_active<R>(
        self: &Arc<Self>,
        generation: Generation,
        f: impl FnOnce(&mut ActiveScope) -> R,
    ) -> Option<R> {
        let mut active = self.active.lock();
        if active.shut_down || active.generation != generation {
            return None;
        }
        let mut scope = ActiveScope {
            manager: self,
            active: &mut *active,
        };
        Some(f(&mut scope))
    }

    /// Stop the active processor. No transition happens afterwards.
    pub fn shutdown(&self) {
        let mut active = self.active.lock();
        active.shut_down = true;
        active.mode.processor().stop();
        self.context.election_timer.cancel();
        self.context.volatile.set_leader_id(None);
    }

    fn transition(
        self: &Arc<Self>,
        active: &mut ActiveMode,
        target: ModeKind,
        leader: Option<Peer>,
    ) {
        if active.shut_down {
            return;
        }
        let previous = active.mode.kind();
        active.mode.processor().stop();
        self.context.election_timer.cancel();

        active.generation = Generation(active.generation.0 + 1);
        let leader = match target {
            ModeKind::Leader => Some(self.context.me),
            _ => leader,
        };
        self.context.volatile.set_leader_id(leader);
        active.mode = Mode::create(target, self.context.clone());
        log::info!(
            "{:?} {:?} -> {:?} at {:?}, leader {:?}",
            self.context.me,
            previous,
            target,
            self.context.persistent.current_term(),
            leader
        );
        self.spawn_run_loop(active);
    }

    fn spawn_run_loop(self: &Arc<Self>, active: &ActiveMode) {
        let run_loop = active
            .mode
            .processor()
            .run_loop(self.clone(), active.generation);
        self.context
            .daemon_watch
            .create_daemon(Daemon::RunLoop(active.mode.kind()), run_loop);
    }
}
