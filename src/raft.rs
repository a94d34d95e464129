use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_derive::{Deserialize, Serialize};

use crate::apply_command::run_apply_command_daemon;
use crate::daemon_env::DaemonEnv;
use crate::daemon_watch::{Daemon, DaemonWatch};
use crate::election_timer::ElectionTimer;
use crate::log_array::LogArray;
use crate::mode::ModeKind;
use crate::mode_manager::ModeManager;
use crate::persistent_state::PersistentState;
use crate::raft_log::RaftLog;
use crate::rpc_client::{RemotePeer, RpcClient};
use crate::storage::SharedStorage;
use crate::submission::SubmissionManager;
use crate::volatile_state::VolatileState;
use crate::{
    AppendEntriesArgs, AppendEntriesReply, Command, ConfigError, Index,
    RaftConfig, RaftContext, RemoteRaft, RequestVoteArgs, RequestVoteReply,
    StateMachine, SubmitResult, ValidationError,
};

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct Term(pub usize);

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct Peer(pub usize);

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to start: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored log is corrupted: {0:?}")]
    InvalidLog(ValidationError),
}

/// One server of the replicated key-value store.
///
/// A Raft instance is a follower, a candidate or the leader of the cluster.
/// Requests from other servers are fed in through `process_request_vote()` and
/// `process_append_entries()`. Commands from clients are fed in through
/// `submit_command()`. Committed commands are applied to the state machine in
/// log order.
#[derive(Clone)]
pub struct Raft {
    pub(crate) context: RaftContext,
    pub(crate) manager: Arc<ModeManager>,
    pub(crate) keep_running: Arc<AtomicBool>,
    pub(crate) runtime: Arc<Mutex<Option<tokio::runtime::Runtime>>>,
}

impl Raft {
    /// Create a new raft instance and start it as a follower.
    ///
    /// `peers` must hold exactly one connection to every server in the config
    /// other than this one. The persisted term, vote and log are restored from
    /// `storage`.
    ///
    /// Each instance creates one thread for applying commands, one thread for
    /// the run-loop of the current mode, and a thread pool for RPCs.
    pub fn new<R: RemoteRaft + 'static>(
        config: RaftConfig,
        peers: Vec<(Peer, R)>,
        storage: SharedStorage,
        state_machine: Arc<dyn StateMachine>,
    ) -> Result<Self, StartError> {
        config.validate()?;
        config.validate_peers(peers.iter().map(|(peer, _)| peer))?;
        let me = config.me;

        let stored = storage.read_state()?;
        let log = LogArray::restore(stored.log, stored.current_term)
            .map_err(StartError::InvalidLog)?;
        log::info!(
            "{:?} restored {:?} with vote {:?} and {} log entries",
            me,
            stored.current_term,
            stored.voted_for,
            log.end() - 1
        );
        let persistent = PersistentState::create(
            stored.current_term,
            stored.voted_for,
            storage.clone(),
        );

        let thread_pool = tokio::runtime::Builder::new_multi_thread()
            .enable_time()
            .thread_name(format!("raft-instance-{}", me.0))
            .worker_threads(peers.len().max(1))
            .build()?;
        let peers = peers
            .into_iter()
            .map(|(peer, remote)| RemotePeer {
                peer,
                rpc_client: Arc::new(remote) as Arc<dyn RemoteRaft>,
            })
            .collect();
        let rpc_client =
            RpcClient::create(me, peers, thread_pool.handle().clone());

        let config = Arc::new(config);
        let daemon_env = DaemonEnv::create();
        let daemon_watch = Arc::new(DaemonWatch::create(daemon_env.clone()));
        let context = RaftContext {
            me,
            election_timer: Arc::new(ElectionTimer::create(config.clone())),
            config,
            log: Arc::new(RaftLog::create(log, storage)),
            persistent: Arc::new(persistent),
            volatile: Arc::new(VolatileState::create()),
            submissions: Arc::new(SubmissionManager::create()),
            state_machine,
            rpc_client: Arc::new(rpc_client),
            daemon_env,
            daemon_watch,
        };
        let keep_running = Arc::new(AtomicBool::new(true));

        context.daemon_watch.create_daemon(
            Daemon::ApplyCommand,
            run_apply_command_daemon(context.clone(), keep_running.clone()),
        );
        let manager = ModeManager::create(context.clone());
        // The last step is to start the follower and its election timer.
        manager.start();

        Ok(Raft {
            context,
            manager,
            keep_running,
            runtime: Arc::new(Mutex::new(Some(thread_pool))),
        })
    }

    pub fn process_request_vote(
        &self,
        args: RequestVoteArgs,
    ) -> RequestVoteReply {
        self.manager.process_request_vote(args)
    }

    pub fn process_append_entries(
        &self,
        args: AppendEntriesArgs,
    ) -> AppendEntriesReply {
        self.manager.process_append_entries(args)
    }

    /// Submit a command from a client.
    ///
    /// On the leader, `Set` and `Delete` are appended to the log and the
    /// returned submission resolves once the command is applied, or fails when
    /// leadership is lost first. `Get` is executed by the state machine
    /// directly. Any other server tells where the leader is, if it knows.
    pub fn submit_command(&self, command: Command) -> SubmitResult {
        self.manager.submit_command(command)
    }

    /// Returns the current term and whether we are the leader.
    ///
    /// Take a quick peek at the current state of this instance. The returned
    /// value is stale as soon as this function returns.
    pub fn get_state(&self) -> (Term, bool) {
        let is_leader = self.manager.mode_kind() == ModeKind::Leader;
        (self.context.persistent.current_term(), is_leader)
    }

    pub fn commit_index(&self) -> Index {
        self.context.volatile.commit_index()
    }

    pub fn last_applied(&self) -> Index {
        self.context.volatile.last_applied()
    }

    /// The leader this instance knows of, possibly itself.
    pub fn leader(&self) -> Option<Peer> {
        self.context.volatile.leader_id()
    }

    pub fn me(&self) -> Peer {
        self.context.me
    }

    /// Cleanly shutdown this instance. This function never blocks forever. It
    /// either panics or returns eventually.
    pub fn kill(self) -> RaftJoinHandle {
        self.keep_running.store(false, Ordering::Release);
        self.manager.shutdown();
        self.context.volatile.wake_applier();

        let runtime = self
            .runtime
            .lock()
            .take()
            .expect("A Raft instance can only be killed once");
        RaftJoinHandle {
            runtime,
            daemon_watch: self.context.daemon_watch.clone(),
            daemon_env: self.context.daemon_env.clone(),
        }
    }
}

/// A join handle returned by `Raft::kill()`. Join this handle to cleanly
/// shutdown a Raft instance.
///
/// After `RaftJoinHandle::join()` returns, all threads and thread pools created
/// by this Raft instance will have stopped. No commands will be applied and no
/// RPCs will be sent by this Raft instance.
#[must_use]
pub struct RaftJoinHandle {
    runtime: tokio::runtime::Runtime,
    daemon_watch: Arc<DaemonWatch>,
    daemon_env: DaemonEnv,
}

impl RaftJoinHandle {
    const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(200);

    /// Wait for all threads to stop. Panics if any invariant was violated or
    /// any thread panicked during the lifetime of the instance.
    pub fn join(self) {
        self.daemon_watch.wait_for_daemons();
        self.runtime.shutdown_timeout(Self::SHUTDOWN_TIMEOUT);
        // DaemonEnv must be shutdown after the thread pool, since there might
        // be tasks logging errors in the pool.
        self.daemon_env.shutdown();
    }
}
