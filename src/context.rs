use std::sync::Arc;

use crate::config::RaftConfig;
use crate::daemon_env::DaemonEnv;
use crate::daemon_watch::DaemonWatch;
use crate::election_timer::ElectionTimer;
use crate::persistent_state::PersistentState;
use crate::raft_log::RaftLog;
use crate::rpc_client::RpcClient;
use crate::submission::SubmissionManager;
use crate::volatile_state::VolatileState;
use crate::{Peer, StateMachine};

/// Everything a mode processor or daemon needs, shared by all of them.
#[derive(Clone)]
pub(crate) struct RaftContext {
    pub me: Peer,
    pub config: Arc<RaftConfig>,
    pub log: Arc<RaftLog>,
    pub persistent: Arc<PersistentState>,
    pub volatile: Arc<VolatileState>,
    pub submissions: Arc<SubmissionManager>,
    pub state_machine: Arc<dyn StateMachine>,
    pub election_timer: Arc<ElectionTimer>,
    pub rpc_client: Arc<RpcClient>,
    pub daemon_env: DaemonEnv,
    pub daemon_watch: Arc<DaemonWatch>,
}
