use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use rand::{thread_rng, Rng};

use raft_kv_core::storage::InMemoryStorage;
use raft_kv_core::{
    AppendEntriesArgs, AppendEntriesReply, ApplyResult, Command, Index,
    LogCommand, Peer, Raft, RaftConfig, RemoteRaft, RequestVoteArgs,
    RequestVoteReply, ServerAddress, StateMachine, SubmitResult, Submission,
};

pub const BASE_PORT: u16 = 7000;
pub const ELECTION_TIMEOUT_MIN_MILLIS: u64 = 150;
pub const ELECTION_TIMEOUT_MAX_MILLIS: u64 = 300;

struct NetworkState {
    rafts: Vec<Option<Raft>>,
    connected: Vec<bool>,
    unreliable: bool,
    rpc_count: usize,
}

type Network = Arc<Mutex<NetworkState>>;

/// Delivers requests from one server to another, if both are connected.
struct NetworkPeer {
    network: Network,
    from: usize,
    to: usize,
}

impl NetworkPeer {
    fn error(kind: std::io::ErrorKind, msg: &str) -> std::io::Error {
        std::io::Error::new(kind, msg.to_owned())
    }

    fn target(&self) -> std::io::Result<Raft> {
        let mut network = self.network.lock();
        network.rpc_count += 1;
        if !network.connected[self.from] || !network.connected[self.to] {
            return Err(Self::error(
                std::io::ErrorKind::NotConnected,
                "disconnected",
            ));
        }
        if network.unreliable && thread_rng().gen_ratio(1, 10) {
            return Err(Self::error(
                std::io::ErrorKind::TimedOut,
                "request dropped",
            ));
        }
        network.rafts[self.to].clone().ok_or_else(|| {
            Self::error(std::io::ErrorKind::ConnectionRefused, "server down")
        })
    }

    // The reply is lost if either side went away while the request was being
    // processed.
    fn check_reply<R>(&self, reply: R) -> std::io::Result<R> {
        let network = self.network.lock();
        if !network.connected[self.from] || !network.connected[self.to] {
            return Err(Self::error(
                std::io::ErrorKind::NotConnected,
                "disconnected",
            ));
        }
        if network.unreliable && thread_rng().gen_ratio(1, 10) {
            return Err(Self::error(
                std::io::ErrorKind::TimedOut,
                "reply dropped",
            ));
        }
        Ok(reply)
    }

    async fn delay(&self) {
        let unreliable = self.network.lock().unreliable;
        if unreliable {
            let millis = thread_rng().gen_range(0..27);
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
}

#[async_trait]
impl RemoteRaft for NetworkPeer {
    async fn request_vote(
        &self,
        args: RequestVoteArgs,
    ) -> std::io::Result<RequestVoteReply> {
        self.delay().await;
        let raft = self.target()?;
        let reply = raft.process_request_vote(args);
        self.check_reply(reply)
    }

    async fn append_entries(
        &self,
        args: AppendEntriesArgs,
    ) -> std::io::Result<AppendEntriesReply> {
        self.delay().await;
        let raft = self.target()?;
        let reply = raft.process_append_entries(args);
        self.check_reply(reply)
    }
}

struct LogState {
    /// Commands applied by each server, the command at index `i` is stored at
    /// position `i - 1`.
    committed_logs: Vec<Vec<LogCommand>>,
    results: Vec<Result<()>>,
}

/// A key-value store that also records every command it applied.
struct KvStateMachine {
    server: usize,
    store: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    log: Arc<Mutex<LogState>>,
}

impl KvStateMachine {
    fn record(&self, command: &LogCommand) {
        let mut log_state = self.log.lock();
        let index = log_state.committed_logs[self.server].len() + 1;
        let mut err = None;
        for (other, other_log) in log_state.committed_logs.iter().enumerate() {
            if let Some(other_command) = other_log.get(index - 1) {
                if other_command != command {
                    err = Some(anyhow!(
                        "commit index={} server={} {:?} != server={} {:?}",
                        index,
                        self.server,
                        command,
                        other,
                        other_command,
                    ));
                    break;
                }
            }
        }
        log_state.committed_logs[self.server].push(command.clone());
        if let Some(err) = err {
            log_state.results[self.server] = Err(err);
        }
    }
}

impl StateMachine for KvStateMachine {
    fn apply(&self, command: &LogCommand) -> std::io::Result<ApplyResult> {
        self.record(command);
        let mut store = self.store.lock();
        match command {
            LogCommand::Set { key, value } => {
                store.insert(key.clone(), value.clone());
            }
            LogCommand::Delete { key } => {
                store.remove(key);
            }
        }
        Ok(ApplyResult::Done)
    }

    fn submit_direct(
        &self,
        command: Command,
    ) -> BoxFuture<'static, std::io::Result<ApplyResult>> {
        let result = match command {
            Command::Get { key } => {
                Ok(ApplyResult::Value(self.store.lock().get(&key).cloned()))
            }
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "only reads can be executed directly",
            )),
        };
        futures::future::ready(result).boxed()
    }
}

pub struct Config {
    server_count: usize,
    network: Network,
    storages: Vec<InMemoryStorage>,
    log: Arc<Mutex<LogState>>,
}

impl Config {
    pub fn begin<S: std::fmt::Display>(&self, msg: S) {
        eprintln!("{}", msg);
    }

    pub fn raft_config(server_count: usize, me: usize) -> RaftConfig {
        let servers: BTreeMap<Peer, ServerAddress> = (0..server_count)
            .map(|i| {
                (
                    Peer(i),
                    ServerAddress::new("localhost", BASE_PORT + i as u16),
                )
            })
            .collect();
        RaftConfig::new(Peer(me), servers).with_election_timeout(
            Duration::from_millis(ELECTION_TIMEOUT_MIN_MILLIS),
            Duration::from_millis(ELECTION_TIMEOUT_MAX_MILLIS),
        )
    }

    fn connected_raft(&self, index: usize) -> Option<Raft> {
        let network = self.network.lock();
        if network.connected[index] {
            network.rafts[index].clone()
        } else {
            None
        }
    }

    pub fn raft(&self, index: usize) -> Option<Raft> {
        self.network.lock().rafts[index].clone()
    }

    pub fn check_one_leader(&self) -> Result<usize> {
        for _ in 0..10 {
            let millis = 450 + thread_rng().gen_range(0..100);
            sleep_millis(millis);

            let mut leaders: HashMap<usize, Vec<usize>> = HashMap::new();
            for i in 0..self.server_count {
                if let Some(raft) = self.connected_raft(i) {
                    let (term, is_leader) = raft.get_state();
                    if is_leader {
                        leaders.entry(term.0).or_default().push(i)
                    }
                }
            }

            let mut last_term_with_leader = 0;
            let mut last_leader = 0;
            for (term, leaders) in leaders {
                if leaders.len() > 1 {
                    bail!("term {} has {} (>1) leaders", term, leaders.len());
                }
                if term > last_term_with_leader {
                    last_term_with_leader = term;
                    last_leader = leaders[0];
                }
            }

            if last_term_with_leader != 0 {
                return Ok(last_leader);
            }
        }
        Err(anyhow!("expected one leader, got none"))
    }

    pub fn check_no_leader(&self) -> Result<()> {
        for i in 0..self.server_count {
            if let Some(raft) = self.connected_raft(i) {
                if raft.get_state().1 {
                    bail!("expected no leader, but {} claims to be leader", i);
                }
            }
        }
        Ok(())
    }

    pub fn check_terms(&self) -> Result<Option<usize>> {
        let mut term = None;
        for i in 0..self.server_count {
            if let Some(raft) = self.connected_raft(i) {
                let raft_term = raft.get_state().0;
                if let Some(term) = term {
                    if term != raft_term {
                        bail!("Servers disagree on term")
                    }
                } else {
                    term.replace(raft_term);
                }
            }
        }
        Ok(term.map(|term| term.0))
    }

    /// Returns the number of servers that applied the command at `index`, as
    /// well as the command.
    pub fn committed_count(
        &self,
        index: Index,
    ) -> Result<(usize, Option<LogCommand>)> {
        let log = self.log.lock();
        let mut count = 0;
        let mut cmd: Option<LogCommand> = None;
        for i in 0..self.server_count {
            if let Err(e) = &log.results[i] {
                bail!(e.to_string())
            }
            if let Some(command) = log.committed_logs[i].get(index - 1) {
                if let Some(cmd) = &cmd {
                    if cmd != command {
                        bail!(
                            "committed values do not match: \
                             index {}, {:?}, {:?}",
                            index,
                            cmd,
                            command
                        )
                    }
                }
                count += 1;
                cmd = Some(command.clone());
            }
        }
        Ok((count, cmd))
    }

    /// Wait for at least `min_count` servers to apply the entry at `index`.
    /// Gives up early if any server moved past `at_term`.
    pub fn wait(
        &self,
        index: Index,
        min_count: usize,
        at_term: Option<usize>,
    ) -> Result<Option<LogCommand>> {
        let mut sleep_time_mills = 10;
        for _ in 0..30 {
            let (count, _) = self.committed_count(index)?;
            if count >= min_count {
                break;
            }
            sleep_millis(sleep_time_mills);
            if sleep_time_mills < 1000 {
                sleep_time_mills <<= 1;
            }

            if let Some(at_term) = at_term {
                for i in 0..self.server_count {
                    if let Some(raft) = self.raft(i) {
                        if raft.get_state().0 .0 > at_term {
                            return Ok(None);
                        }
                    }
                }
            }
        }

        let (count, cmd) = self.committed_count(index)?;
        if count < min_count {
            bail!(
                "only {} decided for index {}; wanted {}",
                count,
                index,
                min_count
            )
        }
        Ok(cmd)
    }

    /// Submit `cmd` to whichever server accepts it, and wait until at least
    /// `expected_servers` have applied it. Returns the index of the command.
    pub fn one(
        &self,
        cmd: LogCommand,
        expected_servers: usize,
        retry: bool,
    ) -> Result<Index> {
        let start = Instant::now();
        let mut cnt = 0;
        while start.elapsed() < Duration::from_secs(10) {
            let mut first_index = None;
            for _ in 0..self.server_count {
                cnt += 1;
                cnt %= self.server_count;
                if let Some(raft) = self.connected_raft(cnt) {
                    if let SubmitResult::Success(submission) =
                        raft.submit_command(cmd.clone().into())
                    {
                        first_index = submission.index();
                        break;
                    }
                }
            }

            if let Some(index) = first_index {
                let agreement_start = Instant::now();
                while agreement_start.elapsed() < Duration::from_secs(2) {
                    let (commit_count, committed_command) =
                        self.committed_count(index)?;
                    if commit_count > 0
                        && commit_count >= expected_servers
                        && committed_command.as_ref() == Some(&cmd)
                    {
                        return Ok(index);
                    }
                    sleep_millis(20);
                }
                if !retry {
                    break;
                }
            } else {
                sleep_millis(50);
            }
        }
        Err(anyhow!("one({:?}) failed to reach agreement", cmd))
    }

    /// Submit a command to one server, regardless of whether it is connected.
    pub fn submit(
        &self,
        index: usize,
        command: Command,
    ) -> Option<SubmitResult> {
        self.raft(index).map(|raft| raft.submit_command(command))
    }

    /// Submit a command to a server that is supposed to be the leader.
    pub fn leader_submit(
        &self,
        leader: usize,
        command: LogCommand,
    ) -> Option<Submission> {
        match self.submit(leader, command.into()) {
            Some(SubmitResult::Success(submission)) => Some(submission),
            _ => None,
        }
    }

    pub fn connect(&self, index: usize) {
        self.network.lock().connected[index] = true;
    }

    pub fn disconnect(&self, index: usize) {
        self.network.lock().connected[index] = false;
    }

    pub fn set_unreliable(&self, yes: bool) {
        self.network.lock().unreliable = yes;
    }

    pub fn total_rpcs(&self) -> usize {
        self.network.lock().rpc_count
    }

    /// Number of log entries `index` has persisted.
    pub fn persisted_log_len(&self, index: usize) -> usize {
        self.storages[index].log_len()
    }

    /// Kill a server. Its persisted state is kept for the next `start()`.
    pub fn crash(&self, index: usize) {
        self.disconnect(index);
        let raft = self.network.lock().rafts[index].take();
        if let Some(raft) = raft {
            raft.kill().join();
        }
    }

    /// Start a server on its persisted state, with an empty key-value store.
    pub fn start(&self, index: usize) -> Result<()> {
        self.crash(index);

        {
            let mut log = self.log.lock();
            log.committed_logs[index].clear();
            log.results[index] = Ok(());
        }

        let peers: Vec<(Peer, NetworkPeer)> = (0..self.server_count)
            .filter(|j| *j != index)
            .map(|j| {
                let peer = NetworkPeer {
                    network: self.network.clone(),
                    from: index,
                    to: j,
                };
                (Peer(j), peer)
            })
            .collect();
        let state_machine = Arc::new(KvStateMachine {
            server: index,
            store: Mutex::new(HashMap::new()),
            log: self.log.clone(),
        });
        let raft = Raft::new(
            Self::raft_config(self.server_count, index),
            peers,
            Arc::new(self.storages[index].clone()),
            state_machine,
        )?;
        self.network.lock().rafts[index].replace(raft);
        Ok(())
    }

    pub fn end(&self) {}

    pub fn cleanup(&self) {
        let rafts: Vec<Raft> = {
            let mut network = self.network.lock();
            network.connected.iter_mut().for_each(|c| *c = false);
            network.rafts.iter_mut().filter_map(|r| r.take()).collect()
        };
        let handles: Vec<_> =
            rafts.into_iter().map(|raft| raft.kill()).collect();
        for handle in handles {
            handle.join();
        }
    }
}

pub fn make_config(server_count: usize, unreliable: bool) -> Config {
    test_utils::init_test_log!();

    let network = Arc::new(Mutex::new(NetworkState {
        rafts: vec![None; server_count],
        connected: vec![true; server_count],
        unreliable,
        rpc_count: 0,
    }));
    let mut log = LogState {
        committed_logs: vec![vec![]; server_count],
        results: vec![],
    };
    log.results.resize_with(server_count, || Ok(()));
    let cfg = Config {
        server_count,
        network,
        storages: (0..server_count)
            .map(|_| InMemoryStorage::create())
            .collect(),
        log: Arc::new(Mutex::new(log)),
    };

    for i in 0..server_count {
        cfg.start(i).expect("Starting server should not fail");
        cfg.connect(i);
    }

    cfg
}

pub fn sleep_millis(mills: u64) {
    std::thread::sleep(Duration::from_millis(mills))
}

const LONG_ELECTION_TIMEOUT_MILLIS: u64 = 1000;
pub fn sleep_election_timeouts(count: u64) {
    sleep_millis(LONG_ELECTION_TIMEOUT_MILLIS * count)
}

/// A distinct command for each number, for tests that submit many.
pub fn command(n: usize) -> LogCommand {
    LogCommand::Set {
        key: format!("key-{}", n % 7).into_bytes(),
        value: format!("value-{}", n).into_bytes(),
    }
}
