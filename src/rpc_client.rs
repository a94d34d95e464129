use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{abortable, join_all, select, Aborted, Either};

use crate::run_signal::RunSignal;
use crate::utils::retry_rpc;
use crate::{
    AppendEntriesArgs, AppendEntriesReply, Peer, RemoteRaft, RequestVoteArgs,
    RequestVoteReply,
};

pub(crate) struct RemotePeer {
    pub peer: Peer,
    pub rpc_client: Arc<dyn RemoteRaft>,
}

/// One reply received from a peer.
#[derive(Debug)]
pub(crate) struct PeerReply<Reply> {
    pub peer: Peer,
    pub reply: Reply,
}

/// Sends requests to all peers in parallel on the RPC thread pool.
///
/// Both methods block the calling run-loop until every peer replied, failed or
/// timed out. They return `None` if the run-loop is stopped in the meantime,
/// in which case all outstanding requests are abandoned.
pub(crate) struct RpcClient {
    me: Peer,
    peers: Vec<RemotePeer>,
    thread_pool: tokio::runtime::Handle,
}

const REQUEST_VOTE_RETRY: usize = 1;
const APPEND_ENTRIES_RETRY: usize = 1;

impl RpcClient {
    pub fn create(
        me: Peer,
        peers: Vec<RemotePeer>,
        thread_pool: tokio::runtime::Handle,
    ) -> Self {
        Self {
            me,
            peers,
            thread_pool,
        }
    }

    pub fn request_votes(
        &self,
        args: RequestVoteArgs,
        deadline: Duration,
        signal: &RunSignal,
    ) -> Option<Vec<PeerReply<RequestVoteReply>>> {
        let calls = self
            .peers
            .iter()
            .map(|remote| {
                let rpc_client = remote.rpc_client.clone();
                let args = args.clone();
                let call = retry_rpc(REQUEST_VOTE_RETRY, deadline, move |_| {
                    let rpc_client = rpc_client.clone();
                    let args = args.clone();
                    async move { rpc_client.request_vote(args).await }
                });
                (remote.peer, call)
            })
            .collect();
        self.broadcast(calls, signal)
    }

    /// Send one request to each peer listed in `requests`.
    pub fn append_entries(
        &self,
        requests: Vec<(Peer, AppendEntriesArgs)>,
        deadline: Duration,
        signal: &RunSignal,
    ) -> Option<Vec<PeerReply<AppendEntriesReply>>> {
        let mut calls = Vec::with_capacity(requests.len());
        for (peer, args) in requests {
            let rpc_client = match self.find_peer(peer) {
                Some(rpc_client) => rpc_client,
                None => {
                    log::error!(
                        "{:?} has no connection to {:?}",
                        self.me,
                        peer
                    );
                    continue;
                }
            };
            let call = retry_rpc(APPEND_ENTRIES_RETRY, deadline, move |_| {
                let rpc_client = rpc_client.clone();
                let args = args.clone();
                async move { rpc_client.append_entries(args).await }
            });
            calls.push((peer, call));
        }
        self.broadcast(calls, signal)
    }

    fn find_peer(&self, peer: Peer) -> Option<Arc<dyn RemoteRaft>> {
        self.peers
            .iter()
            .find(|remote| remote.peer == peer)
            .map(|remote| remote.rpc_client.clone())
    }

    fn broadcast<Reply, Fut>(
        &self,
        calls: Vec<(Peer, Fut)>,
        signal: &RunSignal,
    ) -> Option<Vec<PeerReply<Reply>>>
    where
        Reply: Send + 'static,
        Fut: Future<Output = std::io::Result<Reply>> + Send + 'static,
    {
        let mut abort_handles = Vec::with_capacity(calls.len());
        let mut tasks = Vec::with_capacity(calls.len());
        for (peer, call) in calls {
            let (call, abort_handle) = abortable(call);
            abort_handles.push(abort_handle);
            // RPCs are started right away.
            tasks.push(
                self.thread_pool.spawn(async move { (peer, call.await) }),
            );
        }

        let signal = signal.clone();
        let results = self.thread_pool.block_on(async move {
            let stopped = Box::pin(signal.stopped());
            match select(stopped, join_all(tasks)).await {
                Either::Left(_) => None,
                Either::Right((results, _)) => Some(results),
            }
        });
        let results = match results {
            Some(results) => results,
            None => {
                for abort_handle in abort_handles {
                    abort_handle.abort();
                }
                return None;
            }
        };

        let mut replies = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok((peer, Ok(Ok(reply)))) => {
                    replies.push(PeerReply { peer, reply })
                }
                Ok((peer, Ok(Err(e)))) => {
                    log::debug!("{:?} RPC to {:?} failed: {}", self.me, peer, e)
                }
                Ok((peer, Err(Aborted))) => {
                    log::debug!("{:?} RPC to {:?} aborted", self.me, peer)
                }
                Err(e) => log::warn!("{:?} RPC task failed: {}", self.me, e),
            }
        }
        Some(replies)
    }
}
