use async_trait::async_trait;

use crate::{
    AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply,
};

/// The transport to one other server of the cluster.
///
/// Implementations deliver the request to the remote instance and return its
/// reply. Any transport failure is reported as an `Err`, and the caller treats
/// it as a missing reply.
#[async_trait]
pub trait RemoteRaft: Send + Sync {
    async fn request_vote(
        &self,
        args: RequestVoteArgs,
    ) -> std::io::Result<RequestVoteReply>;

    async fn append_entries(
        &self,
        args: AppendEntriesArgs,
    ) -> std::io::Result<AppendEntriesReply>;
}

#[async_trait]
impl<R> RemoteRaft for R
where
    R: AsRef<dyn RemoteRaft> + Send + Sync,
{
    async fn request_vote(
        &self,
        args: RequestVoteArgs,
    ) -> std::io::Result<RequestVoteReply> {
        self.as_ref().request_vote(args).await
    }

    async fn append_entries(
        &self,
        args: AppendEntriesArgs,
    ) -> std::io::Result<AppendEntriesReply> {
        self.as_ref().append_entries(args).await
    }
}
