use futures_util::future::BoxFuture;
use serde_derive::{Deserialize, Serialize};

use crate::{Command, LogCommand};

/// What the state machine returns for a command.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ApplyResult {
    /// A write was applied.
    Done,
    /// The value read by a `Get`, if the key exists.
    Value(Option<Vec<u8>>),
}

/// The key-value store that committed commands are applied to.
pub trait StateMachine: Send + Sync + 'static {
    /// Apply one committed command. Commands are applied one at a time, in
    /// log order. An error is fatal to the Raft instance.
    fn apply(&self, command: &LogCommand) -> std::io::Result<ApplyResult>;

    /// Execute a command that does not go through the log, e.g. a read.
    fn submit_direct(
        &self,
        command: Command,
    ) -> BoxFuture<'static, std::io::Result<ApplyResult>>;
}
