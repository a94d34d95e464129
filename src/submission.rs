use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_channel::oneshot;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;

use crate::{ApplyResult, Index};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("leadership was lost before the command was applied")]
    LeadershipLost,
    #[error("the state machine failed: {0}")]
    StateMachine(#[from] std::io::Error),
    #[error("the Raft instance dropped the command")]
    Dropped,
}

/// The outcome of submitting a command to a Raft instance.
#[derive(Debug)]
pub enum SubmitResult {
    /// The command was accepted. The submission resolves when it is applied.
    Success(Submission),
    /// Another server is the leader. Clients should retry there.
    NotCurrentLeader { host: String, port: u16 },
    /// No leader is known at the moment. Clients should retry later.
    NoKnownLeader,
}

type SubmissionResult = Result<ApplyResult, SubmitError>;

/// A command accepted by the leader, waiting to be applied.
pub struct Submission {
    index: Option<Index>,
    result: BoxFuture<'static, SubmissionResult>,
}

impl Submission {
    fn pending(
        index: Index,
        receiver: oneshot::Receiver<SubmissionResult>,
    ) -> Self {
        Self {
            index: Some(index),
            result: async move {
                receiver.await.unwrap_or(Err(SubmitError::Dropped))
            }
            .boxed(),
        }
    }

    pub(crate) fn direct(
        result: BoxFuture<'static, std::io::Result<ApplyResult>>,
    ) -> Self {
        Self {
            index: None,
            result: result.map(|r| r.map_err(SubmitError::from)).boxed(),
        }
    }

    pub(crate) fn failed(error: SubmitError) -> Self {
        Self {
            index: None,
            result: futures_util::future::ready(Err(error)).boxed(),
        }
    }

    /// The log index of the command. `None` if the command was not logged.
    pub fn index(&self) -> Option<Index> {
        self.index
    }
}

impl Future for Submission {
    type Output = SubmissionResult;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        self.result.poll_unpin(cx)
    }
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submission").field("index", &self.index).finish()
    }
}

/// Submissions of the current leadership, keyed by log index.
#[derive(Default)]
pub(crate) struct SubmissionManager {
    pending: Mutex<PendingSubmissions>,
}

#[derive(Default)]
struct PendingSubmissions {
    senders: BTreeMap<Index, oneshot::Sender<SubmissionResult>>,
    // Set for good once the state machine failed. Nothing is applied after.
    halted: Option<(std::io::ErrorKind, String)>,
}

impl PendingSubmissions {
    fn halt_error(&self) -> Option<SubmitError> {
        self.halted.as_ref().map(|(kind, message)| {
            SubmitError::StateMachine(std::io::Error::new(
                *kind,
                message.clone(),
            ))
        })
    }
}

impl SubmissionManager {
    pub fn create() -> Self {
        Self::default()
    }

    /// Wait for the command at `index` to be applied. If the state machine
    /// already failed, the returned submission fails right away.
    pub fn register(&self, index: Index) -> Submission {
        let (sender, receiver) = oneshot::channel();
        let mut pending = self.pending.lock();
        if let Some(error) = pending.halt_error() {
            let _ = sender.send(Err(error));
        } else {
            let prev = pending.senders.insert(index, sender);
            assert!(prev.is_none(), "Index {} was submitted twice", index);
        }
        Submission::pending(index, receiver)
    }

    /// Resolve the submission at `index`. Returns false if nothing is waiting
    /// at that index, e.g. the entry was created by another leader.
    ///
    /// Submissions must be completed in index order. Completing any index but
    /// the lowest pending one panics.
    pub fn complete_submission(
        &self,
        index: Index,
        result: SubmissionResult,
    ) -> bool {
        let mut pending = self.pending.lock();
        if !pending.senders.contains_key(&index) {
            return false;
        }
        let (lowest, sender) = pending
            .senders
            .pop_first()
            .expect("Pending submissions cannot be empty");
        assert_eq!(
            lowest, index,
            "Submission {} completed before submission {}",
            index, lowest
        );
        // The receiver might have been dropped by the client.
        let _ = sender.send(result);
        true
    }

    /// Fail every pending submission. Returns the number failed.
    pub fn complete_all_with_failure(
        &self,
        error: impl Fn() -> SubmitError,
    ) -> usize {
        let senders = std::mem::take(&mut self.pending.lock().senders);
        let count = senders.len();
        for (_, sender) in senders {
            let _ = sender.send(Err(error()));
        }
        count
    }

    /// The state machine failed with `error`. Fail every pending submission,
    /// and every submission registered from now on. Returns the number failed.
    pub fn halt(&self, error: &std::io::Error) -> usize {
        let senders = {
            let mut pending = self.pending.lock();
            pending.halted = Some((error.kind(), error.to_string()));
            std::mem::take(&mut pending.senders)
        };
        let count = senders.len();
        for (_, sender) in senders {
            let _ = sender.send(Err(SubmitError::StateMachine(
                std::io::Error::new(error.kind(), error.to_string()),
            )));
        }
        count
    }

    /// The error new submissions fail with, if the state machine failed.
    pub fn halt_error(&self) -> Option<SubmitError> {
        self.pending.lock().halt_error()
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().senders.len()
    }
}
