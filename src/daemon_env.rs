use std::sync::Arc;

use parking_lot::Mutex;

use crate::daemon_watch::Daemon;
use crate::{Index, Term};

/// Records an error if `$condition` does not hold. Recorded errors fail the
/// instance when it is joined.
macro_rules! check_or_record {
    ($daemon_env:expr, $condition:expr, $component:expr, $error_kind:expr, $message:expr) => {
        if !$condition {
            $daemon_env.record_error(
                $component,
                $error_kind,
                $message,
                concat!(file!(), ":", line!()),
            )
        }
    };
}
pub(crate) use check_or_record;

/// Collects errors and daemon panics of one Raft instance.
///
/// Invariant violations that must not bring down the whole process right away
/// are recorded here. `shutdown()` reports everything that was recorded, and
/// panics if anything went wrong.
#[derive(Clone, Debug, Default)]
pub(crate) struct DaemonEnv {
    data: Arc<Mutex<DaemonEnvData>>,
}

#[derive(Debug, Default)]
struct DaemonEnvData {
    errors: Vec<Error>,
    daemon_panics: Vec<(Daemon, String)>,
}

#[derive(Debug)]
pub(crate) struct Error {
    component: Component,
    error_kind: ErrorKind,
    message: String,
    file_line: &'static str,
}

#[derive(Debug)]
pub(crate) enum ErrorKind {
    /// An entry at or before the commit index was removed from the log.
    RollbackCommitted(Index),
    /// Entries in an AppendEntries request do not follow `prev_log_index`.
    NonConsecutiveEntries(Index),
    /// A committed entry that should carry a command does not.
    MissingCommand(Index),
    /// The state machine failed to apply the entry at the index.
    ApplyFailed(Index),
    /// Another leader was seen in the term this instance leads.
    SecondLeaderInTerm(Term),
}

#[derive(Debug)]
pub(crate) enum Component {
    // Daemon threads.
    ApplyCommand,
    // RPC handlers
    AppendEntries,
}

impl DaemonEnv {
    pub fn create() -> Self {
        Self::default()
    }

    pub fn record_error<S: AsRef<str>>(
        &self,
        component: Component,
        error_kind: ErrorKind,
        message: S,
        file_line: &'static str,
    ) {
        let message = message.as_ref();
        log::error!(
            "{:?} {:?} at {}: {}",
            component,
            error_kind,
            file_line,
            message
        );
        self.data.lock().errors.push(Error {
            component,
            error_kind,
            message: message.into(),
            file_line,
        })
    }

    pub fn record_panic(&self, daemon: Daemon, message: &str) {
        log::error!("Daemon {:?} panicked: {}", daemon, message);
        self.data
            .lock()
            .daemon_panics
            .push((daemon, message.to_owned()));
    }

    #[cfg(test)]
    pub fn has_errors(&self) -> bool {
        let data = self.data.lock();
        !data.errors.is_empty() || !data.daemon_panics.is_empty()
    }

    pub fn shutdown(self) {
        let data = std::mem::take(&mut *self.data.lock());
        let daemon_panics: Vec<String> = data
            .daemon_panics
            .iter()
            .map(|(daemon, message)| format!("\n{:?}: {}", daemon, message))
            .collect();
        let recorded_errors: Vec<String> = data
            .errors
            .iter()
            .map(|error| format!("\n{:?}", error))
            .collect();
        if !daemon_panics.is_empty() || !recorded_errors.is_empty() {
            let report = format!(
                "\n{} daemon panic(s):{}\n{} error(s):{}\n",
                daemon_panics.len(),
                daemon_panics.join(""),
                recorded_errors.len(),
                recorded_errors.join("")
            );
            // Do not panic again if we are cleaning up panicking threads.
            if std::thread::panicking() {
                eprintln!("{}", report)
            } else {
                panic!("{}", report)
            }
        }
    }
}
