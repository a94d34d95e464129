use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::daemon_env::{check_or_record, Component, ErrorKind};
use crate::{Index, LogEntry, RaftContext};

const APPLY_WAIT: Duration = Duration::from_millis(50);

/// The body of the applier daemon.
///
/// Committed entries are applied to the state machine strictly in log order,
/// one at a time and outside of every lock. If this instance is the leader,
/// the submission waiting at each applied index is completed with the result.
///
/// Applying stops for good if an entry cannot be applied. The failure is
/// recorded and reported when the instance is joined.
pub(crate) fn run_apply_command_daemon(
    context: RaftContext,
    keep_running: Arc<AtomicBool>,
) -> impl FnOnce() + Send + 'static {
    move || {
        while keep_running.load(Ordering::Acquire) {
            let last_applied = context.volatile.last_applied();
            if !context.volatile.wait_for_commit(last_applied, APPLY_WAIT) {
                continue;
            }
            let commit_index = context.volatile.commit_index();
            let entries = context.log.read(|log| {
                let start = last_applied + 1;
                let end = (commit_index + 1).min(log.end()).max(start);
                log.between(start, end).to_vec()
            });
            for entry in entries {
                if !apply_one(&context, entry) {
                    return;
                }
            }
        }
    }
}

fn apply_one(context: &RaftContext, entry: LogEntry) -> bool {
    let index: Index = entry.index;
    let command = match entry.command() {
        Some(command) => command,
        None => {
            check_or_record!(
                context.daemon_env,
                false,
                Component::ApplyCommand,
                ErrorKind::MissingCommand(index),
                "Committed entry has no command"
            );
            return false;
        }
    };

    match context.state_machine.apply(command) {
        Ok(result) => {
            context.volatile.set_last_applied(index);
            if context.volatile.leader_id() == Some(context.me) {
                context.submissions.complete_submission(index, Ok(result));
            }
            true
        }
        Err(e) => {
            check_or_record!(
                context.daemon_env,
                false,
                Component::ApplyCommand,
                ErrorKind::ApplyFailed(index),
                format!("State machine failed: {}", e)
            );
            let failed = context.submissions.halt(&e);
            log::error!(
                "{:?} stopped applying at {}, {} submission(s) failed",
                context.me,
                index,
                failed
            );
            false
        }
    }
}
