use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tokio::sync::watch;

/// Why `RunSignal::sleep_until()` returned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Wakeup {
    Stopped,
    Nudged,
    TimedOut,
}

/// The stop switch of one run-loop.
///
/// A run-loop sleeps on the signal between rounds and checks it before doing
/// anything observable. A nudge cuts the current sleep short once. Async RPC
/// fan-outs wait on `stopped()` so that they can be abandoned on stop.
#[derive(Clone)]
pub(crate) struct RunSignal(Arc<RunSignalInner>);

struct RunSignalInner {
    state: Mutex<SignalState>,
    condvar: Condvar,
    stopped_sender: watch::Sender<bool>,
    stopped_receiver: watch::Receiver<bool>,
}

#[derive(Default)]
struct SignalState {
    stopped: bool,
    nudged: bool,
}

impl RunSignal {
    pub fn create() -> Self {
        let (stopped_sender, stopped_receiver) = watch::channel(false);
        Self(Arc::new(RunSignalInner {
            state: Mutex::new(SignalState::default()),
            condvar: Condvar::new(),
            stopped_sender,
            stopped_receiver,
        }))
    }

    pub fn stop(&self) {
        let mut state = self.0.state.lock();
        state.stopped = true;
        self.0.condvar.notify_all();
        drop(state);
        let _ = self.0.stopped_sender.send(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.state.lock().stopped
    }

    /// Wake up the run-loop if it is sleeping, or make its next sleep return
    /// immediately.
    pub fn nudge(&self) {
        let mut state = self.0.state.lock();
        state.nudged = true;
        self.0.condvar.notify_all();
    }

    pub fn sleep_until(&self, deadline: Instant) -> Wakeup {
        let mut state = self.0.state.lock();
        loop {
            if state.stopped {
                return Wakeup::Stopped;
            }
            if state.nudged {
                state.nudged = false;
                return Wakeup::Nudged;
            }
            if self.0.condvar.wait_until(&mut state, deadline).timed_out() {
                return if state.stopped {
                    Wakeup::Stopped
                } else {
                    Wakeup::TimedOut
                };
            }
        }
    }

    /// Resolves once `stop()` is called.
    pub async fn stopped(&self) {
        let mut receiver = self.0.stopped_receiver.clone();
        loop {
            let stopped = *receiver.borrow();
            if stopped {
                return;
            }
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}
