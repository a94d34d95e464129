use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::RaftConfig;
use crate::run_signal::RunSignal;

/// Identifies one arming of the election timer. Every `restart()` or
/// `cancel()` invalidates all tickets handed out before.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct TimerTicket(u64);

#[derive(Debug, Eq, PartialEq)]
pub(crate) enum TimerEvent {
    Expired(TimerTicket),
    Stopped,
}

/// The randomized election timer of a follower.
///
/// Expiry is single-shot: once the deadline passes and a waiter observes it,
/// the timer is disarmed until it is restarted.
pub(crate) struct ElectionTimer {
    // Deadline is removed on expiry, cancel or shutdown.
    state: Mutex<TimerState>,
    // Wakes up the waiter when the timer is restarted or cancelled.
    signal: Condvar,
    config: Arc<RaftConfig>,
}

struct TimerState {
    ticket: u64,
    deadline: Option<Instant>,
}

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

impl ElectionTimer {
    pub fn create(config: Arc<RaftConfig>) -> Self {
        Self {
            state: Mutex::new(TimerState {
                ticket: 0,
                deadline: None,
            }),
            signal: Condvar::new(),
            config,
        }
    }

    /// Arm the timer with a new random timeout.
    pub fn restart(&self) {
        let timeout = self.config.random_election_timeout();
        let mut state = self.state.lock();
        state.ticket += 1;
        state.deadline.replace(Instant::now() + timeout);
        self.signal.notify_all();
    }

    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.ticket += 1;
        state.deadline.take();
        self.signal.notify_all();
    }

    /// Whether the timer has not been touched since `ticket` was handed out.
    pub fn is_current(&self, ticket: TimerTicket) -> bool {
        self.state.lock().ticket == ticket.0
    }

    /// Block until the armed deadline passes, or until `run_signal` stops.
    ///
    /// Restarting the timer while waiting pushes the deadline back. When the
    /// timer is not armed, the stop signal is polled periodically.
    pub fn wait_for_expiry(&self, run_signal: &RunSignal) -> TimerEvent {
        let mut state = self.state.lock();
        loop {
            if run_signal.is_stopped() {
                return TimerEvent::Stopped;
            }
            match state.deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    state.deadline.take();
                    return TimerEvent::Expired(TimerTicket(state.ticket));
                }
                Some(deadline) => {
                    let wake_up =
                        deadline.min(Instant::now() + IDLE_POLL_INTERVAL);
                    self.signal.wait_until(&mut state, wake_up);
                }
                None => {
                    self.signal.wait_for(&mut state, IDLE_POLL_INTERVAL);
                }
            }
        }
    }
}
