use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::daemon_env::DaemonEnv;
use crate::mode::ModeKind;

#[derive(Clone, Copy, Debug)]
pub(crate) enum Daemon {
    ApplyCommand,
    RunLoop(ModeKind),
}

/// A guard for daemons.
///
/// [`DaemonWatch`] owns every thread started by a Raft instance and makes sure
/// that panics are recorded during shutdown. Run-loops come and go with mode
/// transitions, so finished threads are reaped whenever a new one is created.
pub(crate) struct DaemonWatch {
    daemons: Mutex<Vec<(Daemon, JoinHandle<()>)>>,
    daemon_env: DaemonEnv,
}

impl DaemonWatch {
    pub fn create(daemon_env: DaemonEnv) -> Self {
        Self {
            daemons: Mutex::new(vec![]),
            daemon_env,
        }
    }

    /// Start a daemon thread and keep its handle until it is joined.
    pub fn create_daemon<F>(&self, daemon: Daemon, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let thread = std::thread::Builder::new()
            .name(format!("raft-daemon-{:?}", daemon))
            .spawn(func)
            .expect("Creating daemon thread should never fail");

        let finished = {
            let mut daemons = self.daemons.lock();
            let (finished, running): (Vec<_>, Vec<_>) =
                daemons.drain(..).partition(|(_, h)| h.is_finished());
            *daemons = running;
            daemons.push((daemon, thread));
            finished
        };
        self.join_all(finished);
    }

    /// Join all daemons, including those created while waiting.
    pub fn wait_for_daemons(&self) {
        loop {
            let daemons = std::mem::take(&mut *self.daemons.lock());
            if daemons.is_empty() {
                break;
            }
            self.join_all(daemons);
        }
    }

    fn join_all(&self, daemons: Vec<(Daemon, JoinHandle<()>)>) {
        for (daemon, join_handle) in daemons {
            if let Some(err) = join_handle.join().err() {
                let err_str = err.downcast_ref::<&str>().map(|s| s.to_owned());
                let err_string =
                    err.downcast_ref::<String>().map(|s| s.as_str());
                let err =
                    err_str.or(err_string).unwrap_or("unknown panic error");
                self.daemon_env.record_panic(daemon, err);
            }
        }
    }
}
