use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::{Index, Peer};

/// State that is rebuilt from scratch after a restart.
pub(crate) struct VolatileState {
    commit_index: AtomicUsize,
    last_applied: AtomicUsize,
    leader_id: Mutex<Option<Peer>>,
    // Wakes up the applier when the commit index moves forward.
    apply_mutex: Mutex<()>,
    apply_signal: Condvar,
}

impl VolatileState {
    pub fn create() -> Self {
        Self {
            commit_index: AtomicUsize::new(0),
            last_applied: AtomicUsize::new(0),
            leader_id: Mutex::new(None),
            apply_mutex: Mutex::new(()),
            apply_signal: Condvar::new(),
        }
    }

    pub fn commit_index(&self) -> Index {
        self.commit_index.load(Ordering::Acquire)
    }

    /// Move the commit index forward to `index`. The commit index never goes
    /// backwards. Returns true if it moved.
    pub fn advance_commit_index(&self, index: Index) -> bool {
        let prev = self.commit_index.fetch_max(index, Ordering::AcqRel);
        if prev < index {
            let _guard = self.apply_mutex.lock();
            self.apply_signal.notify_one();
            true
        } else {
            false
        }
    }

    pub fn last_applied(&self) -> Index {
        self.last_applied.load(Ordering::Acquire)
    }

    pub fn set_last_applied(&self, index: Index) {
        assert!(
            index <= self.commit_index(),
            "Applied index {} is ahead of commit index {}",
            index,
            self.commit_index()
        );
        self.last_applied.store(index, Ordering::Release);
    }

    pub fn leader_id(&self) -> Option<Peer> {
        *self.leader_id.lock()
    }

    pub fn set_leader_id(&self, leader_id: Option<Peer>) {
        *self.leader_id.lock() = leader_id;
    }

    /// Block until the commit index is past `last_applied`, or `timeout`
    /// passes. Returns true if there is something to apply.
    pub fn wait_for_commit(
        &self,
        last_applied: Index,
        timeout: Duration,
    ) -> bool {
        let mut guard = self.apply_mutex.lock();
        if self.commit_index() > last_applied {
            return true;
        }
        self.apply_signal.wait_for(&mut guard, timeout);
        self.commit_index() > last_applied
    }

    /// Wake up the applier, e.g. on shutdown.
    pub fn wake_applier(&self) {
        let _guard = self.apply_mutex.lock();
        self.apply_signal.notify_all();
    }
}
