//! Single-flight coordination of token refreshes
//!
//! Every caller that needs a fresh access token joins the coordinator and
//! receives a one-shot receiver. The first caller to join while idle becomes
//! the leader and is responsible for running the refresh; everyone else waits
//! on the shared outcome. The queue is drained exactly once per refresh.

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Result of one refresh cycle, shared by every waiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The new access token
    Refreshed(String),
    Failed,
}

/// What a caller got when joining the coordinator
#[derive(Debug)]
pub enum Join {
    /// The caller must start the refresh for `epoch`
    Leader {
        epoch: u64,
        rx: oneshot::Receiver<RefreshOutcome>,
    },
    /// A refresh is already in flight
    Follower(oneshot::Receiver<RefreshOutcome>),
}

impl Join {
    #[cfg(test)]
    pub(crate) fn into_receiver(self) -> oneshot::Receiver<RefreshOutcome> {
        match self {
            Join::Leader { rx, .. } => rx,
            Join::Follower(rx) => rx,
        }
    }
}

#[derive(Debug, Default)]
struct CoordinatorState {
    refreshing: bool,
    pending: Vec<oneshot::Sender<RefreshOutcome>>,
    /// Bumped on every reset so a refresh that finishes after a logout is
    /// recognised as stale.
    epoch: u64,
}

/// `IDLE` / `REFRESHING` state machine with an ordered waiter queue
#[derive(Debug, Default)]
pub struct RefreshCoordinator {
    state: Mutex<CoordinatorState>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue the caller. Check-and-set of the refreshing flag happens in
    /// the same critical section as the enqueue.
    pub fn join(&self) -> Join {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        state.pending.push(tx);

        if state.refreshing {
            log::debug!("Refresh in flight, queued waiter #{}", state.pending.len());
            Join::Follower(rx)
        } else {
            state.refreshing = true;
            log::debug!("Starting refresh cycle (epoch {})", state.epoch);
            Join::Leader {
                epoch: state.epoch,
                rx,
            }
        }
    }

    /// Finish the refresh cycle started for `epoch` and drain the queue in
    /// enqueue order. Returns false, without touching anything, when the
    /// coordinator was reset since the cycle started.
    pub fn complete(&self, epoch: u64, outcome: RefreshOutcome) -> bool {
        let pending = {
            let mut state = self.lock();
            if state.epoch != epoch || !state.refreshing {
                return false;
            }
            state.refreshing = false;
            std::mem::take(&mut state.pending)
        };

        Self::notify(pending, outcome);
        true
    }

    /// Fail the cycle started for `epoch`: force `IDLE`, bump the epoch and
    /// hand back the waiters so the caller can clear the session before
    /// notifying them. `None` when the cycle is stale.
    pub fn abort(&self, epoch: u64) -> Option<Vec<oneshot::Sender<RefreshOutcome>>> {
        let mut state = self.lock();
        if state.epoch != epoch || !state.refreshing {
            return None;
        }
        state.refreshing = false;
        state.epoch = state.epoch.wrapping_add(1);
        Some(std::mem::take(&mut state.pending))
    }

    /// Send `outcome` to each waiter, in enqueue order.
    pub fn notify(waiters: Vec<oneshot::Sender<RefreshOutcome>>, outcome: RefreshOutcome) {
        log::debug!("Refresh cycle finished, notifying {} waiter(s)", waiters.len());
        for tx in waiters {
            // A waiter that gave up has dropped its receiver.
            let _ = tx.send(outcome.clone());
        }
    }

    /// Force `IDLE` and discard the queue. Discarded waiters observe a
    /// closed channel.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.epoch = state.epoch.wrapping_add(1);
        state.refreshing = false;
        state.pending.clear();
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().refreshing
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }
}
