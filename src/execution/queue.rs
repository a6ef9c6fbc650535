//! Branch Queue
//!
//! Hands out pending branches to execution units. A branch is only handed
//! out while none of its non-parallel keys is held by a running branch;
//! units wait for a key to be released otherwise.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::tree::{Branch, StepId};

/// How long a waiting unit sleeps before re-checking the stop flag.
const WAIT_INTERVAL: Duration = Duration::from_millis(50);

struct QueueState<'b> {
    pending: VecDeque<(usize, &'b mut Branch)>,
    /// Keys of running branches, one entry per holder
    held_keys: Vec<StepId>,
}

/// Pending branches of one dispatch, borrowed from the tree.
pub(crate) struct BranchQueue<'b> {
    state: Mutex<QueueState<'b>>,
    released: Condvar,
}

impl<'b> BranchQueue<'b> {
    pub(crate) fn new(pending: VecDeque<(usize, &'b mut Branch)>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending,
                held_keys: Vec::new(),
            }),
            released: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<'b>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the first pending branch whose keys are free.
    ///
    /// Blocks while every pending branch conflicts with a running one.
    /// Returns `None` when nothing is left or `is_stopped` turns true.
    pub(crate) fn take(&self, is_stopped: impl Fn() -> bool) -> Option<(usize, &'b mut Branch)> {
        let mut state = self.lock();
        loop {
            if is_stopped() || state.pending.is_empty() {
                return None;
            }

            let QueueState { pending, held_keys } = &mut *state;
            let eligible = pending.iter().position(|(_, branch)| {
                branch.non_parallel_keys.iter().all(|key| !held_keys.contains(key))
            });

            if let Some((index, branch)) = eligible.and_then(|pos| pending.remove(pos)) {
                held_keys.extend(branch.non_parallel_keys.iter().copied());
                return Some((index, branch));
            }

            state = self
                .released
                .wait_timeout(state, WAIT_INTERVAL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    /// Releases keys taken with a branch and wakes waiting units.
    pub(crate) fn release(&self, keys: &[StepId]) {
        if keys.is_empty() {
            return;
        }
        let mut state = self.lock();
        for key in keys {
            if let Some(pos) = state.held_keys.iter().position(|k| k == key) {
                state.held_keys.swap_remove(pos);
            }
        }
        drop(state);
        self.released.notify_all();
    }

    /// Indices of branches that were never handed out.
    pub(crate) fn into_remaining(self) -> BTreeSet<usize> {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .into_iter()
            .map(|(index, _)| index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Step;

    fn branches(keys: &[&[usize]]) -> Vec<Branch> {
        keys.iter()
            .enumerate()
            .map(|(i, k)| {
                Branch::new(vec![Step::new(format!("B{}", i))])
                    .with_non_parallel_keys(k.iter().map(|id| StepId(*id)).collect())
            })
            .collect()
    }

    fn queue(branches: &mut [Branch]) -> BranchQueue<'_> {
        BranchQueue::new(branches.iter_mut().enumerate().collect())
    }

    #[test]
    fn test_take_in_order() {
        let mut list = branches(&[&[], &[], &[]]);
        let queue = queue(&mut list);

        assert_eq!(queue.take(|| false).map(|(i, _)| i), Some(0));
        assert_eq!(queue.take(|| false).map(|(i, _)| i), Some(1));
        assert_eq!(queue.take(|| false).map(|(i, _)| i), Some(2));
        assert!(queue.take(|| false).is_none());
    }

    #[test]
    fn test_conflicting_branch_is_skipped() {
        let mut list = branches(&[&[7], &[7], &[]]);
        let queue = queue(&mut list);

        assert_eq!(queue.take(|| false).map(|(i, _)| i), Some(0));
        // branch 1 shares key 7 with the running branch 0
        assert_eq!(queue.take(|| false).map(|(i, _)| i), Some(2));

        queue.release(&[StepId(7)]);
        assert_eq!(queue.take(|| false).map(|(i, _)| i), Some(1));
    }

    #[test]
    fn test_stop_ends_waiting() {
        let mut list = branches(&[&[1], &[1]]);
        let queue = queue(&mut list);

        assert!(queue.take(|| false).is_some());
        // only a conflicting branch remains; a stop must not block forever
        assert!(queue.take(|| true).is_none());
        assert_eq!(queue.into_remaining(), [1].into_iter().collect());
    }

    #[test]
    fn test_waiting_unit_wakes_on_release() {
        let mut list = branches(&[&[1], &[1]]);
        let queue = queue(&mut list);
        let (_, first) = queue.take(|| false).unwrap();
        let keys = first.non_parallel_keys.clone();

        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| queue.take(|| false).map(|(i, _)| i));
            std::thread::sleep(Duration::from_millis(20));
            queue.release(&keys);
            assert_eq!(waiter.join().unwrap(), Some(1));
        });
    }
}
