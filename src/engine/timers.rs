//! Per-purpose timer maps keyed by item id.
//!
//! Scheduling a timer for an id aborts the one already pending for it, so
//! at most one timer per purpose and id exists at any time.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use feedplay_core::ItemId;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

struct Pending {
    seq: u64,
    task: JoinHandle<()>,
}

pub(crate) struct TimerSet {
    purpose: &'static str,
    pending: HashMap<ItemId, Pending>,
    next_seq: u64,
}

impl TimerSet {
    pub fn new(purpose: &'static str) -> Self {
        Self {
            purpose,
            pending: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Run `fire(seq)` after `delay`, replacing any timer pending for `id`.
    ///
    /// The callback gets the timer's sequence number so it can tell
    /// [`Self::complete`] which timer finished. Returns `None` without a
    /// tokio runtime.
    pub fn schedule<F, Fut>(&mut self, id: ItemId, delay: Duration, fire: F) -> Option<u64>
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel(&id);
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(purpose = self.purpose, %id, "No async runtime; timer not scheduled");
            return None;
        };

        self.next_seq += 1;
        let seq = self.next_seq;
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            fire(seq).await;
        });
        tracing::trace!(purpose = self.purpose, %id, ?delay, "Timer scheduled");
        self.pending.insert(id, Pending { seq, task });
        Some(seq)
    }

    /// Forget the timer for `id` if `seq` is still the current one.
    /// Returns `false` when the timer was superseded.
    pub fn complete(&mut self, id: &ItemId, seq: u64) -> bool {
        match self.pending.get(id) {
            Some(pending) if pending.seq == seq => {
                self.pending.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self, id: &ItemId) -> bool {
        match self.pending.remove(id) {
            Some(pending) => {
                pending.task.abort();
                tracing::trace!(purpose = self.purpose, %id, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.task.abort();
        }
    }

    #[cfg(test)]
    pub fn is_pending(&self, id: &ItemId) -> bool {
        self.pending
            .get(id)
            .map_or(false, |pending| !pending.task.is_finished())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
