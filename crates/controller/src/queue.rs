//! Key-based work queue with dedup and per-item exponential backoff.
//!
//! Semantics, per key:
//!
//! - a key already pending is not added again (a notification burst for one
//!   resource costs at most one pending reconciliation);
//! - a key added while it is being processed is parked and re-queued when the
//!   processor calls [`WorkQueue::done`], so a key is never handed to two
//!   workers at once;
//! - [`WorkQueue::add_rate_limited`] re-queues a key after an exponentially
//!   growing delay, tracked per key until [`WorkQueue::forget`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

/// A concurrent queue of carrier keys awaiting reconciliation.
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<State>,
    wakers: Notify,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    retries: HashMap<String, u32>,
    shut_down: bool,
}

impl WorkQueue {
    /// Returns a new queue with the given backoff schedule.
    pub fn new(retry_base_delay: Duration, retry_max_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            wakers: Notify::new(),
            retry_base_delay,
            retry_max_delay,
        })
    }

    /// Enqueues a key unless it is already pending or the queue is shut down.
    pub fn add(&self, key: &str) {
        let mut state = self.lock();
        if state.shut_down || state.dirty.contains(key) {
            return;
        }
        state.dirty.insert(key.to_owned());
        if !state.processing.contains(key) {
            state.queue.push_back(key.to_owned());
            drop(state);
            self.wakers.notify_one();
        }
    }

    /// Dequeues the next key, waiting for one to arrive.
    ///
    /// Returns `None` once the queue is shut down; the caller should end its
    /// worker loop. Every returned key must be balanced with a call to
    /// [`WorkQueue::done`].
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.wakers.notified();
            {
                let mut state = self.lock();
                if state.shut_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        // Pass the wakeup on so sibling workers drain the rest.
                        self.wakers.notify_one();
                    }
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Marks processing of a key finished, re-queueing it if it was added
    /// again in the meantime.
    pub fn done(&self, key: &str) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shut_down {
            state.queue.push_back(key.to_owned());
            drop(state);
            self.wakers.notify_one();
        }
    }

    /// Re-enqueues a key after its per-key backoff delay, growing the delay
    /// exponentially on each call until [`WorkQueue::forget`].
    pub fn add_rate_limited(self: &Arc<Self>, key: &str) {
        let delay = {
            let mut state = self.lock();
            if state.shut_down {
                return;
            }
            let attempts = state.retries.entry(key.to_owned()).or_insert(0);
            let delay = backoff(self.retry_base_delay, self.retry_max_delay, *attempts);
            *attempts += 1;
            delay
        };

        let queue = Arc::clone(self);
        let key = key.to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key);
        });
    }

    /// Returns how many times the key has been rate-limited re-enqueued.
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.lock().retries.get(key).copied().unwrap_or(0)
    }

    /// Clears the key's retry counter.
    pub fn forget(&self, key: &str) {
        self.lock().retries.remove(key);
    }

    /// Stops accepting work and wakes every waiting worker.
    pub fn shut_down(&self) {
        self.lock().shut_down = true;
        self.wakers.notify_waiters();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("work queue lock poisoned")
    }
}

fn backoff(base: Duration, max: Duration, attempts: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempts)).min(max)
}
