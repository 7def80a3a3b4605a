//! Bounded progress event buffer between batch workers and the caller.
//!
//! Workers push events and never wait on the consumer. When the buffer is
//! full the oldest event is dropped; the newest one always carries the
//! current `completed` count, so nothing the caller needs is lost.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Maximum events retained before oldest entries are dropped.
pub const DEFAULT_CAPACITY: usize = 64;

/// One finished batch item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    /// The item that just finished.
    pub current: PathBuf,
}

struct State {
    events: VecDeque<Progress>,
    completed: usize,
}

/// Thread-safe, bounded, drop-oldest event buffer.
pub struct ProgressQueue {
    state: Mutex<State>,
    ready: Condvar,
    capacity: usize,
}

impl ProgressQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                events: VecDeque::with_capacity(capacity.max(1)),
                completed: 0,
            }),
            ready: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    // A worker that panicked mid-push leaves a consistent deque behind.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue an event, dropping the oldest one if the buffer is full.
    pub fn push(&self, event: Progress) {
        let mut state = self.lock();
        Self::enqueue(&mut state, self.capacity, event);
        drop(state);
        self.ready.notify_one();
    }

    /// Count one more finished item and enqueue the matching event.
    ///
    /// Counting and enqueueing happen under one lock, so events leave the
    /// queue with strictly increasing `completed` values.
    pub fn complete(&self, total: usize, current: PathBuf) {
        let mut state = self.lock();
        state.completed += 1;
        let event = Progress {
            completed: state.completed,
            total,
            current,
        };
        Self::enqueue(&mut state, self.capacity, event);
        drop(state);
        self.ready.notify_one();
    }

    fn enqueue(state: &mut State, capacity: usize, event: Progress) {
        if state.events.len() >= capacity {
            state.events.pop_front();
        }
        state.events.push_back(event);
    }

    /// Wait up to `timeout` for the next event.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Progress> {
        let state = self.lock();
        let (mut state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| s.events.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        state.events.pop_front()
    }

    /// Drain all pending events, returning them in FIFO order.
    pub fn drain(&self) -> Vec<Progress> {
        self.lock().events.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }
}

impl Default for ProgressQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn ev(n: usize) -> Progress {
        Progress {
            completed: n,
            total: 10,
            current: PathBuf::from(format!("item{n}")),
        }
    }

    #[test]
    fn push_and_drain_in_order() {
        let q = ProgressQueue::new(8);
        q.push(ev(1));
        q.push(ev(2));
        let events = q.drain();
        assert_eq!(events, vec![ev(1), ev(2)]);
        assert!(q.is_empty());
    }

    #[test]
    fn full_queue_drops_oldest() {
        let q = ProgressQueue::new(2);
        q.push(ev(1));
        q.push(ev(2));
        q.push(ev(3));
        assert_eq!(q.drain(), vec![ev(2), ev(3)]);
    }

    #[test]
    fn completions_are_counted_in_order() {
        let q = Arc::new(ProgressQueue::new(4));
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let q = Arc::clone(&q);
                thread::spawn(move || q.complete(8, PathBuf::from(format!("item{i}"))))
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        let counts: Vec<usize> = q.drain().iter().map(|p| p.completed).collect();
        assert_eq!(counts, vec![5, 6, 7, 8]);
    }

    #[test]
    fn pop_times_out_when_empty() {
        let q = ProgressQueue::new(2);
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn pop_wakes_on_push_from_other_thread() {
        let q = Arc::new(ProgressQueue::new(2));
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.push(ev(5)))
        };
        let got = q.pop_timeout(Duration::from_secs(5));
        producer.join().unwrap();
        assert_eq!(got, Some(ev(5)));
    }
}
