use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Bounded FIFO queue shared between a producer and a single consumer thread.
///
/// `push_back` blocks while the queue is at capacity; `pop` blocks while the
/// queue is empty. `close` wakes every waiter and makes both operations
/// return immediately afterwards — mirrors `BlockDeque<T>::Close` in the
/// reference logger's `blockqueue.h`.
pub struct BlockQueue<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

struct State<T> {
    deque: VecDeque<T>,
    closed: bool,
}

impl<T> BlockQueue<T> {
    pub fn new(capacity: usize) -> Self {
        BlockQueue {
            capacity: capacity.max(1),
            state: Mutex::new(State {
                deque: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Blocks while full. Returns `false` if the queue was closed instead of
    /// accepting the item.
    pub fn push_back(&self, item: T) -> bool {
        let mut state = self.state.lock().unwrap();
        while state.deque.len() >= self.capacity && !state.closed {
            state = self.not_full.wait(state).unwrap();
        }
        if state.closed {
            return false;
        }
        state.deque.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        true
    }

    /// Non-blocking: pushes only if there is room, otherwise hands `item`
    /// back so the caller can fall back to a synchronous write instead of
    /// stalling on a full queue.
    pub fn try_push_back(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock().unwrap();
        if state.closed || state.deque.len() >= self.capacity {
            return Err(item);
        }
        state.deque.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks until an item is available or the queue is closed.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        while state.deque.is_empty() && !state.closed {
            state = self.not_empty.wait(state).unwrap();
        }
        let item = state.deque.pop_front();
        drop(state);
        self.not_full.notify_one();
        item
    }

    /// Like `pop` but gives up after `timeout`, matching the reference's
    /// timed variant used by callers that must not block forever.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        while state.deque.is_empty() && !state.closed {
            let (guard, result) = self.not_empty.wait_timeout(state, timeout).unwrap();
            state = guard;
            if result.timed_out() && state.deque.is_empty() {
                return None;
            }
        }
        let item = state.deque.pop_front();
        drop(state);
        self.not_full.notify_one();
        item
    }

    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().deque.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_pop_preserves_order() {
        let q = BlockQueue::new(4);
        q.push_back(1);
        q.push_back(2);
        q.push_back(3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn pop_returns_none_after_close_when_empty() {
        let q: BlockQueue<i32> = BlockQueue::new(2);
        q.close();
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn push_back_rejected_after_close() {
        let q = BlockQueue::new(2);
        q.close();
        assert!(!q.push_back(7));
    }

    #[test]
    fn try_push_back_fails_without_blocking_when_full() {
        let q = BlockQueue::new(2);
        assert!(q.try_push_back(1).is_ok());
        assert!(q.try_push_back(2).is_ok());
        assert_eq!(q.try_push_back(3), Err(3));
    }

    #[test]
    fn try_push_back_fails_after_close() {
        let q = BlockQueue::new(2);
        q.close();
        assert_eq!(q.try_push_back(7), Err(7));
    }

    #[test]
    fn consumer_thread_drains_concurrently_pushed_items() {
        let q = Arc::new(BlockQueue::new(2));
        let q2 = q.clone();
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            while let Some(v) = q2.pop() {
                seen.push(v);
            }
            seen
        });
        for i in 0..10 {
            q.push_back(i);
        }
        q.close();
        let seen = handle.join().unwrap();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }
}
