use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Opaque action a timer node carries. Per the reference re-architecture
/// note (§9), the only payload ever used in practice is "close this
/// connection", so the closure is replaced with a tagged variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    CloseConnection(usize),
}

struct TimerNode {
    id: usize,
    expires: Instant,
    action: TimerAction,
}

/// Indexed min-heap of `(id, deadline, action)`, ordered by `expires`.
/// Adapted from the reference server's `HeapTimer` (`heaptimer.h`/.cpp).
pub struct TimerHeap {
    heap: Vec<TimerNode>,
    index_of: HashMap<usize, usize>,
}

impl TimerHeap {
    pub fn new() -> Self {
        TimerHeap {
            heap: Vec::new(),
            index_of: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.index_of.insert(self.heap[i].id, i);
        self.index_of.insert(self.heap[j].id, j);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].expires <= self.heap[i].expires {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    /// Returns `true` if the node at `index` moved.
    fn sift_down(&mut self, index: usize, n: usize) -> bool {
        let mut i = index;
        let mut j = i * 2 + 1;
        while j < n {
            if j + 1 < n && self.heap[j + 1].expires < self.heap[j].expires {
                j += 1;
            }
            if self.heap[i].expires <= self.heap[j].expires {
                break;
            }
            self.swap(i, j);
            i = j;
            j = i * 2 + 1;
        }
        i > index
    }

    /// If `id` is new, push and sift-up. If it already exists, update its
    /// deadline/action, sift-down, and sift-up only if sift-down did not
    /// move it (mirrors `HeapTimer::add`).
    pub fn add(&mut self, id: usize, timeout: Duration, action: TimerAction) {
        let expires = Instant::now() + timeout;
        if let Some(&i) = self.index_of.get(&id) {
            self.heap[i].expires = expires;
            self.heap[i].action = action;
            let n = self.heap.len();
            if !self.sift_down(i, n) {
                self.sift_up(i);
            }
        } else {
            let i = self.heap.len();
            self.index_of.insert(id, i);
            self.heap.push(TimerNode {
                id,
                expires,
                action,
            });
            self.sift_up(i);
        }
    }

    /// Updates `id`'s deadline only, then sift-down. Used on I/O activity to
    /// defer the timeout (§4.3); assumes the new expiry is ≥ the old one but
    /// restores the heap property regardless.
    pub fn adjust(&mut self, id: usize, timeout: Duration) {
        if let Some(&i) = self.index_of.get(&id) {
            self.heap[i].expires = Instant::now() + timeout;
            let n = self.heap.len();
            self.sift_down(i, n);
        }
    }

    /// Removes the node at `index`: swap with the tail, pop, then restore
    /// the heap at the swapped slot (sift-down, else sift-up).
    fn del(&mut self, index: usize) -> TimerNode {
        let last = self.heap.len() - 1;
        if index != last {
            self.swap(index, last);
        }
        self.index_of.remove(&self.heap[last].id);
        let node = self.heap.pop().unwrap();
        if index < self.heap.len() {
            if !self.sift_down(index, self.heap.len()) {
                self.sift_up(index);
            }
        }
        node
    }

    /// Invokes `id`'s action, then removes the node — callback runs before
    /// removal, matching `HeapTimer::doWork`.
    pub fn do_work(&mut self, id: usize) -> Option<TimerAction> {
        let &i = self.index_of.get(&id)?;
        let action = self.heap[i].action;
        self.del(i);
        Some(action)
    }

    /// Removes `id`'s node without invoking its action — used when a
    /// connection is torn down through a path other than timer expiry (a
    /// worker-observed I/O error, a peer hangup) so the stale deadline does
    /// not linger in the heap.
    pub fn remove(&mut self, id: usize) -> bool {
        match self.index_of.get(&id) {
            Some(&i) => {
                self.del(i);
                true
            }
            None => false,
        }
    }

    /// While the root's deadline has passed, invokes its action and pops it,
    /// collecting the fired actions in arrival order.
    pub fn tick(&mut self) -> Vec<TimerAction> {
        let now = Instant::now();
        let mut fired = Vec::new();
        while let Some(node) = self.heap.first() {
            if node.expires > now {
                break;
            }
            fired.push(self.heap[0].action);
            self.del(0);
        }
        fired
    }

    /// Runs `tick`, then returns the time until the new root expires, or
    /// `None` if the heap is empty (no deadline to wait on).
    pub fn get_next_tick(&mut self) -> (Vec<TimerAction>, Option<Duration>) {
        let fired = self.tick();
        let next = self
            .heap
            .first()
            .map(|node| node.expires.saturating_duration_since(Instant::now()));
        (fired, next)
    }

    pub fn pop(&mut self) -> Option<TimerAction> {
        if self.heap.is_empty() {
            return None;
        }
        Some(self.del(0).action)
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.index_of.clear();
    }

    #[cfg(test)]
    fn heap_property_holds(&self) -> bool {
        for i in 0..self.heap.len() {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            if left < self.heap.len() && self.heap[i].expires > self.heap[left].expires {
                return false;
            }
            if right < self.heap.len() && self.heap[i].expires > self.heap[right].expires {
                return false;
            }
        }
        self.index_of.len() == self.heap.len()
            && self
                .index_of
                .iter()
                .all(|(&id, &idx)| self.heap[idx].id == id)
    }
}

impl Default for TimerHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_property_holds_after_interleaved_ops() {
        let mut heap = TimerHeap::new();
        for i in 0..50 {
            heap.add(i, Duration::from_millis((50 - i) as u64), TimerAction::CloseConnection(i));
        }
        assert!(heap.heap_property_holds());
        for i in (0..50).step_by(3) {
            heap.adjust(i, Duration::from_millis(200));
            assert!(heap.heap_property_holds());
        }
        heap.pop();
        assert!(heap.heap_property_holds());
        heap.do_work(10);
        assert!(heap.heap_property_holds());
    }

    #[test]
    fn adjust_defers_expiry_without_reordering_wrongly() {
        let mut heap = TimerHeap::new();
        heap.add(1, Duration::from_millis(5), TimerAction::CloseConnection(1));
        heap.add(2, Duration::from_millis(500), TimerAction::CloseConnection(2));
        heap.adjust(1, Duration::from_millis(1000));
        assert!(heap.heap_property_holds());
        // id 2 now expires sooner than the deferred id 1.
        let fired = heap.pop();
        assert_eq!(fired, Some(TimerAction::CloseConnection(2)));
    }

    #[test]
    fn do_work_invokes_then_removes() {
        let mut heap = TimerHeap::new();
        heap.add(1, Duration::from_secs(10), TimerAction::CloseConnection(1));
        assert_eq!(heap.len(), 1);
        let action = heap.do_work(1);
        assert_eq!(action, Some(TimerAction::CloseConnection(1)));
        assert_eq!(heap.len(), 0);
    }

    #[test]
    fn tick_fires_only_expired_nodes() {
        let mut heap = TimerHeap::new();
        heap.add(1, Duration::from_millis(0), TimerAction::CloseConnection(1));
        heap.add(2, Duration::from_secs(60), TimerAction::CloseConnection(2));
        std::thread::sleep(Duration::from_millis(5));
        let fired = heap.tick();
        assert_eq!(fired, vec![TimerAction::CloseConnection(1)]);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn empty_heap_has_no_next_tick() {
        let mut heap = TimerHeap::new();
        let (fired, next) = heap.get_next_tick();
        assert!(fired.is_empty());
        assert_eq!(next, None);
    }
}
