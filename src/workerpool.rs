use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    not_empty: Condvar,
    closed: Mutex<bool>,
}

/// Fixed-size pool of threads draining a FIFO task queue, adapted from the
/// reference server's `ThreadPool` (`threadpool.h`). Unbounded queue;
/// admission control happens at the Reactor via `MAX_FD`.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(thread_count: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            closed: Mutex::new(false),
        });
        let workers = (0..thread_count.max(1))
            .map(|i| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("worker-{i}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        WorkerPool { shared, workers }
    }

    /// Pushes under the queue mutex and signals one waiting worker.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.queue.lock().unwrap().push_back(Box::new(task));
        self.shared.not_empty.notify_one();
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let mut queue = shared.queue.lock().unwrap();
        loop {
            if let Some(task) = queue.pop_front() {
                drop(queue);
                task();
                break;
            }
            if *shared.closed.lock().unwrap() {
                return;
            }
            queue = shared.not_empty.wait(queue).unwrap();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        *self.shared.closed.lock().unwrap() = true;
        self.shared.not_empty.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn submitted_tasks_all_run() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = counter.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn tasks_are_actually_executed_off_the_submitting_thread() {
        let pool = WorkerPool::new(2);
        let (tx, rx) = mpsc::channel();
        pool.submit(move || {
            tx.send(std::thread::current().name().map(|s| s.to_string())).unwrap();
        });
        let name = rx.recv().unwrap();
        assert!(name.unwrap().starts_with("worker-"));
    }
}
