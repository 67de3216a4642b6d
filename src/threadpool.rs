//! Fixed-size worker pool whose `exec_async` hands back a future-like
//! handle immediately; work is executed in whatever order workers pick it
//! up, and ordering guarantees (if any are needed) are the caller's
//! responsibility — see [`crate::sequencer`], which consumes these handles
//! strictly in submission order regardless of completion order.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A handle to a value that is being computed on a worker thread. Blocking
/// `recv()` on `get()` is how a consumer waits for the result; an already
/// finished job returns immediately.
pub struct TaskHandle<T> {
    rx: Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Block until the job completes and return its result. Panics if the
    /// worker thread panicked while running the job — callers that need
    /// partial-failure tolerance should have the job itself return a
    /// `Result`.
    pub fn get(self) -> T {
        self.rx
            .recv()
            .expect("worker thread dropped its result sender without sending")
    }
}

struct Shared {
    queue: Mutex<std::collections::VecDeque<Job>>,
    cond: Condvar,
    exiting: Mutex<bool>,
}

/// A pool of OS threads pulling jobs off a shared FIFO queue.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(num_threads: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(std::collections::VecDeque::new()),
            cond: Condvar::new(),
            exiting: Mutex::new(false),
        });
        let workers = (0..num_threads.max(1))
            .map(|idx| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("render-worker-{idx}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn render worker thread")
            })
            .collect();
        ThreadPool { shared, workers }
    }

    /// Default sizing when the caller has no explicit preference: picks a
    /// pool size from the host's CPU count.
    pub fn default_sized() -> Self {
        ThreadPool::new(num_cpus::get().max(1))
    }

    /// Submit a job, returning a handle that resolves once it runs. Jobs
    /// are started in the order workers happen to pick them up, not the
    /// order they were submitted in — callers needing submission order must
    /// serialize on the handles themselves (see `BufferedWriteSequencer`).
    pub fn exec_async<F, T>(&self, job: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx): (Sender<T>, Receiver<T>) = mpsc::channel();
        let wrapped: Job = Box::new(move || {
            let result = job();
            let _ = tx.send(result);
        });
        {
            let mut q = self.shared.queue.lock().unwrap();
            q.push_back(wrapped);
        }
        self.shared.cond.notify_one();
        TaskHandle { rx }
    }

    /// Drop any work that has not yet started; jobs already running finish
    /// normally. Does not join worker threads.
    pub fn cancel_all_pending(&self) {
        let mut q = self.shared.queue.lock().unwrap();
        q.clear();
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        *self.shared.exiting.lock().unwrap() = true;
        self.shared.cond.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut q = shared.queue.lock().unwrap();
            loop {
                if *shared.exiting.lock().unwrap() {
                    break None;
                }
                if let Some(job) = q.pop_front() {
                    break Some(job);
                }
                q = shared.cond.wait(q).unwrap();
            }
        };
        match job {
            Some(job) => job(),
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_submitted_job_and_returns_value() {
        let pool = ThreadPool::new(2);
        let handle = pool.exec_async(|| 1 + 1);
        assert_eq!(handle.get(), 2);
    }

    #[test]
    fn drop_discards_queued_work_instead_of_draining_it() {
        let shared = Arc::new(Shared {
            queue: Mutex::new(std::collections::VecDeque::new()),
            cond: Condvar::new(),
            exiting: Mutex::new(false),
        });
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let mut q = shared.queue.lock().unwrap();
            for _ in 0..5 {
                let ran = Arc::clone(&ran);
                let job: Job = Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                });
                q.push_back(job);
            }
        }
        *shared.exiting.lock().unwrap() = true;
        shared.cond.notify_all();
        worker_loop(shared);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn runs_many_jobs_concurrently() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.exec_async(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.get();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }
}
