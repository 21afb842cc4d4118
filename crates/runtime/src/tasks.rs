//! Fixed-size worker pool for specialization builds.
//!
//! Jobs run to completion; there is no cancellation. The shutdown barrier
//! waits for the queue to drain so no worker touches runtime state during
//! teardown.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct PendingJobs {
    count: Mutex<usize>,
    drained: Condvar,
}

pub struct TaskSystem {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    pending: Arc<PendingJobs>,
}

impl TaskSystem {
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (sender, receiver) = unbounded::<Job>();
        let pending = Arc::new(PendingJobs::default());

        debug!(workers = threads, "starting specialization worker pool");
        let workers = (0..threads)
            .map(|n| {
                let receiver = receiver.clone();
                let pending = pending.clone();
                std::thread::Builder::new()
                    .name(format!("ostinato-w{n}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                            let mut count = pending.count.lock();
                            *count -= 1;
                            if *count == 0 {
                                pending.drained.notify_all();
                            }
                        }
                    })
                    .expect("spawning a worker thread")
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
            pending,
        }
    }

    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let Some(sender) = &self.sender else {
            debug!("task submitted after shutdown; dropping");
            return;
        };
        *self.pending.count.lock() += 1;
        if sender.send(Box::new(job)).is_err() {
            *self.pending.count.lock() -= 1;
        }
    }

    /// Block until every submitted job has finished.
    pub fn wait(&self) {
        let mut count = self.pending.count.lock();
        while *count > 0 {
            self.pending.drained.wait(&mut count);
        }
    }

    pub fn shutdown(&mut self) {
        self.wait();
        self.sender = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for TaskSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_every_job() {
        let pool = TaskSystem::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..32 {
            let counter = counter.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn wait_without_jobs_returns() {
        let pool = TaskSystem::new(2);
        pool.wait();
    }

    #[test]
    fn shutdown_drains() {
        let mut pool = TaskSystem::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = counter.clone();
            pool.submit(move || {
                std::thread::sleep(std::time::Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }
}
