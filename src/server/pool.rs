//! Fixed pool of worker threads executing queued jobs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct State {
    jobs: VecDeque<Job>,
    active: usize,
    stop: bool,
}

struct Shared {
    state: Mutex<State>,
    /// Signalled when a job arrives or the pool is stopping.
    work: Condvar,
    /// Signalled when the last running job finishes and none are queued.
    idle: Condvar,
}

/// A fixed number of long-lived worker threads.
///
/// Jobs run in submission order but complete in any order. Dropping the
/// pool stops the workers after their current job; jobs still queued at
/// that point are discarded.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(size: usize) -> Self {
        let size = if size == 0 { 2 } else { size };
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                jobs: VecDeque::new(),
                active: 0,
                stop: false,
            }),
            work: Condvar::new(),
            idle: Condvar::new(),
        });

        let workers = (0..size)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("worker-{i}"))
                    .spawn(move || worker_loop(&shared))
                    .unwrap_or_else(|e| panic!("failed to spawn worker thread: {e}"))
            })
            .collect();

        Self { shared, workers }
    }

    /// Queues a job for the next free worker.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        state.jobs.push_back(Box::new(job));
        self.shared.work.notify_one();
    }

    /// Blocks until no job is queued and no worker is running one.
    pub fn wait(&self) {
        let mut state = self.shared.state.lock();
        while state.active > 0 || !state.jobs.is_empty() {
            self.shared.idle.wait(&mut state);
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stop = true;
        }
        self.shared.work.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        debug!("worker pool stopped");
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if state.stop {
                    return;
                }
                if let Some(job) = state.jobs.pop_front() {
                    state.active += 1;
                    break job;
                }
                shared.work.wait(&mut state);
            }
        };

        job();

        let mut state = shared.state.lock();
        state.active -= 1;
        if state.active == 0 && state.jobs.is_empty() {
            shared.idle.notify_all();
        }
    }
}
