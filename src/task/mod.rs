//! Executors: the main dispatch thread and the snapshot worker pool.
//!
//! ## Threading Model
//!
//! Every host-visible notification runs on the dispatch thread owned by
//! [`TaskScheduler`]. The thread drives a current-thread tokio runtime and drains an
//! unbounded channel in submission order, so two jobs never overlap and a job posted
//! after another always observes its effects.
//!
//! Snapshot encoding and file I/O go to [`WorkerPool`], a handful of plain threads
//! sharing one job queue, so slow disks never stall dispatch.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{error, trace, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct LabeledJob {
    name: String,
    job: Job,
}

fn run_guarded(pool: &str, job: LabeledJob) {
    trace!(target: "wms::task", pool, task = %job.name, "running task");
    if catch_unwind(AssertUnwindSafe(job.job)).is_err() {
        error!(target: "wms::task", pool, task = %job.name, "task panicked");
    }
}

pub struct TaskScheduler {
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<LabeledJob>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl TaskScheduler {
    pub fn new(name: &str) -> std::io::Result<Arc<Self>> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<LabeledJob>();
        let pool = name.to_string();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        error!(target: "wms::task", pool = %pool, error = %err, "failed to create dispatch runtime");
                        return;
                    }
                };
                rt.block_on(async move {
                    while let Some(job) = receiver.recv().await {
                        run_guarded(&pool, job);
                    }
                });
            })?;

        Ok(Arc::new(Self {
            name: name.to_string(),
            thread_id: handle.thread().id(),
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(handle)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_current_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Whether the scheduler still accepts tasks.
    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Queues `f` behind everything already posted. Returns `false` after shutdown.
    pub fn post_task(&self, name: &str, f: impl FnOnce() + Send + 'static) -> bool {
        let job = LabeledJob {
            name: name.to_string(),
            job: Box::new(f),
        };
        let sender = self.sender.lock();
        match sender.as_ref().map(|sender| sender.send(job)) {
            Some(Ok(())) => true,
            _ => {
                warn!(target: "wms::task", pool = %self.name, task = name, "scheduler stopped, dropping task");
                false
            }
        }
    }

    /// Spawns `future` on the dispatch runtime once the queue reaches it.
    pub fn post_async_task<F>(&self, name: &str, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.post_task(name, move || {
            tokio::spawn(future);
        })
    }

    /// Runs `f` on the dispatch thread and waits for its result.
    /// Called from the dispatch thread itself, `f` runs inline.
    pub fn post_sync_task<R: Send + 'static>(
        &self,
        name: &str,
        f: impl FnOnce() -> R + Send + 'static,
    ) -> Option<R> {
        if self.is_current_thread() {
            return Some(f());
        }
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        let posted = self.post_task(name, move || {
            let _ = tx.send(f());
        });
        if !posted {
            return None;
        }
        rx.recv().ok()
    }

    /// Blocks until every task posted before this call has run.
    pub fn flush(&self) {
        let _ = self.post_sync_task("flush", || ());
    }

    pub fn shutdown(&self) {
        self.sender.lock().take();
        if self.is_current_thread() {
            return;
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                error!(target: "wms::task", pool = %self.name, "dispatch thread panicked");
            }
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<LabeledJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(name: &str, size: usize) -> std::io::Result<Arc<Self>> {
        let (sender, receiver) = mpsc::unbounded_channel::<LabeledJob>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(size.max(1));
        for idx in 0..size.max(1) {
            let receiver = receiver.clone();
            let pool = name.to_string();
            let handle = std::thread::Builder::new()
                .name(format!("{name}-{idx}"))
                .spawn(move || loop {
                    let job = receiver.lock().blocking_recv();
                    match job {
                        Some(job) => run_guarded(&pool, job),
                        None => break,
                    }
                })?;
            workers.push(handle);
        }
        Ok(Arc::new(Self {
            name: name.to_string(),
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }))
    }

    pub fn submit(&self, name: &str, f: impl FnOnce() + Send + 'static) -> bool {
        let job = LabeledJob {
            name: name.to_string(),
            job: Box::new(f),
        };
        let sender = self.sender.lock();
        match sender.as_ref().map(|sender| sender.send(job)) {
            Some(Ok(())) => true,
            _ => {
                warn!(target: "wms::task", pool = %self.name, task = name, "worker pool stopped, dropping job");
                false
            }
        }
    }

    /// Stops accepting work and waits for queued jobs to finish.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let current = std::thread::current().id();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!(target: "wms::task", pool = %self.name, "worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
