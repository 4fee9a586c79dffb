use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{WsError, WsResult};
use crate::task::TaskScheduler;
use crate::types::PersistentId;

pub const DEFAULT_QUEUE_CAPACITY: usize = 15;
pub const DEFAULT_TASK_EXPIRY: Duration = Duration::from_millis(350);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeCycleTaskKind {
    Start,
    Stop,
    Other,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct LifeCycleTask {
    seq: u64,
    name: String,
    kind: LifeCycleTaskKind,
    job: Option<Job>,
    started_at: Option<Instant>,
}

struct QueueState {
    tasks: VecDeque<LifeCycleTask>,
    next_seq: u64,
}

struct Inner {
    persistent_id: PersistentId,
    capacity: usize,
    expiry: Duration,
    scheduler: Option<Arc<TaskScheduler>>,
    state: Mutex<QueueState>,
}

/// Ordered per-session queue of lifecycle work.
///
/// At most one task runs at a time; the next one starts when it returns. A front task
/// that has been running for longer than the expiry is dropped the next time work is
/// posted, so a wedged task cannot stall the session forever.
#[derive(Clone)]
pub struct LifeCycleQueue {
    inner: Arc<Inner>,
}

/// Snapshot of a queued task, for dumps and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    pub name: String,
    pub kind: LifeCycleTaskKind,
    pub running: bool,
}

impl LifeCycleQueue {
    pub fn new(
        persistent_id: PersistentId,
        capacity: usize,
        expiry: Duration,
        scheduler: Option<Arc<TaskScheduler>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                persistent_id,
                capacity: capacity.max(1),
                expiry,
                scheduler,
                state: Mutex::new(QueueState {
                    tasks: VecDeque::new(),
                    next_seq: 0,
                }),
            }),
        }
    }

    pub fn post(
        &self,
        name: &str,
        kind: LifeCycleTaskKind,
        job: impl FnOnce() + Send + 'static,
    ) -> WsResult<()> {
        let id = self.inner.persistent_id;
        if self
            .inner
            .scheduler
            .as_ref()
            .is_some_and(|scheduler| !scheduler.is_running())
        {
            error!(target: "wms::life", persistent_id = id, task = name, "dispatch stopped, rejecting lifecycle task");
            return Err(WsError::IpcFailed);
        }
        {
            let mut state = self.inner.state.lock();
            let expired = state
                .tasks
                .front()
                .and_then(|task| task.started_at)
                .is_some_and(|started| started.elapsed() > self.inner.expiry);
            if expired {
                if let Some(task) = state.tasks.pop_front() {
                    error!(target: "wms::life", persistent_id = id, task = %task.name, "removing expired lifecycle task");
                }
            }
            if state.tasks.len() >= self.inner.capacity {
                error!(target: "wms::life", persistent_id = id, task = name, "lifecycle queue is full");
                return Err(WsError::QueueFull(id));
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.tasks.push_back(LifeCycleTask {
                seq,
                name: name.to_string(),
                kind,
                job: Some(Box::new(job)),
                started_at: None,
            });
            info!(target: "wms::life", persistent_id = id, task = name, ?kind, "lifecycle task queued");
        }
        self.start_front();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending(&self) -> Vec<QueuedTask> {
        self.inner
            .state
            .lock()
            .tasks
            .iter()
            .map(|task| QueuedTask {
                name: task.name.clone(),
                kind: task.kind,
                running: task.started_at.is_some(),
            })
            .collect()
    }

    fn start_front(&self) {
        let (seq, name, job) = {
            let mut state = self.inner.state.lock();
            let Some(front) = state.tasks.front_mut() else {
                return;
            };
            if front.started_at.is_some() {
                return;
            }
            front.started_at = Some(Instant::now());
            let Some(job) = front.job.take() else {
                return;
            };
            (front.seq, front.name.clone(), job)
        };
        debug!(target: "wms::life", persistent_id = self.inner.persistent_id, task = %name, "executing lifecycle task");

        let queue = self.clone();
        let run = move || {
            job();
            queue.complete(seq);
        };
        match &self.inner.scheduler {
            Some(scheduler) => {
                if !scheduler.post_task(&name, run) {
                    warn!(target: "wms::life", persistent_id = self.inner.persistent_id, task = %name, "dispatch stopped, lifecycle task dropped");
                    self.complete(seq);
                }
            }
            None => run(),
        }
    }

    fn complete(&self, seq: u64) {
        {
            let mut state = self.inner.state.lock();
            match state.tasks.front() {
                Some(front) if front.seq == seq => {
                    state.tasks.pop_front();
                }
                _ => {
                    warn!(target: "wms::life", persistent_id = self.inner.persistent_id, "completed lifecycle task was no longer at the front");
                    return;
                }
            }
        }
        self.start_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn inline_tasks_run_in_order() {
        let queue = LifeCycleQueue::new(1, 4, DEFAULT_TASK_EXPIRY, None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for idx in 0..3 {
            let seen = seen.clone();
            queue
                .post("push", LifeCycleTaskKind::Other, move || seen.lock().push(idx))
                .expect("post");
        }
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn nested_post_waits_for_running_task() {
        let queue = LifeCycleQueue::new(1, 4, DEFAULT_TASK_EXPIRY, None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inner_queue = queue.clone();
        let outer_seen = seen.clone();
        queue
            .post("outer", LifeCycleTaskKind::Start, move || {
                let nested_seen = outer_seen.clone();
                inner_queue
                    .post("inner", LifeCycleTaskKind::Other, move || {
                        nested_seen.lock().push("inner")
                    })
                    .expect("post inner");
                outer_seen.lock().push("outer");
            })
            .expect("post outer");
        assert_eq!(*seen.lock(), vec!["outer", "inner"]);
    }

    #[test]
    fn full_queue_rejects_new_tasks() {
        let scheduler = TaskScheduler::new("test-lifecycle-full").expect("scheduler");
        let queue = LifeCycleQueue::new(9, 3, Duration::from_secs(60), Some(scheduler.clone()));
        let (release, hold) = mpsc::channel::<()>();

        queue
            .post("hold", LifeCycleTaskKind::Start, move || {
                let _ = hold.recv();
            })
            .expect("hold");
        queue.post("a", LifeCycleTaskKind::Other, || ()).expect("a");
        queue.post("b", LifeCycleTaskKind::Other, || ()).expect("b");
        assert_eq!(
            queue.post("c", LifeCycleTaskKind::Other, || ()),
            Err(WsError::QueueFull(9))
        );

        release.send(()).expect("release");
        // Each completion posts its successor, so drain one hop at a time.
        for _ in 0..8 {
            scheduler.flush();
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn expired_front_task_is_dropped() {
        let scheduler = TaskScheduler::new("test-lifecycle-expiry").expect("scheduler");
        let queue = LifeCycleQueue::new(2, 4, Duration::ZERO, Some(scheduler.clone()));
        let (release, hold) = mpsc::channel::<()>();
        let ran = Arc::new(Mutex::new(Vec::new()));

        queue
            .post("wedged", LifeCycleTaskKind::Start, move || {
                let _ = hold.recv();
            })
            .expect("wedged");
        std::thread::sleep(Duration::from_millis(5));
        let after = ran.clone();
        queue
            .post("after", LifeCycleTaskKind::Other, move || after.lock().push("after"))
            .expect("after");
        assert_eq!(
            queue.pending(),
            vec![QueuedTask {
                name: "after".into(),
                kind: LifeCycleTaskKind::Other,
                running: true,
            }]
        );

        release.send(()).expect("release");
        scheduler.flush();
        assert_eq!(*ran.lock(), vec!["after"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn stopped_dispatch_rejects_tasks() {
        let scheduler = TaskScheduler::new("test-lifecycle-stopped").expect("scheduler");
        let queue = LifeCycleQueue::new(4, 3, Duration::from_secs(60), Some(scheduler.clone()));
        scheduler.shutdown();
        assert_eq!(
            queue.post("late", LifeCycleTaskKind::Start, || ()),
            Err(WsError::IpcFailed)
        );
        assert!(queue.is_empty());
    }
}
