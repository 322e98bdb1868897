//! Background worker pool
//!
//! Every upload, page write and deferred resolver runs here. Jobs are
//! futures polled by a fixed set of named threads fed from one FIFO queue;
//! a job waiting on another job's address yields its thread instead of
//! blocking it, and is queued again when that address resolves.

use chainstore_common::{Error, Result};
use crossbeam_channel::{Receiver, Sender};
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::task::{ArcWake, waker_ref};
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, info};

/// Unit of blocking background work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Poll(Arc<Job>),
    Stop,
}

struct Job {
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    queue: Sender<Message>,
}

impl ArcWake for Job {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        // the queue only closes once every worker has stopped
        let _ = arc_self.queue.send(Message::Poll(Arc::clone(arc_self)));
    }
}

/// Bounded pool of named worker threads fed by one FIFO queue
pub struct WorkerPool {
    queue: Sender<Message>,
    closed: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
    thread_ids: Vec<ThreadId>,
    completed: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Spawn `workers` threads
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::configuration("worker pool needs at least one thread"));
        }
        let (queue, receiver) = crossbeam_channel::unbounded::<Message>();
        let completed = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::with_capacity(workers);

        for i in 0..workers {
            let receiver = receiver.clone();
            let completed = Arc::clone(&completed);
            let handle = thread::Builder::new()
                .name(format!("chainstore-worker-{i}"))
                .spawn(move || worker_loop(&receiver, &completed))
                .map_err(|e| Error::internal(format!("failed to spawn worker: {e}")))?;
            handles.push(handle);
        }

        let thread_ids = handles.iter().map(|h| h.thread().id()).collect();
        info!("Started worker pool with {} threads", workers);

        Ok(Self {
            queue,
            closed: AtomicBool::new(false),
            handles: Mutex::new(handles),
            thread_ids,
            completed,
        })
    }

    /// Queue a future behind everything already submitted
    pub fn spawn(&self, future: BoxFuture<'static, ()>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::internal("worker pool is shut down"));
        }
        let job = Arc::new(Job {
            future: Mutex::new(Some(future)),
            queue: self.queue.clone(),
        });
        self.queue
            .send(Message::Poll(job))
            .map_err(|_| Error::internal("worker pool queue is closed"))
    }

    /// Queue a blocking task behind everything already submitted
    pub fn submit(&self, task: Task) -> Result<()> {
        self.spawn(async move { task() }.boxed())
    }

    /// Number of worker threads
    pub fn workers(&self) -> usize {
        self.thread_ids.len()
    }

    /// Number of jobs that have finished (including panicked ones)
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// True when called from one of this pool's threads
    pub fn is_worker_thread(&self) -> bool {
        self.thread_ids.contains(&thread::current().id())
    }

    /// Stop accepting jobs, run what is queued and join the workers
    ///
    /// Jobs still waiting on an address when their turn comes are dropped.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for _ in 0..self.workers() {
            let _ = self.queue.send(Message::Stop);
        }
        // a worker cannot join itself
        if self.is_worker_thread() {
            return;
        }
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
        info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: &Receiver<Message>, completed: &AtomicU64) {
    debug!("Worker thread started");
    while let Ok(Message::Poll(job)) = receiver.recv() {
        // held across the poll so a concurrent wake waits for this poll
        let mut slot = job.future.lock();
        let Some(mut future) = slot.take() else {
            continue;
        };
        let waker = waker_ref(&job);
        let mut cx = Context::from_waker(&waker);
        match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) => *slot = Some(future),
            Ok(Poll::Ready(())) => {
                completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                error!("Background job panicked");
                completed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    debug!("Worker thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::oneshot;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_tasks_run_in_submission_order() {
        let pool = WorkerPool::new(1).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..16 {
            let tx = tx.clone();
            pool.submit(Box::new(move || tx.send(i).unwrap())).unwrap();
        }
        let seen: Vec<i32> = (0..16).map(|_| rx.recv().unwrap()).collect();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_worker_threads_are_named() {
        let pool = WorkerPool::new(2).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.submit(Box::new(move || {
            let name = thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        }))
        .unwrap();
        let name = rx.recv().unwrap().unwrap();
        assert!(name.starts_with("chainstore-worker-"));
    }

    #[test]
    fn test_waiting_job_yields_its_thread() {
        // one thread: the first job waits on a value only the second produces
        let pool = WorkerPool::new(1).unwrap();
        let (value_tx, value_rx) = oneshot::channel::<u32>();
        let (done_tx, done_rx) = mpsc::channel();

        pool.spawn(
            async move {
                let value = value_rx.await.unwrap();
                done_tx.send(value).unwrap();
            }
            .boxed(),
        )
        .unwrap();
        pool.submit(Box::new(move || value_tx.send(11).unwrap())).unwrap();

        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 11);
    }

    #[test]
    fn test_panic_does_not_kill_worker() {
        let pool = WorkerPool::new(1).unwrap();
        pool.submit(Box::new(|| panic!("boom"))).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.submit(Box::new(move || tx.send(7).unwrap())).unwrap();
        assert_eq!(rx.recv().unwrap(), 7);
    }

    #[test]
    fn test_shutdown_drains_and_rejects() {
        let pool = WorkerPool::new(2).unwrap();
        for _ in 0..8 {
            pool.submit(Box::new(|| thread::sleep(Duration::from_millis(1))))
                .unwrap();
        }
        pool.shutdown();
        assert_eq!(pool.completed(), 8);
        assert!(pool.submit(Box::new(|| {})).is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(WorkerPool::new(0), Err(Error::Configuration(_))));
    }
}
