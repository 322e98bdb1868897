//! Single-flight coalesced write-back
//!
//! Each mutable entity owns one [`CoalescedWriter`]. At most one write per
//! entity is in flight; requests arriving meanwhile collapse into a single
//! follow-up write of whatever the entity holds when that write starts.
//!
//! The follow-up runs in the same pool job as the write it follows, so an
//! address handed out by a writer only ever depends on a job that is
//! already scheduled.

use crate::address::{Address, Resolver};
use crate::executor::WorkerPool;
use chainstore_common::{Error, RecordAddress, Result};
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use parking_lot::{Condvar, Mutex};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, warn};

/// A write of a snapshot taken when the write started
pub type WriteFuture = BoxFuture<'static, Result<RecordAddress>>;

/// Something that can write its current state to the backend
pub trait WriteTarget: Send + Sync {
    /// Snapshot the current state and return the write of that snapshot
    fn write(&self) -> WriteFuture;
}

impl<F> WriteTarget for F
where
    F: Fn() -> Result<RecordAddress> + Send + Sync,
{
    fn write(&self) -> WriteFuture {
        future::ready(self()).boxed()
    }
}

/// Callback receiving every failed write of one entity
pub type ErrorSink = Arc<dyn Fn(&Error) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Writing,
}

struct WriterState {
    phase: Phase,
    redo_pending: bool,
    /// Requests not yet covered by a started write
    waiters: Vec<Resolver>,
    target: Option<Arc<dyn WriteTarget>>,
    /// Address handed to the most recent request
    latest: Option<Address>,
    last_outcome: Option<Result<RecordAddress>>,
    last_error: Option<Error>,
}

/// Per-entity write scheduler
pub struct CoalescedWriter {
    name: &'static str,
    executor: Arc<WorkerPool>,
    state: Mutex<WriterState>,
    idle: Condvar,
    writes_issued: AtomicU64,
    on_error: Mutex<Option<ErrorSink>>,
}

impl CoalescedWriter {
    /// Create a writer; `name` only appears in logs
    pub fn new(name: &'static str, executor: Arc<WorkerPool>) -> Arc<Self> {
        Arc::new(Self {
            name,
            executor,
            state: Mutex::new(WriterState {
                phase: Phase::Idle,
                redo_pending: false,
                waiters: Vec::new(),
                target: None,
                latest: None,
                last_outcome: None,
                last_error: None,
            }),
            idle: Condvar::new(),
            writes_issued: AtomicU64::new(0),
            on_error: Mutex::new(None),
        })
    }

    /// Install the sink that receives this entity's write failures
    pub fn set_error_sink(&self, sink: ErrorSink) {
        *self.on_error.lock() = Some(sink);
    }

    /// Ask for the entity's current state to be written
    ///
    /// Returns immediately. The address resolves with the result of the
    /// first write that starts after this call.
    pub fn request_write(self: &Arc<Self>, target: Arc<dyn WriteTarget>) -> Address {
        let (address, resolver) = Address::pending();
        let mut state = self.state.lock();
        state.waiters.push(resolver);
        state.target = Some(target);
        state.latest = Some(address.clone());

        match state.phase {
            Phase::Writing => {
                state.redo_pending = true;
                debug!("{} write in flight, coalescing request", self.name);
            }
            Phase::Idle => {
                state.phase = Phase::Writing;
                drop(state);
                let writer = Arc::clone(self);
                if let Err(e) = self.executor.spawn(writer.run().boxed()) {
                    self.abort(&e);
                }
            }
        }
        address
    }

    async fn run(self: Arc<Self>) {
        loop {
            let (target, waiters) = {
                let mut state = self.state.lock();
                (state.target.clone(), std::mem::take(&mut state.waiters))
            };

            self.writes_issued.fetch_add(1, Ordering::Relaxed);
            let write = match target {
                Some(target) => catch_unwind(AssertUnwindSafe(|| target.write()))
                    .unwrap_or_else(|_| future::ready(Err(panicked())).boxed()),
                None => future::ready(Err(Error::internal("write requested without a target")))
                    .boxed(),
            };
            let result = AssertUnwindSafe(write)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(panicked()));

            match &result {
                Ok(address) => debug!("{} written to {}", self.name, address),
                Err(e) => self.report(e),
            }
            for waiter in waiters {
                waiter.resolve(result.clone());
            }

            let redo = {
                let mut state = self.state.lock();
                if let Err(e) = &result {
                    state.last_error = Some(e.clone());
                }
                state.last_outcome = Some(result);
                if state.redo_pending {
                    state.redo_pending = false;
                } else {
                    state.phase = Phase::Idle;
                    self.idle.notify_all();
                }
                state.phase == Phase::Writing
            };
            if !redo {
                return;
            }
        }
    }

    fn report(&self, e: &Error) {
        error!("{} write failed: {}", self.name, e);
        let sink = self.on_error.lock().clone();
        if let Some(sink) = sink {
            sink(e);
        }
    }

    /// Fail every waiting request when no write could be scheduled
    fn abort(&self, e: &Error) {
        warn!("{} write could not be scheduled: {}", self.name, e);
        self.report(e);
        let mut state = self.state.lock();
        for waiter in std::mem::take(&mut state.waiters) {
            waiter.resolve(Err(e.clone()));
        }
        state.last_error = Some(e.clone());
        state.last_outcome = Some(Err(e.clone()));
        state.redo_pending = false;
        state.phase = Phase::Idle;
        self.idle.notify_all();
    }

    /// Block until no write is in flight; returns the outcome of the last one
    pub fn wait_idle(&self) -> Result<()> {
        let mut state = self.state.lock();
        while state.phase == Phase::Writing {
            self.idle.wait(&mut state);
        }
        match &state.last_outcome {
            Some(Err(e)) => Err(e.clone()),
            _ => Ok(()),
        }
    }

    /// True while a write is in flight
    pub fn is_writing(&self) -> bool {
        self.state.lock().phase == Phase::Writing
    }

    /// Number of writes started so far
    pub fn writes_issued(&self) -> u64 {
        self.writes_issued.load(Ordering::Relaxed)
    }

    /// Address handed to the most recent request
    pub fn latest(&self) -> Option<Address> {
        self.state.lock().latest.clone()
    }

    /// Most recent write failure, if any write ever failed
    pub fn last_error(&self) -> Option<Error> {
        self.state.lock().last_error.clone()
    }
}

fn panicked() -> Error {
    Error::internal("write target panicked")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    /// Counter whose value is "written" by returning it as the native id
    struct SlowCounter {
        value: AtomicU64,
        writes: AtomicUsize,
        delay: Duration,
    }

    impl WriteTarget for SlowCounter {
        fn write(&self) -> WriteFuture {
            let snapshot = self.value.load(Ordering::SeqCst);
            thread::sleep(self.delay);
            self.writes.fetch_add(1, Ordering::SeqCst);
            future::ready(Ok(RecordAddress::new(0, 0, snapshot))).boxed()
        }
    }

    fn counter(delay_ms: u64) -> Arc<SlowCounter> {
        Arc::new(SlowCounter {
            value: AtomicU64::new(0),
            writes: AtomicUsize::new(0),
            delay: Duration::from_millis(delay_ms),
        })
    }

    #[test]
    fn test_single_request() {
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let writer = CoalescedWriter::new("test", pool);
        let target = counter(0);
        target.value.store(5, Ordering::SeqCst);
        let address = writer.request_write(target.clone());
        assert_eq!(address.resolve().unwrap().native, 5);
        writer.wait_idle().unwrap();
        assert_eq!(writer.writes_issued(), 1);
    }

    #[test]
    fn test_burst_coalesces_and_converges() {
        let pool = Arc::new(WorkerPool::new(4).unwrap());
        let writer = CoalescedWriter::new("test", pool);
        let target = counter(20);

        let mut addresses = Vec::new();
        for i in 1..=10 {
            target.value.store(i, Ordering::SeqCst);
            addresses.push(writer.request_write(target.clone()));
        }
        writer.wait_idle().unwrap();

        let writes = target.writes.load(Ordering::SeqCst);
        assert!((1..=10).contains(&writes), "writes = {writes}");
        assert!(writes <= 3, "burst should coalesce, got {writes} writes");

        // every request observes its own state or a later one
        for (i, address) in addresses.iter().enumerate() {
            assert!(address.resolve().unwrap().native >= i as u64 + 1);
        }
        assert_eq!(addresses[9].resolve().unwrap().native, 10);
        assert_eq!(writer.latest().unwrap().resolve().unwrap().native, 10);
    }

    #[test]
    fn test_failure_reaches_sink_and_address() {
        let pool = Arc::new(WorkerPool::new(1).unwrap());
        let writer = CoalescedWriter::new("test", pool);
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&failures);
        writer.set_error_sink(Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let failing = Arc::new(|| -> Result<RecordAddress> { Err(Error::backend_write("flood")) });
        let address = writer.request_write(failing);
        assert_eq!(address.resolve(), Err(Error::backend_write("flood")));
        assert!(writer.wait_idle().is_err());
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(writer.last_error(), Some(Error::backend_write("flood")));

        // a later success clears the flush error but not the history
        let ok = Arc::new(|| -> Result<RecordAddress> { Ok(RecordAddress::new(0, 0, 1)) });
        writer.request_write(ok).resolve().unwrap();
        writer.wait_idle().unwrap();
        assert!(writer.last_error().is_some());
    }

    #[test]
    fn test_panicking_target_does_not_wedge_writer() {
        let pool = Arc::new(WorkerPool::new(1).unwrap());
        let writer = CoalescedWriter::new("test", pool);
        let boom = Arc::new(|| -> Result<RecordAddress> { panic!("boom") });
        assert!(writer.request_write(boom).resolve().is_err());
        assert!(writer.wait_idle().is_err());
    }
}
