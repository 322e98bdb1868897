//! Pending record addresses
//!
//! An [`Address`] is either already known or waits on a one-shot future.
//! Clones share the same future, so every holder observes the same result.

use crate::executor::WorkerPool;
use chainstore_common::{Error, RecordAddress, Result};
use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{self, BoxFuture, Shared};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

type PendingFuture = Shared<BoxFuture<'static, Result<RecordAddress>>>;

/// Handle to a record whose address may not be known yet
#[derive(Clone)]
pub struct Address {
    inner: Inner,
}

#[derive(Clone)]
enum Inner {
    Resolved(RecordAddress),
    Pending(PendingFuture),
}

/// Completes a pending [`Address`] exactly once
///
/// Dropping a resolver without calling [`Resolver::resolve`] completes the
/// address with [`Error::AddressAbandoned`].
pub struct Resolver {
    sender: oneshot::Sender<Result<RecordAddress>>,
}

impl Resolver {
    pub fn resolve(self, result: Result<RecordAddress>) {
        // the receiving side may already be gone
        let _ = self.sender.send(result);
    }
}

impl Address {
    #[must_use]
    pub const fn resolved(address: RecordAddress) -> Self {
        Self {
            inner: Inner::Resolved(address),
        }
    }

    /// An address that already failed
    #[must_use]
    pub fn failed(error: Error) -> Self {
        Self::from_future(future::ready(Err(error)).boxed())
    }

    /// A pending address and the resolver that completes it
    #[must_use]
    pub fn pending() -> (Self, Resolver) {
        let (sender, receiver) = oneshot::channel();
        let fut = receiver
            .map(|received| received.unwrap_or(Err(Error::AddressAbandoned)))
            .boxed();
        (Self::from_future(fut), Resolver { sender })
    }

    /// A pending address resolved by running `f` on the worker pool
    pub fn spawn<F>(pool: &WorkerPool, f: F) -> Result<Self>
    where
        F: FnOnce() -> Result<RecordAddress> + Send + 'static,
    {
        let (address, resolver) = Self::pending();
        pool.submit(Box::new(move || resolver.resolve(f())))?;
        Ok(address)
    }

    /// An address resolved from `upstream` through `transform`
    pub fn derive<F>(upstream: &Self, transform: F) -> Self
    where
        F: FnOnce(RecordAddress) -> Result<RecordAddress> + Send + 'static,
    {
        match &upstream.inner {
            Inner::Resolved(address) => match transform(*address) {
                Ok(derived) => Self::resolved(derived),
                Err(e) => Self::failed(e),
            },
            Inner::Pending(fut) => {
                let fut = fut.clone().map(move |r| r.and_then(transform)).boxed();
                Self::from_future(fut)
            }
        }
    }

    fn from_future(fut: BoxFuture<'static, Result<RecordAddress>>) -> Self {
        Self {
            inner: Inner::Pending(fut.shared()),
        }
    }

    /// Block until the address is known
    ///
    /// Idempotent and safe to call from many threads at once. Blocks forever
    /// if the resolver is kept alive and never completed.
    pub fn resolve(&self) -> Result<RecordAddress> {
        match &self.inner {
            Inner::Resolved(address) => Ok(*address),
            Inner::Pending(fut) => futures::executor::block_on(fut.clone()),
        }
    }

    /// Wait for the address without blocking the thread
    ///
    /// This is how background jobs wait; [`Address::resolve`] must not be
    /// called from a worker thread.
    pub async fn wait(&self) -> Result<RecordAddress> {
        match &self.inner {
            Inner::Resolved(address) => Ok(*address),
            Inner::Pending(fut) => fut.clone().await,
        }
    }

    /// Wait for a record to take over
    ///
    /// A record whose last write failed is not reused; the caller creates
    /// a fresh one instead.
    pub async fn wait_reusable(&self) -> Option<RecordAddress> {
        match self.wait().await {
            Ok(address) => Some(address),
            Err(e) => {
                warn!("Not reusing record after failed write: {}", e);
                None
            }
        }
    }

    /// The result if it is already available
    pub fn try_get(&self) -> Option<Result<RecordAddress>> {
        match &self.inner {
            Inner::Resolved(address) => Some(Ok(*address)),
            Inner::Pending(fut) => fut.clone().now_or_never(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.try_get().is_some()
    }
}

impl From<RecordAddress> for Address {
    fn from(address: RecordAddress) -> Self {
        Self::resolved(address)
    }
}

/// Two addresses are equal once both resolved to the same record
impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self.try_get(), other.try_get()),
            (Some(Ok(a)), Some(Ok(b))) if a == b
        )
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_get() {
            Some(Ok(address)) => fmt::Display::fmt(&address, f),
            Some(Err(_)) => f.write_str("<failed>"),
            None => f.write_str("<pending>"),
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse().map(Self::resolved)
    }
}
