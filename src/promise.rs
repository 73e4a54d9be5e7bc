//! Single-assignment completion handles with ordered continuations.
//!
//! The primary types in this module are the [`Promise`] and [`Resolver`]
//! structs, the two halves of a one-shot completion. See the documentation on
//! [`Promise`] for further information.

use std::mem;
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant};

use crate::util;

/// The collection of errors that can be returned by [`Promise`] methods.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PromiseError {
    /// Returned when asking for the value of a promise that has not been
    /// resolved yet.
    NotReady,
}

type Continuation<T> = Box<dyn FnOnce(&T) + Send>;

struct Waiters<T> {
    resolved: bool,
    continuations: Vec<Continuation<T>>,
}

struct Inner<T> {
    value: OnceLock<T>,
    waiters: Mutex<Waiters<T>>,
    resolved_signal: Condvar,
}

/// The reading half of a one-shot completion: a handle to a value that will
/// be assigned exactly once, at some indeterminate point in the future.
///
/// A `Promise` starts out pending and becomes resolved when the [`Resolver`]
/// it was created with is given a value. Once resolved it never changes
/// again. Interested parties can poll it with [`is_resolved`] and [`value`],
/// park on it with [`wait`] or [`wait_timeout`], or attach continuations with
/// [`when_resolved`], which run exactly once each, in attachment order, on
/// whichever thread performs the resolution.
///
/// `Promise` is `Clone`; every clone observes the same resolution. The
/// [`Resolver`] is not, and resolving consumes it, so a promise cannot be
/// resolved twice.
///
/// [`is_resolved`]: #method.is_resolved
/// [`value`]: #method.value
/// [`wait`]: #method.wait
/// [`wait_timeout`]: #method.wait_timeout
/// [`when_resolved`]: #method.when_resolved
///
/// # Example
///
/// ```
/// use handover::Promise;
/// use std::thread;
/// use std::time::Duration;
///
/// let (promise, resolver) = Promise::new();
///
/// promise.when_resolved(|n: &i32| {
///     println!("resolved with {}!", n);
/// });
///
/// thread::spawn(move || {
///     thread::sleep(Duration::from_millis(10));
///     resolver.resolve(42);
/// });
///
/// assert_eq!(*promise.wait(), 42);
/// assert_eq!(promise.value(), Ok(42));
/// ```
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

/// The writing half of a one-shot completion.
///
/// Calling [`resolve`] consumes the resolver, assigns the promise's value,
/// wakes every thread blocked in [`Promise::wait`], and runs the attached
/// continuations in attachment order on the calling thread.
///
/// Dropping a resolver without resolving it leaves its promise pending
/// forever; there is no cancellation signal.
///
/// [`resolve`]: #method.resolve
/// [`Promise::wait`]: struct.Promise.html#method.wait
pub struct Resolver<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Promise<T> {
    /// Creates a new pending `Promise` along with the `Resolver` that will
    /// eventually complete it.
    pub fn new() -> (Promise<T>, Resolver<T>) {
        let inner = Arc::new(Inner {
            value: OnceLock::new(),
            waiters: Mutex::new(Waiters {
                resolved: false,
                continuations: Vec::new(),
            }),
            resolved_signal: Condvar::new(),
        });

        (
            Promise {
                inner: inner.clone(),
            },
            Resolver { inner },
        )
    }

    /// Returns whether this promise has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.inner.value.get().is_some()
    }

    /// Returns a copy of the resolved value.
    ///
    /// # Errors
    ///
    /// If the promise is still pending, this function returns
    /// `PromiseError::NotReady`.
    pub fn value(&self) -> Result<T, PromiseError>
    where
        T: Clone,
    {
        self.inner.value.get().cloned().ok_or(PromiseError::NotReady)
    }

    /// Blocks the current thread until the promise is resolved, then returns
    /// a reference to the value.
    ///
    /// This function will block indefinitely; it returns immediately if the
    /// promise is already resolved. Waiting is pure observation: it does not
    /// hurry the resolution along, nor abandon it.
    pub fn wait(&self) -> &T {
        let mut waiters = util::unpoison(self.inner.waiters.lock());
        while !waiters.resolved {
            waiters = util::unpoison(self.inner.resolved_signal.wait(waiters));
        }
        drop(waiters);

        self.inner.value.get().expect("resolved promise has no value")
    }

    /// Blocks the current thread until the promise is resolved or the given
    /// timeout elapses, returning the resolution status at wakeup.
    ///
    /// A `false` return means the promise was still pending when the timeout
    /// ran out. The promise itself is unaffected either way.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let begin = Instant::now();

        let mut waiters = util::unpoison(self.inner.waiters.lock());
        while !waiters.resolved {
            let elapsed = begin.elapsed();
            if elapsed >= timeout {
                return false;
            }

            let (guard, _) = util::unpoison(
                self.inner
                    .resolved_signal
                    .wait_timeout(waiters, timeout - elapsed),
            );
            waiters = guard;
        }

        true
    }

    /// Attaches a continuation to run with the resolved value.
    ///
    /// Continuations run synchronously, exactly once each, in attachment
    /// order, on whichever thread calls [`Resolver::resolve`]. If the promise
    /// is already resolved, the continuation runs immediately on the current
    /// thread instead.
    ///
    /// [`Resolver::resolve`]: struct.Resolver.html#method.resolve
    pub fn when_resolved<F>(&self, continuation: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        {
            let mut waiters = util::unpoison(self.inner.waiters.lock());
            if !waiters.resolved {
                waiters.continuations.push(Box::new(continuation));
                return;
            }
        }

        continuation(self.inner.value.get().expect("resolved promise has no value"));
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Promise<T> {
        Promise {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Resolver<T> {
    /// Resolves the promise with the given value, waking blocked waiters and
    /// running attached continuations in attachment order on the current
    /// thread.
    pub fn resolve(self, value: T) {
        if self.inner.value.set(value).is_err() {
            panic!("promise resolved twice");
        }

        let continuations = {
            let mut waiters = util::unpoison(self.inner.waiters.lock());
            waiters.resolved = true;
            self.inner.resolved_signal.notify_all();
            mem::take(&mut waiters.continuations)
        };

        //Continuations run outside the waiters lock so they can freely touch
        //this promise (or clones of it) without deadlocking.
        let value = self.inner.value.get().expect("resolved promise has no value");
        for continuation in continuations {
            continuation(value);
        }
    }
}
