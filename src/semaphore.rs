//! A counting semaphore whose permits are returned as deliberately as they
//! are handed out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crossbeam_queue::SegQueue;

/// A synchronization primitive that tracks a bounded number of outstanding
/// permits between two groups of threads.
///
/// [`acquire`] takes a permit, blocking while every permit is already out;
/// [`release`] returns one, blocking while none are out. That second half is
/// what sets this apart from an ordinary semaphore: a permit cannot be
/// returned before it has been handed out, so a releasing thread rendezvouses
/// with an acquiring one when the counter is at either end of its range. With
/// `max_permits` of 1 this forces strict ping/pong alternation between the
/// two sides.
///
/// Waiting threads park themselves and are woken in a broadcast whenever the
/// counter moves; every woken thread re-checks its own condition, so which
/// waiter proceeds first is up to the scheduler.
///
/// A semaphore created with zero permits can satisfy neither operation, so
/// every caller would block forever; you almost certainly want at least one.
///
/// [`acquire`]: #method.acquire
/// [`release`]: #method.release
///
/// # Example
///
/// ```
/// use handover::CountingSemaphore;
/// use std::sync::Arc;
/// use std::thread;
///
/// let sem = Arc::new(CountingSemaphore::new(1));
/// sem.acquire();
///
/// let pinger = {
///     let sem = Arc::clone(&sem);
///     thread::spawn(move || {
///         for _ in 0..3 {
///             sem.release();
///         }
///     })
/// };
///
/// // each acquire must wait for the matching release
/// for _ in 0..3 {
///     sem.acquire();
/// }
///
/// pinger.join().unwrap();
/// ```
pub struct CountingSemaphore {
    max_permits: usize,
    given_out: AtomicUsize,
    waiting: SegQueue<thread::Thread>,
}

impl CountingSemaphore {
    /// Creates a new `CountingSemaphore` with the given permit bound and no
    /// permits out.
    pub fn new(max_permits: usize) -> CountingSemaphore {
        CountingSemaphore {
            max_permits,
            given_out: AtomicUsize::new(0),
            waiting: SegQueue::new(),
        }
    }

    /// Returns the permit bound this semaphore was created with.
    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    /// Returns how many permits are currently handed out.
    pub fn outstanding(&self) -> usize {
        self.given_out.load(Ordering::SeqCst)
    }

    /// Takes a permit, blocking the current thread while all of them are out.
    pub fn acquire(&self) {
        //Push the handle before the first check: a thread that changes the
        //counter between our check and our park drains the wait list, and a
        //handle already in the list at that point just gets an early unpark
        //and re-checks. See `release` for the same dance.
        self.waiting.push(thread::current());

        let mut first = true;
        while !self.try_take() {
            if first {
                first = false;
            } else {
                self.waiting.push(thread::current());
            }

            thread::park();
        }

        self.wake_all();
    }

    /// Returns a permit, blocking the current thread while none are out.
    pub fn release(&self) {
        self.waiting.push(thread::current());

        let mut first = true;
        while !self.try_put_back() {
            if first {
                first = false;
            } else {
                self.waiting.push(thread::current());
            }

            thread::park();
        }

        self.wake_all();
    }

    fn try_take(&self) -> bool {
        let mut current = self.given_out.load(Ordering::SeqCst);
        loop {
            if current >= self.max_permits {
                return false;
            }

            match self.given_out.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    fn try_put_back(&self) -> bool {
        let mut current = self.given_out.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                return false;
            }

            match self.given_out.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    //Both sides share one wait list, so every state change wakes everybody
    //and each waiter re-checks its own condition. Stale handles from earlier
    //rounds unpark harmlessly.
    fn wake_all(&self) {
        while let Some(thread) = self.waiting.pop() {
            thread.unpark();
        }
    }
}
