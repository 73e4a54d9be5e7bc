//! A capacity-bounded FIFO queue that can be driven by blocking calls, by
//! promise-based deferred calls, or by any mix of the two.
//!
//! The primary type in this module is the [`BoundedQueue`] struct. See its
//! documentation for further information.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::promise::{Promise, Resolver};
use crate::util;

/// The collection of errors that can be returned when constructing a
/// [`BoundedQueue`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Returned when asking for a queue with no capacity at all. A queue that
    /// can never hold an item can never hand one over either.
    ZeroCapacity,
}

/// A snapshot of a [`BoundedQueue`]'s occupancy and wait-list depth, taken in
/// one critical section by [`BoundedQueue::metrics`].
///
/// [`BoundedQueue::metrics`]: struct.BoundedQueue.html#method.metrics
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct QueueMetrics {
    /// How many more items the buffer can hold right now.
    pub available_capacity: usize,
    /// How many deferred enqueues are parked waiting for space.
    pub waiting_producers: usize,
    /// How many deferred dequeues are parked waiting for an item.
    pub waiting_consumers: usize,
}

/// The outcome of a deferred enqueue.
#[must_use]
pub enum Enqueue {
    /// The item went into the queue (or straight to a waiting consumer)
    /// during the call itself.
    Accepted,
    /// The queue was full. The queue holds on to the item and inserts it once
    /// a slot frees up; the promise resolves at that point.
    Deferred(Promise<()>),
}

/// The outcome of a deferred dequeue.
#[must_use]
pub enum Dequeue<T> {
    /// An item was available during the call itself.
    Item(T),
    /// The queue was empty. The promise resolves with the next item to
    /// arrive that is owed to this caller.
    Deferred(Promise<T>),
}

impl Enqueue {
    /// Returns whether the item was placed during the call itself.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Enqueue::Accepted)
    }

    /// Extracts the pending promise, if the enqueue was deferred.
    pub fn into_promise(self) -> Option<Promise<()>> {
        match self {
            Enqueue::Accepted => None,
            Enqueue::Deferred(promise) => Some(promise),
        }
    }
}

impl<T> Dequeue<T> {
    /// Extracts the item, if one was immediately available.
    pub fn into_item(self) -> Option<T> {
        match self {
            Dequeue::Item(item) => Some(item),
            Dequeue::Deferred(_) => None,
        }
    }

    /// Extracts the pending promise, if the dequeue was deferred.
    pub fn into_promise(self) -> Option<Promise<T>> {
        match self {
            Dequeue::Item(_) => None,
            Dequeue::Deferred(promise) => Some(promise),
        }
    }
}

struct WaitingProducer<T> {
    item: T,
    resolver: Resolver<()>,
}

struct State<T> {
    items: VecDeque<T>,
    waiting_producers: VecDeque<WaitingProducer<T>>,
    waiting_consumers: VecDeque<Resolver<T>>,
}

//A promise resolution owed by the operation that just ran. Resolutions are
//collected while the state lock is held but completed only after the guard
//drops: a continuation is allowed to call back into the queue, which would
//deadlock on the non-reentrant lock otherwise.
enum Resolution<T> {
    Delivered(Resolver<T>, T),
    SpaceGranted(Resolver<()>),
}

impl<T> Resolution<T> {
    fn complete(self) {
        match self {
            Resolution::Delivered(consumer, item) => consumer.resolve(item),
            Resolution::SpaceGranted(producer) => producer.resolve(()),
        }
    }
}

impl<T> State<T> {
    //Insert-side hand-off: an arriving item goes straight to the oldest
    //waiting consumer when one exists, never through the buffer. A consumer
    //can only be waiting while the buffer is empty.
    fn admit(&mut self, item: T) -> Option<Resolution<T>> {
        if let Some(consumer) = self.waiting_consumers.pop_front() {
            debug_assert!(self.items.is_empty());
            Some(Resolution::Delivered(consumer, item))
        } else {
            self.items.push_back(item);
            None
        }
    }

    //Removal-side hand-off: a freed slot is filled with the oldest waiting
    //producer's held item in the same critical section, so free space and
    //waiting producers are never observable together.
    fn refill(&mut self) -> Option<Resolution<T>> {
        let producer = self.waiting_producers.pop_front()?;
        self.items.push_back(producer.item);
        Some(Resolution::SpaceGranted(producer.resolver))
    }
}

/// A capacity-bounded FIFO queue shared between producer and consumer
/// threads, with a thread-blocking surface and a never-blocking, deferred
/// surface over one set of invariants.
///
/// The blocking surface ([`enqueue`], [`dequeue`]) suspends the calling
/// thread until its request can be satisfied. The deferred surface
/// ([`enqueue_deferred`], [`dequeue_deferred`]) returns immediately in every
/// case; when a request cannot be satisfied on the spot it returns a
/// [`Promise`] that resolves once a later operation frees the needed
/// resource. Both surfaces may be used on the same queue at the same time,
/// and items come out in the order they went in regardless of which surface
/// either end used.
///
/// When an insert meets a waiting consumer (or a removal meets a waiting
/// producer), the item is handed over directly instead of passing through the
/// buffer, so the buffer never strays outside its capacity even for an
/// instant. A deferred enqueue against a full queue hands the *item itself*
/// to the queue; its promise resolving means the item has entered the queue
/// (or gone straight to a consumer), and no retry is ever needed.
///
/// Promise resolutions triggered by an operation run on that operation's
/// thread, strictly after the queue's internal lock is released, so attached
/// continuations are free to call back into the queue.
///
/// [`enqueue`]: #method.enqueue
/// [`dequeue`]: #method.dequeue
/// [`enqueue_deferred`]: #method.enqueue_deferred
/// [`dequeue_deferred`]: #method.dequeue_deferred
/// [`Promise`]: ../promise/struct.Promise.html
///
/// # Example
///
/// ```
/// use handover::BoundedQueue;
/// use std::sync::Arc;
/// use std::thread;
///
/// let queue = Arc::new(BoundedQueue::new(2).unwrap());
///
/// let producer = {
///     let queue = Arc::clone(&queue);
///     thread::spawn(move || {
///         for i in 0..5 {
///             queue.enqueue(i);
///         }
///     })
/// };
///
/// let mut received = Vec::new();
/// for _ in 0..5 {
///     received.push(queue.dequeue());
/// }
///
/// producer.join().unwrap();
/// assert_eq!(received, vec![0, 1, 2, 3, 4]);
/// ```
pub struct BoundedQueue<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    state_changed: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Creates a new `BoundedQueue` that holds at most `capacity` items.
    ///
    /// # Errors
    ///
    /// If `capacity` is zero, this function will return an error.
    pub fn new(capacity: usize) -> Result<BoundedQueue<T>, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        Ok(BoundedQueue {
            capacity,
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                waiting_producers: VecDeque::new(),
                waiting_consumers: VecDeque::new(),
            }),
            state_changed: Condvar::new(),
        })
    }

    /// Returns the fixed capacity this queue was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns whether the buffer is full right now.
    ///
    /// The answer can be stale by the time the caller looks at it; it is
    /// meant for monitoring, not for gating an enqueue.
    pub fn is_full(&self) -> bool {
        util::unpoison(self.state.lock()).items.len() == self.capacity
    }

    /// Inserts an item, blocking the current thread while the queue is full.
    ///
    /// Every wake-up re-checks the condition before proceeding, so spurious
    /// or raced notifications are harmless. When several threads are blocked
    /// here, which of them wins the freed slot is up to the scheduler; this
    /// queue makes no fairness guarantee between blocked threads.
    pub fn enqueue(&self, item: T) {
        let resolution = {
            let mut state = util::unpoison(self.state.lock());
            while state.items.len() == self.capacity {
                state = util::unpoison(self.state_changed.wait(state));
            }

            let resolution = state.admit(item);
            self.state_changed.notify_all();
            resolution
        };

        if let Some(resolution) = resolution {
            resolution.complete();
        }
    }

    /// Removes and returns the oldest item, blocking the current thread while
    /// the queue is empty.
    ///
    /// The same wake-up and fairness caveats as [`enqueue`] apply.
    ///
    /// [`enqueue`]: #method.enqueue
    pub fn dequeue(&self) -> T {
        let (item, resolution) = {
            let mut state = util::unpoison(self.state.lock());
            while state.items.is_empty() {
                state = util::unpoison(self.state_changed.wait(state));
            }

            let item = state
                .items
                .pop_front()
                .expect("queue drained while the lock was held");
            let resolution = state.refill();
            self.state_changed.notify_all();
            (item, resolution)
        };

        if let Some(resolution) = resolution {
            resolution.complete();
        }
        item
    }

    /// Inserts an item if there is room, without ever blocking.
    ///
    /// On a full queue the item is parked, in arrival order, alongside a
    /// promise that resolves once the item has entered the queue (or been
    /// handed to a consumer directly). The caller does not need to retry;
    /// waiting on the promise is purely for pacing.
    ///
    /// # Example
    ///
    /// ```
    /// use handover::{BoundedQueue, Enqueue};
    ///
    /// let queue = BoundedQueue::new(1).unwrap();
    ///
    /// assert!(queue.enqueue_deferred("a").is_accepted());
    /// let pending = match queue.enqueue_deferred("b") {
    ///     Enqueue::Deferred(promise) => promise,
    ///     Enqueue::Accepted => unreachable!(),
    /// };
    ///
    /// // freeing a slot slides "b" in and resolves the promise
    /// assert_eq!(queue.dequeue(), "a");
    /// assert!(pending.is_resolved());
    /// assert_eq!(queue.dequeue(), "b");
    /// ```
    pub fn enqueue_deferred(&self, item: T) -> Enqueue {
        let (outcome, resolution) = {
            let mut state = util::unpoison(self.state.lock());

            let (outcome, resolution) = if state.items.len() == self.capacity {
                let (promise, resolver) = Promise::new();
                state
                    .waiting_producers
                    .push_back(WaitingProducer { item, resolver });
                (Enqueue::Deferred(promise), None)
            } else {
                (Enqueue::Accepted, state.admit(item))
            };

            self.state_changed.notify_all();
            (outcome, resolution)
        };

        if let Some(resolution) = resolution {
            resolution.complete();
        }
        outcome
    }

    /// Removes and returns the oldest item if there is one, without ever
    /// blocking.
    ///
    /// On an empty queue the caller is parked, in arrival order, behind a
    /// promise that resolves with the next item owed to it. Items are owed to
    /// waiting consumers before they ever reach the buffer, so a burst of
    /// deferred dequeues drains incoming items in strict registration order.
    pub fn dequeue_deferred(&self) -> Dequeue<T> {
        let (outcome, resolution) = {
            let mut state = util::unpoison(self.state.lock());

            let (outcome, resolution) = if let Some(item) = state.items.pop_front() {
                let resolution = state.refill();
                (Dequeue::Item(item), resolution)
            } else {
                let (promise, resolver) = Promise::new();
                state.waiting_consumers.push_back(resolver);
                (Dequeue::Deferred(promise), None)
            };

            self.state_changed.notify_all();
            (outcome, resolution)
        };

        if let Some(resolution) = resolution {
            resolution.complete();
        }
        outcome
    }

    /// Takes a consistent snapshot of occupancy and wait-list depth.
    ///
    /// All three numbers come from one critical section, so they describe a
    /// single instant. Reading them never mutates the queue.
    pub fn metrics(&self) -> QueueMetrics {
        let state = util::unpoison(self.state.lock());
        QueueMetrics {
            available_capacity: self.capacity - state.items.len(),
            waiting_producers: state.waiting_producers.len(),
            waiting_consumers: state.waiting_consumers.len(),
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use ntest::timeout;

    use super::*;

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(
            BoundedQueue::<u8>::new(0).err(),
            Some(ConfigError::ZeroCapacity)
        );
    }

    #[test]
    fn full_queue_defers_the_producer_until_a_slot_frees() {
        let queue = BoundedQueue::new(1).unwrap();

        assert!(queue.enqueue_deferred("A").is_accepted());
        let pending = queue.enqueue_deferred("B").into_promise().unwrap();
        assert!(!pending.is_resolved());

        assert_eq!(queue.dequeue(), "A");

        //the freed slot was refilled with "B" in the same step
        assert!(pending.is_resolved());
        assert_eq!(queue.dequeue(), "B");
    }

    #[test]
    fn uncontended_deferred_enqueues_fill_the_buffer() {
        let queue = BoundedQueue::new(3).unwrap();
        assert_eq!(queue.capacity(), 3);

        for item in ["a", "b", "c"] {
            assert!(queue.enqueue_deferred(item).is_accepted());
        }

        assert!(queue.is_full());
        assert_eq!(
            queue.metrics(),
            QueueMetrics {
                available_capacity: 0,
                waiting_producers: 0,
                waiting_consumers: 0,
            }
        );
    }

    #[test]
    fn waiting_consumer_receives_the_item_directly() {
        let queue = BoundedQueue::new(2).unwrap();

        let pending = queue.dequeue_deferred().into_promise().unwrap();
        assert_eq!(queue.metrics().waiting_consumers, 1);

        //the item bypasses the buffer entirely
        assert!(queue.enqueue_deferred("X").is_accepted());
        assert_eq!(pending.value(), Ok("X"));
        assert_eq!(
            queue.metrics(),
            QueueMetrics {
                available_capacity: 2,
                waiting_producers: 0,
                waiting_consumers: 0,
            }
        );
    }

    #[test]
    fn fifo_order_holds_across_mixed_strategies() {
        let queue = BoundedQueue::new(2).unwrap();

        assert!(queue.enqueue_deferred(1).is_accepted());
        queue.enqueue(2);
        let pending = queue.enqueue_deferred(3).into_promise().unwrap();

        assert_eq!(queue.dequeue(), 1);
        assert!(pending.is_resolved());
        assert_eq!(queue.dequeue_deferred().into_item(), Some(2));
        assert_eq!(queue.dequeue(), 3);
    }

    #[test]
    fn handoff_keeps_space_and_waiting_producers_apart() {
        let queue = BoundedQueue::new(1).unwrap();

        assert!(queue.enqueue_deferred("a").is_accepted());
        let b = queue.enqueue_deferred("b").into_promise().unwrap();
        let c = queue.enqueue_deferred("c").into_promise().unwrap();

        assert_eq!(
            queue.metrics(),
            QueueMetrics {
                available_capacity: 0,
                waiting_producers: 2,
                waiting_consumers: 0,
            }
        );

        assert_eq!(queue.dequeue(), "a");
        assert!(b.is_resolved());
        assert!(!c.is_resolved());
        //still no observable free space: the slot was refilled immediately
        assert_eq!(
            queue.metrics(),
            QueueMetrics {
                available_capacity: 0,
                waiting_producers: 1,
                waiting_consumers: 0,
            }
        );

        assert_eq!(queue.dequeue(), "b");
        assert!(c.is_resolved());
        assert_eq!(queue.dequeue(), "c");
        assert_eq!(queue.metrics().available_capacity, 1);
    }

    #[test]
    #[timeout(5000)]
    fn blocked_enqueue_resumes_after_a_deferred_dequeue() {
        let queue = Arc::new(BoundedQueue::new(1).unwrap());
        queue.enqueue("first");

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue("second"))
        };

        //give the producer a moment to park on the full queue
        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.dequeue_deferred().into_item(), Some("first"));

        producer.join().unwrap();
        assert_eq!(queue.dequeue(), "second");
    }

    #[test]
    #[timeout(5000)]
    fn continuations_may_reenter_the_queue() {
        let queue = Arc::new(BoundedQueue::new(1).unwrap());

        assert!(queue.enqueue_deferred(1).is_accepted());
        let pending = queue.enqueue_deferred(2).into_promise().unwrap();

        let reentered = Arc::new(AtomicBool::new(false));
        {
            let queue = Arc::clone(&queue);
            let reentered = Arc::clone(&reentered);
            pending.when_resolved(move |_| {
                //runs on the dequeueing thread, after the queue lock dropped
                reentered.store(queue.metrics().available_capacity == 0, Ordering::SeqCst);
            });
        }

        assert_eq!(queue.dequeue(), 1);
        assert!(reentered.load(Ordering::SeqCst));
        assert_eq!(queue.dequeue(), 2);
    }

    #[test]
    #[timeout(60000)]
    fn load_delivers_everything_exactly_once() {
        const PRODUCERS: usize = 10;
        const PER_PRODUCER: usize = 100;
        const CONSUMERS: usize = 2;
        const TOTAL: usize = PRODUCERS * PER_PRODUCER;

        let queue = Arc::new(BoundedQueue::new(5).unwrap());

        let mut producers = Vec::new();
        for producer in 0..PRODUCERS {
            let queue = Arc::clone(&queue);
            producers.push(thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    queue.enqueue((producer, seq));
                }
            }));
        }

        let mut consumers = Vec::new();
        for _ in 0..CONSUMERS {
            let queue = Arc::clone(&queue);
            consumers.push(thread::spawn(move || {
                (0..TOTAL / CONSUMERS)
                    .map(|_| queue.dequeue())
                    .collect::<Vec<_>>()
            }));
        }

        for producer in producers {
            producer.join().unwrap();
        }

        let mut seen = HashSet::new();
        for consumer in consumers {
            let received = consumer.join().unwrap();
            let mut last_seq: [Option<usize>; PRODUCERS] = [None; PRODUCERS];
            for (producer, seq) in received {
                assert!(seen.insert((producer, seq)), "item delivered twice");
                if let Some(last) = last_seq[producer] {
                    assert!(seq > last, "one producer's items arrived out of order");
                }
                last_seq[producer] = Some(seq);
            }
        }

        assert_eq!(seen.len(), TOTAL);
        assert_eq!(queue.metrics().available_capacity, 5);
    }

    #[test]
    #[timeout(60000)]
    fn deferred_producers_hand_everything_over() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 100;
        const TOTAL: usize = PRODUCERS * PER_PRODUCER;

        let queue = Arc::new(BoundedQueue::new(3).unwrap());

        let mut producers = Vec::new();
        for producer in 0..PRODUCERS {
            let queue = Arc::clone(&queue);
            producers.push(thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    //fire and forget: the queue owns the item either way
                    let _ = queue.enqueue_deferred((producer, seq));
                }
            }));
        }

        let collector = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || (0..TOTAL).map(|_| queue.dequeue()).collect::<Vec<_>>())
        };

        for producer in producers {
            producer.join().unwrap();
        }

        let received = collector.join().unwrap();
        let seen: HashSet<_> = received.into_iter().collect();
        assert_eq!(seen.len(), TOTAL);
        assert_eq!(queue.metrics().waiting_producers, 0);
    }
}
