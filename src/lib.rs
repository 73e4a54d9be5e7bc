//! A collection of synchronization primitives that build on the primitives
//! available in the standard library, centered on a bounded concurrent queue
//! that can be driven by blocking callers, by promise-based deferred callers,
//! or by any mix of the two on the same instance.
//!
//! This library contains the following special-purpose synchronization
//! primitives:
//!
//! * [`BoundedQueue`], a capacity-bounded FIFO queue with a thread-blocking
//!   surface and a never-blocking, promise-returning surface sharing one set
//!   of invariants, handing items directly between waiting producers and
//!   consumers where that keeps the capacity bound exact.
//! * [`Promise`] (with its write side, [`Resolver`]), a single-assignment
//!   completion handle with ordered continuations, usable on its own or as
//!   the currency of the queue's deferred surface.
//! * [`CountingSemaphore`], a bounded permit counter where returning a permit
//!   can block just like taking one.
//!
//! [`BoundedQueue`]: struct.BoundedQueue.html
//! [`Promise`]: struct.Promise.html
//! [`Resolver`]: struct.Resolver.html
//! [`CountingSemaphore`]: struct.CountingSemaphore.html

#![deny(missing_docs)]

pub mod promise;
pub mod queue;
pub mod semaphore;

mod util;

pub use crate::promise::{Promise, PromiseError, Resolver};
pub use crate::queue::{BoundedQueue, ConfigError, Dequeue, Enqueue, QueueMetrics};
pub use crate::semaphore::CountingSemaphore;
