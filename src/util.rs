//! Small helpers shared by the primitives; not part of the public surface.

use std::sync::LockResult;

//Take the guard out of a LockResult even when the lock is poisoned.
//
//A panicking thread poisons any std lock it holds. The state these locks
//guard is a plain value whose invariants hold whenever the lock is free, so a
//poisoned lock is still safe to keep using; propagating the poison would
//wedge every other thread parked on the same primitive.
pub fn unpoison<T>(res: LockResult<T>) -> T {
    match res {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
