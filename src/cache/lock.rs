//! Poison-tolerant locking for the in-process cache and document store.
//!
//! Both hold plain maps that are only changed by a single map operation or by
//! swapping in a staged copy, so a panic cannot leave them half-written. A
//! poisoned lock is logged, cleared and then used as is.

use std::sync::{LockResult, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn recover<G>(
    result: LockResult<G>,
    clear: impl FnOnce(),
    source: &'static str,
    op: &'static str,
    access: &'static str,
) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            source,
            op,
            access,
            "docstash state lock was poisoned by a panicking writer; continuing with its contents"
        );
        clear();
        poisoned.into_inner()
    })
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    source: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    recover(lock.lock(), || lock.clear_poison(), source, op, "exclusive")
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), || lock.clear_poison(), source, op, "shared")
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), || lock.clear_poison(), source, op, "exclusive")
}
