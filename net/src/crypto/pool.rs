//! Per-thread free-list pools of hash engine contexts.
//!
//! Each worker thread keeps its own small stack of idle engines so that a
//! hot loop hashing many small payloads (header checksums, ping/pong
//! bodies) doesn't allocate a fresh hasher object per call. Contexts are
//! never shared across threads: each pool is a `thread_local`, matching the
//! "thread-local arena scoped to a worker lifetime" design note.

use std::cell::RefCell;

/// Declares a thread-local free-list pool for engine type `$ty`, with
/// `$acquire`/`$release` free functions.
macro_rules! engine_pool {
    ($local:ident, $acquire:ident, $release:ident, $ty:ty) => {
        thread_local! {
            static $local: RefCell<Vec<$ty>> = const { RefCell::new(Vec::new()) };
        }

        /// Hands out an idle engine, or a fresh one if the thread-local pool is empty.
        pub fn $acquire() -> $ty {
            $local.with(|pool| pool.borrow_mut().pop().unwrap_or_default())
        }

        /// Returns an engine to the thread-local pool for reuse.
        pub fn $release(engine: $ty) {
            $local.with(|pool| pool.borrow_mut().push(engine));
        }
    };
}

pub(crate) use engine_pool;
