use std::{
    fmt, mem,
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use crossbeam_skiplist::SkipMap;

use crate::{
    engine::{DebugService, Interpreter, SuspendHandle},
    Result,
};

/// Reusable interpreters of one domain.
///
/// Every top level call borrows an interpreter for its whole duration; nested interpreted
/// calls stay on that interpreter. Concurrent calls therefore get distinct instances, and the
/// pool grows to the highest number of concurrent calls it has seen.
pub struct InterpreterPool {
    free: Mutex<Vec<Interpreter>>,
    live: SkipMap<u64, SuspendHandle>,
    next_id: AtomicU64,
    stack_capacity: usize,
    debug: Option<Arc<dyn DebugService>>,
}

impl InterpreterPool {
    /// An empty pool creating interpreters with `stack_capacity` slots
    #[must_use]
    pub fn new(stack_capacity: usize, debug: Option<Arc<dyn DebugService>>) -> Self {
        InterpreterPool {
            free: Mutex::new(Vec::new()),
            live: SkipMap::new(),
            next_id: AtomicU64::new(1),
            stack_capacity,
            debug,
        }
    }

    /// Borrows an idle interpreter, creating one if none is idle
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the pool lock was poisoned.
    pub fn acquire(&self) -> Result<PooledInterpreter<'_>> {
        let idle = lock!(self.free).pop();
        let interpreter = match idle {
            Some(interpreter) => interpreter,
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(interpreter = id, capacity = self.stack_capacity, "created interpreter");
                Interpreter::new(id, self.stack_capacity)
            }
        };
        self.live
            .insert(interpreter.id(), interpreter.suspend_handle().clone());
        if let Some(debug) = &self.debug {
            debug.interpreter_started(interpreter.id());
        }
        Ok(PooledInterpreter {
            pool: self,
            interpreter,
        })
    }

    fn release(&self, mut interpreter: Interpreter) {
        interpreter.clear();
        self.live.remove(&interpreter.id());
        if let Some(debug) = &self.debug {
            debug.interpreter_stopped(interpreter.id());
        }
        if let Ok(mut free) = self.free.lock() {
            free.push(interpreter);
        }
    }

    /// Number of idle interpreters
    #[must_use]
    pub fn idle(&self) -> usize {
        self.free.lock().map_or(0, |free| free.len())
    }

    /// Number of interpreters created so far
    #[must_use]
    pub fn created(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed) - 1
    }

    /// Suspend handle of a busy interpreter
    #[must_use]
    pub fn suspend_handle(&self, id: u64) -> Option<SuspendHandle> {
        self.live.get(&id).map(|entry| entry.value().clone())
    }

    /// Ids of the interpreters currently executing calls, ascending
    #[must_use]
    pub fn live_ids(&self) -> Vec<u64> {
        self.live.iter().map(|entry| *entry.key()).collect()
    }
}

impl fmt::Debug for InterpreterPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpreterPool")
            .field("idle", &self.idle())
            .field("live", &self.live.len())
            .field("created", &self.created())
            .finish()
    }
}

/// An interpreter borrowed from the pool; it goes back when dropped.
pub struct PooledInterpreter<'p> {
    pool: &'p InterpreterPool,
    interpreter: Interpreter,
}

impl Deref for PooledInterpreter<'_> {
    type Target = Interpreter;

    fn deref(&self) -> &Interpreter {
        &self.interpreter
    }
}

impl DerefMut for PooledInterpreter<'_> {
    fn deref_mut(&mut self) -> &mut Interpreter {
        &mut self.interpreter
    }
}

impl Drop for PooledInterpreter<'_> {
    fn drop(&mut self) {
        let interpreter = mem::replace(&mut self.interpreter, Interpreter::new(0, 0));
        self.pool.release(interpreter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn interpreters_are_reused() {
        let pool = InterpreterPool::new(64, None);
        let first = pool.acquire().unwrap().id();
        assert_eq!(pool.idle(), 1);
        let again = pool.acquire().unwrap();
        assert_eq!(again.id(), first);
        assert_eq!(pool.created(), 1);
    }

    #[test]
    fn concurrent_borrows_get_distinct_instances() {
        let pool = InterpreterPool::new(64, None);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.live_ids(), vec![a.id(), b.id()]);
        assert!(pool.suspend_handle(a.id()).is_some());
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 2);
        assert!(pool.live_ids().is_empty());
    }

    #[derive(Default)]
    struct Counting {
        started: AtomicUsize,
        stopped: AtomicUsize,
    }

    impl DebugService for Counting {
        fn interpreter_started(&self, _interpreter: u64) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn interpreter_stopped(&self, _interpreter: u64) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn debugger_sees_lifecycle() {
        let debug = Arc::new(Counting::default());
        let pool = InterpreterPool::new(64, Some(debug.clone() as Arc<dyn DebugService>));
        drop(pool.acquire().unwrap());
        drop(pool.acquire().unwrap());
        assert_eq!(debug.started.load(Ordering::SeqCst), 2);
        assert_eq!(debug.stopped.load(Ordering::SeqCst), 2);
    }
}
