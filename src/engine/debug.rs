use std::{
    fmt,
    sync::{Arc, Condvar, Mutex},
};

use crate::{engine::StackTraceEntry, metadata::module::ModuleId, Result};

/// Hooks of an attached debugger.
///
/// Every method has an empty default, so a service only implements what it listens for. The
/// engine calls the hooks synchronously on the thread that triggered them.
pub trait DebugService: Send + Sync {
    /// A module was loaded into the domain
    fn module_loaded(&self, _module: ModuleId, _name: &str) {}

    /// An interpreter instance was handed out for a call
    fn interpreter_started(&self, _interpreter: u64) {}

    /// An interpreter instance went back to the pool
    fn interpreter_stopped(&self, _interpreter: u64) {}

    /// A `break` instruction suspended `interpreter`; it stays blocked until `handle` is
    /// resumed
    fn breakpoint_hit(&self, _interpreter: u64, _trace: &[StackTraceEntry], _handle: &SuspendHandle) {}
}

/// Blocks one interpreter until an external resume.
#[derive(Clone, Default)]
pub struct SuspendHandle {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl SuspendHandle {
    /// A handle in the running state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the interpreter as suspended; the next [`SuspendHandle::wait`] blocks
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the state lock was poisoned.
    pub fn suspend(&self) -> Result<()> {
        *lock!(self.state.0) = true;
        Ok(())
    }

    /// Releases a suspended interpreter
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the state lock was poisoned.
    pub fn resume(&self) -> Result<()> {
        *lock!(self.state.0) = false;
        self.state.1.notify_all();
        Ok(())
    }

    /// Returns true while the interpreter is suspended
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.state.0.lock().map(|s| *s).unwrap_or(false)
    }

    /// Blocks the calling thread while suspended
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the state lock was poisoned.
    pub fn wait(&self) -> Result<()> {
        let (suspended, resumed) = &*self.state;
        let mut guard = lock!(suspended);
        while *guard {
            guard = resumed.wait(guard).map_err(|_| crate::Error::LockError)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SuspendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendHandle")
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};

    #[test]
    fn wait_returns_after_resume() {
        let handle = SuspendHandle::new();
        handle.suspend().unwrap();
        assert!(handle.is_suspended());

        let waiter = handle.clone();
        let join = thread::spawn(move || waiter.wait());
        thread::sleep(Duration::from_millis(20));
        handle.resume().unwrap();
        join.join().unwrap().unwrap();
        assert!(!handle.is_suspended());
    }

    #[test]
    fn wait_without_suspend_does_not_block() {
        SuspendHandle::new().wait().unwrap();
    }
}
