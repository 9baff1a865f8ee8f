/// Helper macro for locking a mutex, propagating poisoning as [`crate::Error::LockError`]
///
/// ```rust, ignore
///  let mut free = lock!(self.free);
///  free.push(interpreter);
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().map_err(|_| crate::Error::LockError)?
    };
}

/// Helper macro for reading locked items
///
/// ```rust, ignore
///  let fields = read_lock!(instance.fields);
///  println!("{:?}", fields[0]);
/// ```
macro_rules! read_lock {
    ($rwlock:expr) => {
        $rwlock.read().map_err(|_| crate::Error::LockError)?
    };
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  let mut fields = write_lock!(instance.fields);
///  fields[0] = Value::I32(42);
/// ```
macro_rules! write_lock {
    ($rwlock:expr) => {
        $rwlock.write().map_err(|_| crate::Error::LockError)?
    };
}
