#![allow(unused_macros)]

/// Helper macro for reading locked items, mapping a poisoned lock to [`crate::Error::LockError`]
///
/// ```rust, ignore
///  let body = read_lock!(method.body)?;
///  println!("{}", body.instructions.len());
/// ```
macro_rules! read_lock {
    ($rwlock:expr) => {
        $rwlock.read().map_err(|_| crate::Error::LockError)
    };
}

/// Helper macro for writing to locked items, mapping a poisoned lock to [`crate::Error::LockError`]
///
/// ```rust, ignore
///  let mut body = write_lock!(method.body)?;
///  *body = Some(new_body);
/// ```
macro_rules! write_lock {
    ($rwlock:expr) => {
        $rwlock.write().map_err(|_| crate::Error::LockError)
    };
}

/// Helper macro for reading locked items through a closure
///
/// ```rust, ignore
///  let count = with_read!(method.body, |body| body.as_ref().map(|b| b.instructions.len()))?;
/// ```
macro_rules! with_read {
    ($rwlock:expr, $closure:expr) => {{
        match $rwlock.read() {
            Ok(guard) => Ok($closure(&*guard)),
            Err(_) => Err(crate::Error::LockError),
        }
    }};
}
