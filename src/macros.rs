//! Small helper macros shared across the `io::sys` backends.
//!
//! Mirrors the `syscall!` helper mio's `sys/unix` modules use to turn a raw
//! libc return value into an `io::Result`, without pulling in a crate just
//! for that.

#![allow(unused_macros)]

/// Runs a libc call, mapping a `-1` return into `io::Error::last_os_error()`.
///
/// ```ignore
/// let fd = syscall!(socket(libc::AF_INET, libc::SOCK_STREAM, 0))?;
/// ```
macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)* ) ) => {{
        #[allow(unused_unsafe)]
        let res = unsafe { libc::$fn($($arg),*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}
