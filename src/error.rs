//! Error taxonomy for the runtime.
//!
//! See the error handling design: contract violations are fatal and abort
//! with a log line rather than returning an [`Error`]; everything else
//! (reactor errors, I/O errors, timeouts) is represented here and
//! propagated to the caller.
use std::io;
use std::os::unix::io::RawFd;

use crate::io_manager::Interest;

/// Errors that can be returned from the fiber/scheduler/reactor/hook
/// surface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying syscall failed; `errno` is preserved in the inner
    /// [`io::Error`].
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A hooked call's deadline elapsed before the fd became ready.
    #[error("operation timed out")]
    TimedOut,

    /// The pending operation was cancelled via [`crate::io_manager::IOManager::cancel_all`].
    #[error("operation was cancelled")]
    Cancelled,

    /// `add_fd_event` was called for an `(fd, event)` pair that already has
    /// a callback armed.
    #[error("fd {fd} already has event {event:?} armed")]
    AlreadyArmed { fd: RawFd, event: Interest },

    /// `epoll_ctl`/`epoll_wait` failed for a reason other than `EINTR`.
    #[error("reactor error during {op}: {source}")]
    Reactor {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// True if this error corresponds to the hook layer's deadline-expiry
    /// path (`ETIMEDOUT`), as opposed to an error the underlying syscall
    /// itself produced.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Error::TimedOut)
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Io(e) => e,
            Error::TimedOut => io::Error::from_raw_os_error(libc::ETIMEDOUT),
            Error::Cancelled => io::Error::from_raw_os_error(libc::ECANCELED),
            Error::AlreadyArmed { .. } => io::Error::new(io::ErrorKind::AlreadyExists, error.to_string()),
            Error::Reactor { source, .. } => source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
