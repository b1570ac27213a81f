//! Per-fd state and the process-wide fd registry.
//!
//! Grounded on `examples/original_source/src/fdmanager.{h,cc}`: `FdCtx`
//! records whether a descriptor is a socket and whether it has been put in
//! non-blocking mode, and recv/send timeouts are tracked here rather than
//! re-queried from the kernel on every hooked call. `FdManager` replaces the
//! original's `Singleton<FdManager>` with a `OnceLock`-backed registry.
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

/// State the hook layer needs about one file descriptor.
#[derive(Debug)]
pub struct FdContext {
    fd: RawFd,
    is_socket: bool,
    is_nonblock: std::sync::atomic::AtomicBool,
    recv_timeout: RwLock<Option<Duration>>,
    send_timeout: RwLock<Option<Duration>>,
}

impl FdContext {
    /// Inspect `fd` with `fstat` and build a context for it. Non-socket fds
    /// are recorded as such and never put in non-blocking mode, matching
    /// the original's `FdCtx::init`.
    pub fn new(fd: RawFd) -> Self {
        let is_socket = is_socket(fd);
        let is_nonblock = is_socket && set_nonblock(fd, true).is_ok();
        FdContext {
            fd,
            is_socket,
            is_nonblock: std::sync::atomic::AtomicBool::new(is_nonblock),
            recv_timeout: RwLock::new(None),
            send_timeout: RwLock::new(None),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_socket(&self) -> bool {
        self.is_socket
    }

    pub fn is_nonblock(&self) -> bool {
        self.is_nonblock.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn set_nonblock(&self, nonblock: bool) -> std::io::Result<()> {
        set_nonblock(self.fd, nonblock)?;
        self.is_nonblock
            .store(nonblock, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    pub fn recv_timeout(&self) -> Option<Duration> {
        *self.recv_timeout.read().unwrap()
    }

    pub fn set_recv_timeout(&self, timeout: Option<Duration>) {
        *self.recv_timeout.write().unwrap() = timeout;
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        *self.send_timeout.read().unwrap()
    }

    pub fn set_send_timeout(&self, timeout: Option<Duration>) {
        *self.send_timeout.write().unwrap() = timeout;
    }
}

fn is_socket(fd: RawFd) -> bool {
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    // Safety: `stat` is a valid out-pointer; `fd` is owned by the caller.
    if unsafe { libc::fstat(fd, &mut stat) } != 0 {
        return false;
    }
    (stat.st_mode & libc::S_IFMT) == libc::S_IFSOCK
}

fn set_nonblock(fd: RawFd, nonblock: bool) -> std::io::Result<()> {
    // Safety: `fd` is owned by the caller for the duration of this call.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let flags = if nonblock {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Process-wide registry of [`FdContext`]s, keyed by raw fd.
#[derive(Default)]
pub struct FdManager {
    table: RwLock<HashMap<RawFd, Arc<FdContext>>>,
}

impl FdManager {
    fn global() -> &'static FdManager {
        static INSTANCE: OnceLock<FdManager> = OnceLock::new();
        INSTANCE.get_or_init(FdManager::default)
    }

    /// Fetch the context for `fd`, creating it on first use.
    pub fn get_or_create(fd: RawFd) -> Arc<FdContext> {
        let manager = Self::global();
        if let Some(ctx) = manager.table.read().unwrap().get(&fd) {
            return Arc::clone(ctx);
        }
        let mut table = manager.table.write().unwrap();
        table
            .entry(fd)
            .or_insert_with(|| Arc::new(FdContext::new(fd)))
            .clone()
    }

    /// Fetch the context for `fd` without creating one.
    pub fn get(fd: RawFd) -> Option<Arc<FdContext>> {
        Self::global().table.read().unwrap().get(&fd).cloned()
    }

    /// Drop the context for `fd`. Called from the `close` hook.
    pub fn remove(fd: RawFd) {
        Self::global().table.write().unwrap().remove(&fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_fd_is_detected_and_set_nonblocking() {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        assert!(fd >= 0);
        let ctx = FdContext::new(fd);
        assert!(ctx.is_socket());
        assert!(ctx.is_nonblock());
        unsafe { libc::close(fd) };
    }

    #[test]
    fn manager_reuses_context_for_same_fd() {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        assert!(fd >= 0);
        let a = FdManager::get_or_create(fd);
        let b = FdManager::get_or_create(fd);
        assert!(Arc::ptr_eq(&a, &b));
        FdManager::remove(fd);
        assert!(FdManager::get(fd).is_none());
        unsafe { libc::close(fd) };
    }
}
