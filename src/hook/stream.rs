//! `CoStream`/`CoListener`: convenience wrappers over the hook layer.
//!
//! Mirrors the teacher's `coio.rs` API shape (`CoIOStream`, `CoIOListener`,
//! `connect_timeout`) but every blocking operation goes through
//! [`crate::hook`] instead of an external Tarantool process — supplementing
//! spec.md per SPEC_FULL.md §9 ("coio-equivalent convenience wrappers").
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::time::Duration;

use crate::hook;
use crate::net::Address;

/// A non-blocking TCP stream whose `Read`/`Write` impls suspend the
/// current fiber instead of blocking the thread.
pub struct CoStream {
    fd: RawFd,
}

impl CoStream {
    /// Wrap an already-open fd, registering it with the hook layer's fd
    /// table.
    pub fn from_raw_fd(fd: RawFd) -> Self {
        CoStream { fd }
    }

    /// Open a non-blocking TCP connection, suspending the current fiber
    /// until it completes or `timeout` elapses.
    pub fn connect(addr: &Address, timeout: Option<Duration>) -> io::Result<Self> {
        let fd = hook::socket(libc::AF_INET, libc::SOCK_STREAM, 0)?;
        let (storage, len) = addr.to_sockaddr();
        hook::connect(fd, &storage as *const _ as *const libc::sockaddr, len, timeout).map_err(io::Error::from)?;
        Ok(CoStream { fd })
    }

    pub fn set_recv_timeout(&self, timeout: Option<Duration>) {
        crate::fd::FdManager::get_or_create(self.fd).set_recv_timeout(timeout);
    }

    pub fn set_send_timeout(&self, timeout: Option<Duration>) {
        crate::fd::FdManager::get_or_create(self.fd).set_send_timeout(timeout);
    }
}

impl Read for CoStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        hook::read(self.fd, buf)
    }
}

impl Write for CoStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        hook::write(self.fd, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsRawFd for CoStream {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl IntoRawFd for CoStream {
    fn into_raw_fd(self) -> RawFd {
        let fd = self.fd;
        std::mem::forget(self);
        fd
    }
}

impl FromRawFd for CoStream {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        CoStream { fd }
    }
}

impl Drop for CoStream {
    fn drop(&mut self) {
        let _ = hook::close(self.fd);
    }
}

/// A non-blocking TCP listener whose `accept` suspends the current fiber
/// instead of blocking the thread.
pub struct CoListener {
    fd: RawFd,
}

impl CoListener {
    /// Bind and listen on `addr`.
    pub fn bind(addr: &Address) -> io::Result<Self> {
        let fd = hook::socket(libc::AF_INET, libc::SOCK_STREAM, 0)?;
        let one: libc::c_int = 1;
        unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &one as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }
        let (storage, len) = addr.to_sockaddr();
        if unsafe { libc::bind(fd, &storage as *const _ as *const libc::sockaddr, len) } < 0 {
            let err = io::Error::last_os_error();
            let _ = hook::close(fd);
            return Err(err);
        }
        if unsafe { libc::listen(fd, 1024) } < 0 {
            let err = io::Error::last_os_error();
            let _ = hook::close(fd);
            return Err(err);
        }
        Ok(CoListener { fd })
    }

    /// Accept one connection, suspending the current fiber while none is
    /// pending.
    pub fn accept(&self) -> io::Result<(CoStream, SocketAddr)> {
        let new_fd = hook::accept(self.fd)?;
        let peer = peer_addr(new_fd).unwrap_or_else(|_| "0.0.0.0:0".parse().unwrap());
        Ok((CoStream::from_raw_fd(new_fd), peer))
    }
}

impl AsRawFd for CoListener {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for CoListener {
    fn drop(&mut self) {
        let _ = hook::close(self.fd);
    }
}

fn peer_addr(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    if unsafe { libc::getpeername(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Address::from_sockaddr_storage(&storage)
        .and_then(|addr| addr.to_std())
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "unsupported address family"))
}
