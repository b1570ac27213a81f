//! Hook layer: blocking-call look-alikes that suspend the current fiber
//! instead of blocking the thread.
//!
//! Grounded on `examples/original_source/src/hook.{h,cc}`: the original
//! intercepts libc symbols at link time. SPEC_FULL.md §4.G licenses a
//! portable substitute — plain Rust functions callers invoke explicitly —
//! which is what this module provides. The generic retry/suspend/resume
//! algorithm (`do_io`) is the one spec.md §4.G describes step by step; each
//! public function here is a thin instantiation of it over one libc call.
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::fd::FdManager;
use crate::fiber::{self, Yield};
use crate::io_manager::{FireReason, IOManager, Interest};
use crate::scheduler::{self, RescheduleHandle};
use crate::timer::{TimerId, TimerManager};

static HOOK_ENABLED: AtomicBool = AtomicBool::new(false);

/// Process-wide switch (spec.md §4.G, "control switch"). Off by default:
/// every hook forwards straight to the underlying syscall until a caller
/// opts in.
pub fn set_hook_enabled(enabled: bool) {
    HOOK_ENABLED.store(enabled, Ordering::SeqCst);
}

pub fn is_hook_enabled() -> bool {
    HOOK_ENABLED.load(Ordering::SeqCst)
}

fn should_hook(fd: RawFd) -> bool {
    is_hook_enabled()
        && fiber::is_inside_fiber()
        && FdManager::get(fd)
            .map(|ctx| ctx.is_socket() && ctx.is_nonblock())
            .unwrap_or(false)
}

fn would_block(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(code) if code == libc::EAGAIN || code == libc::EWOULDBLOCK
    )
}

fn result_from_rc(rc: isize) -> io::Result<usize> {
    if rc >= 0 {
        Ok(rc as usize)
    } else {
        Err(io::Error::last_os_error())
    }
}

type TryOnce = Box<dyn FnMut() -> isize + Send>;

/// The algorithm described in spec.md §4.G: retry once inline, and if that
/// would block, arm an edge-triggered fd-event (re-arming itself on
/// repeated EAGAIN) plus an optional timeout, then park the current fiber
/// until one of the two resolves it.
fn do_io(fd: RawFd, interest: Interest, mut try_once: TryOnce) -> io::Result<usize> {
    if !should_hook(fd) {
        return result_from_rc(try_once());
    }

    let rc = try_once();
    if rc >= 0 {
        return Ok(rc as usize);
    }
    let err = io::Error::last_os_error();
    if !would_block(&err) {
        return Err(err);
    }

    let ctx = FdManager::get_or_create(fd);
    let timeout = match interest {
        Interest::READ => ctx.recv_timeout(),
        Interest::WRITE => ctx.send_timeout(),
        _ => None,
    };

    let outcome: Arc<Mutex<Option<io::Result<usize>>>> = Arc::new(Mutex::new(None));
    let done = Arc::new(AtomicBool::new(false));
    let handle = scheduler::current_reschedule_handle();
    let try_once = Arc::new(Mutex::new(try_once));
    let timer_id: Arc<Mutex<Option<TimerId>>> = Arc::new(Mutex::new(None));

    if let Some(dur) = timeout {
        let done2 = done.clone();
        let outcome2 = outcome.clone();
        let handle2 = handle.clone();
        let id = TimerManager::global().add_timer(dur, move || {
            if done2.swap(true, Ordering::SeqCst) {
                return;
            }
            let _ = IOManager::global().del_fd_event(fd, interest);
            *outcome2.lock().unwrap() = Some(Err(io::Error::from_raw_os_error(libc::ETIMEDOUT)));
            handle2();
        });
        *timer_id.lock().unwrap() = Some(id);
    }

    arm_retry(fd, interest, try_once, done, outcome.clone(), handle, timer_id);

    fiber::yield_now(Yield::Parked);

    outcome
        .lock()
        .unwrap()
        .take()
        .unwrap_or_else(|| Err(io::Error::from_raw_os_error(libc::ETIMEDOUT)))
}

fn arm_retry(
    fd: RawFd,
    interest: Interest,
    try_once: Arc<Mutex<TryOnce>>,
    done: Arc<AtomicBool>,
    outcome: Arc<Mutex<Option<io::Result<usize>>>>,
    handle: RescheduleHandle,
    timer_id: Arc<Mutex<Option<TimerId>>>,
) {
    let cb: Box<dyn FnOnce(FireReason) + Send> = Box::new(move |reason| {
        if done.load(Ordering::SeqCst) {
            return;
        }
        if reason == FireReason::Cancelled {
            if done.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(id) = timer_id.lock().unwrap().take() {
                TimerManager::global().cancel(id);
            }
            *outcome.lock().unwrap() = Some(Err(io::Error::from_raw_os_error(libc::ECANCELED)));
            handle();
            return;
        }
        let rc = (try_once.lock().unwrap())();
        if rc >= 0 {
            if done.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(id) = timer_id.lock().unwrap().take() {
                TimerManager::global().cancel(id);
            }
            *outcome.lock().unwrap() = Some(Ok(rc as usize));
            handle();
            return;
        }
        let err = io::Error::last_os_error();
        if !would_block(&err) {
            if done.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(id) = timer_id.lock().unwrap().take() {
                TimerManager::global().cancel(id);
            }
            *outcome.lock().unwrap() = Some(Err(err));
            handle();
            return;
        }
        arm_retry(fd, interest, try_once, done, outcome, handle, timer_id);
    });
    // A re-arm race (event fires between the timer marking `done` and this
    // registration) is logged and dropped rather than panicking; the timer
    // callback already resolved the caller in that case.
    if let Err(e) = IOManager::global().add_fd_event(fd, interest, cb) {
        log::warn!("hook: add_fd_event failed for fd {fd}: {e}");
    }
}

/// Put the current fiber to sleep for at least `duration` without blocking
/// its worker thread (spec.md §4.G, "sleep-family").
pub fn sleep(duration: Duration) {
    if !is_hook_enabled() || !fiber::is_inside_fiber() {
        std::thread::sleep(duration);
        return;
    }
    let handle = scheduler::current_reschedule_handle();
    TimerManager::global().add_timer(duration, move || handle());
    fiber::yield_now(Yield::Parked);
}

/// Open a socket and, on success, register it with [`FdManager`] so later
/// hooked calls treat it as a non-blocking socket.
pub fn socket(domain: i32, ty: i32, protocol: i32) -> io::Result<RawFd> {
    let fd = unsafe { libc::socket(domain, ty, protocol) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    FdManager::get_or_create(fd);
    Ok(fd)
}

/// Cancel all pending epoll registrations for `fd`, drop its [`FdContext`](crate::fd::FdContext),
/// then close it.
pub fn close(fd: RawFd) -> io::Result<()> {
    IOManager::global().cancel_all(fd);
    FdManager::remove(fd);
    if unsafe { libc::close(fd) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Non-blocking connect with an optional timeout (spec.md §4.G, `connect`).
pub fn connect(fd: RawFd, addr: *const libc::sockaddr, addr_len: libc::socklen_t, timeout: Option<Duration>) -> Result<()> {
    let rc = unsafe { libc::connect(fd, addr, addr_len) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::EINPROGRESS) || !should_hook(fd) {
        return Err(Error::Io(err));
    }

    let outcome = Arc::new(Mutex::new(None::<Result<()>>));
    let done = Arc::new(AtomicBool::new(false));
    let handle = scheduler::current_reschedule_handle();

    {
        let done2 = done.clone();
        let outcome2 = outcome.clone();
        let handle2 = handle.clone();
        let cb: Box<dyn FnOnce(FireReason) + Send> = Box::new(move |reason| {
            if done2.swap(true, Ordering::SeqCst) {
                return;
            }
            let result = match reason {
                FireReason::Ready => Ok(()),
                FireReason::Cancelled => Err(Error::Cancelled),
            };
            *outcome2.lock().unwrap() = Some(result);
            handle2();
        });
        IOManager::global().add_fd_event(fd, Interest::WRITE, cb)?;
    }

    if let Some(dur) = timeout {
        let done2 = done.clone();
        let outcome2 = outcome.clone();
        let handle2 = handle.clone();
        TimerManager::global().add_timer(dur, move || {
            if done2.swap(true, Ordering::SeqCst) {
                return;
            }
            let _ = IOManager::global().del_fd_event(fd, Interest::WRITE);
            *outcome2.lock().unwrap() = Some(Err(Error::TimedOut));
            handle2();
        });
    }

    fiber::yield_now(Yield::Parked);

    let resolved = outcome.lock().unwrap().take().unwrap_or(Err(Error::TimedOut));
    resolved?;

    let mut so_error: i32 = 0;
    let mut len = std::mem::size_of::<i32>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut so_error as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc == 0 && so_error != 0 {
        return Err(Error::Io(io::Error::from_raw_os_error(so_error)));
    }
    Ok(())
}

/// Accept a connection, suspending the current fiber while none is pending.
pub fn accept(fd: RawFd) -> io::Result<RawFd> {
    let new_fd = do_io(fd, Interest::READ, Box::new(move || unsafe {
        libc::accept(fd, std::ptr::null_mut(), std::ptr::null_mut()) as isize
    }))? as RawFd;
    FdManager::get_or_create(new_fd);
    Ok(new_fd)
}

pub fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let ptr = buf.as_mut_ptr();
    let len = buf.len();
    do_io(fd, Interest::READ, Box::new(move || unsafe {
        libc::read(fd, ptr as *mut libc::c_void, len) as isize
    }))
}

pub fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let ptr = buf.as_ptr();
    let len = buf.len();
    do_io(fd, Interest::WRITE, Box::new(move || unsafe {
        libc::write(fd, ptr as *const libc::c_void, len) as isize
    }))
}

pub fn recv(fd: RawFd, buf: &mut [u8], flags: i32) -> io::Result<usize> {
    let ptr = buf.as_mut_ptr();
    let len = buf.len();
    do_io(fd, Interest::READ, Box::new(move || unsafe {
        libc::recv(fd, ptr as *mut libc::c_void, len, flags) as isize
    }))
}

pub fn send(fd: RawFd, buf: &[u8], flags: i32) -> io::Result<usize> {
    let ptr = buf.as_ptr();
    let len = buf.len();
    do_io(fd, Interest::WRITE, Box::new(move || unsafe {
        libc::send(fd, ptr as *const libc::c_void, len, flags) as isize
    }))
}

pub fn recvfrom(
    fd: RawFd,
    buf: &mut [u8],
    flags: i32,
    addr: *mut libc::sockaddr,
    addr_len: *mut libc::socklen_t,
) -> io::Result<usize> {
    let ptr = buf.as_mut_ptr();
    let len = buf.len();
    do_io(fd, Interest::READ, Box::new(move || unsafe {
        libc::recvfrom(fd, ptr as *mut libc::c_void, len, flags, addr, addr_len) as isize
    }))
}

pub fn sendto(
    fd: RawFd,
    buf: &[u8],
    flags: i32,
    addr: *const libc::sockaddr,
    addr_len: libc::socklen_t,
) -> io::Result<usize> {
    let ptr = buf.as_ptr();
    let len = buf.len();
    do_io(fd, Interest::WRITE, Box::new(move || unsafe {
        libc::sendto(fd, ptr as *const libc::c_void, len, flags, addr, addr_len) as isize
    }))
}

pub fn readv(fd: RawFd, iov: &mut [libc::iovec]) -> io::Result<usize> {
    let ptr = iov.as_mut_ptr();
    let len = iov.len() as i32;
    do_io(fd, Interest::READ, Box::new(move || unsafe {
        libc::readv(fd, ptr, len) as isize
    }))
}

pub fn writev(fd: RawFd, iov: &[libc::iovec]) -> io::Result<usize> {
    let ptr = iov.as_ptr();
    let len = iov.len() as i32;
    do_io(fd, Interest::WRITE, Box::new(move || unsafe {
        libc::writev(fd, ptr, len) as isize
    }))
}

pub fn recvmsg(fd: RawFd, msg: *mut libc::msghdr, flags: i32) -> io::Result<usize> {
    let msg = msg as usize;
    do_io(fd, Interest::READ, Box::new(move || unsafe {
        libc::recvmsg(fd, msg as *mut libc::msghdr, flags) as isize
    }))
}

pub fn sendmsg(fd: RawFd, msg: *const libc::msghdr, flags: i32) -> io::Result<usize> {
    let msg = msg as usize;
    do_io(fd, Interest::WRITE, Box::new(move || unsafe {
        libc::sendmsg(fd, msg as *const libc::msghdr, flags) as isize
    }))
}

pub mod stream;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use std::time::Duration;

    #[test]
    fn sleep_without_hooking_just_blocks_the_thread() {
        set_hook_enabled(false);
        let start = std::time::Instant::now();
        sleep(Duration::from_millis(10));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn hooked_sleep_suspends_and_resumes_inside_a_fiber() {
        set_hook_enabled(true);
        let scheduler = Scheduler::new("hook-test", 1, false);
        scheduler.start();
        let done = Arc::new(AtomicBool::new(false));
        let done2 = done.clone();
        scheduler.spawn(crate::fiber::Fiber::new("sleeper", move || {
            sleep(Duration::from_millis(10));
            done2.store(true, Ordering::SeqCst);
        }));
        std::thread::sleep(Duration::from_millis(200));
        scheduler.stop();
        assert!(done.load(Ordering::SeqCst));
        set_hook_enabled(false);
    }
}
