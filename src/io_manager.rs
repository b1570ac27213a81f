//! The epoll reactor.
//!
//! Grounded on `examples/original_source/src/iomanager.h`: one epoll
//! instance, a per-fd map of armed interests to callbacks (`FdContext` /
//! `EventContext` there), and a wakeup mechanism so a thread blocked in
//! `epoll_wait` can be kicked when a new event is registered from another
//! thread. The original uses a pipe for that; this uses a Linux `eventfd`,
//! per spec.md §4.F's self-pipe note. Raw syscalls are issued the way the
//! teacher's `coio.rs` issues them: directly through `libc`, no abstraction
//! layer in between.
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::{Mutex, OnceLock, RwLock};

use crate::error::{Error, Result};

bitflags::bitflags! {
    /// Readiness interests a caller can register for a fd. Mirrors the
    /// original's `IOManager::Event` (`NONE`/`READ`/`WRITE`/`RW`), renamed
    /// to avoid clashing with `std::io`.
    pub struct Interest: u32 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

impl Interest {
    fn to_epoll(self) -> u32 {
        let mut bits = 0u32;
        if self.contains(Interest::READ) {
            bits |= libc::EPOLLIN as u32;
        }
        if self.contains(Interest::WRITE) {
            bits |= libc::EPOLLOUT as u32;
        }
        bits
    }

    fn from_epoll(events: u32) -> Interest {
        let mut interest = Interest::empty();
        if events & (libc::EPOLLIN as u32) != 0 {
            interest |= Interest::READ;
        }
        if events & (libc::EPOLLOUT as u32) != 0 {
            interest |= Interest::WRITE;
        }
        // HUP/ERR are reported as both readable and writable so whichever
        // side is waiting gets a chance to observe the failure via the next
        // syscall, matching the original's error-coalescing behaviour.
        if events & ((libc::EPOLLHUP | libc::EPOLLERR) as u32) != 0 {
            interest = Interest::READ | Interest::WRITE;
        }
        interest
    }
}

/// Why a registered callback is being invoked: the fd became ready, or the
/// registration was torn down before that happened (`cancel_all`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireReason {
    Ready,
    Cancelled,
}

type Callback = Box<dyn FnOnce(FireReason) + Send>;

#[derive(Default)]
struct FdRecord {
    callbacks: Mutex<HashMap<u32, Callback>>,
    /// The interest mask currently installed in epoll for this fd. Tracked
    /// separately from `callbacks` because a callback is removed from the
    /// map the instant it fires, in `poll`, but the fd's epoll registration
    /// is only updated/torn down once that removal has decided whether
    /// anything is still armed -- using the (already-drained) callback map
    /// to choose ADD vs MOD would re-issue ADD on a still-registered fd.
    armed: Mutex<u32>,
}

/// The process-wide epoll reactor.
pub struct IOManager {
    epfd: RawFd,
    wakeup_fd: RawFd,
    fds: RwLock<HashMap<RawFd, FdRecord>>,
}

impl IOManager {
    fn new() -> Result<Self> {
        let epfd = checked(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) }, "epoll_create1")?;
        let wakeup_fd = checked(
            unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) },
            "eventfd",
        )?;
        let manager = IOManager {
            epfd,
            wakeup_fd,
            fds: RwLock::new(HashMap::new()),
        };
        manager.epoll_add_raw(wakeup_fd, libc::EPOLLIN as u32)?;
        Ok(manager)
    }

    /// The single process-wide reactor instance.
    pub fn global() -> &'static IOManager {
        static INSTANCE: OnceLock<IOManager> = OnceLock::new();
        INSTANCE.get_or_init(|| IOManager::new().expect("failed to initialize the epoll reactor"))
    }

    pub fn backend_fd(&self) -> RawFd {
        self.epfd
    }

    /// Arm `interest` on `fd`, running `callback` the next time that
    /// interest becomes ready. Returns [`Error::AlreadyArmed`] if `interest`
    /// is already registered for this fd, matching the original's
    /// single-pending-waiter-per-event rule (see REDESIGN FLAGS).
    pub fn add_fd_event(&self, fd: RawFd, interest: Interest, callback: Callback) -> Result<()> {
        let fds = self.fds.read().unwrap();
        if let Some(record) = fds.get(&fd) {
            {
                let mut callbacks = record.callbacks.lock().unwrap();
                for bit in [Interest::READ, Interest::WRITE] {
                    if interest.contains(bit) && callbacks.contains_key(&bit.bits()) {
                        return Err(Error::AlreadyArmed { fd, event: bit });
                    }
                }
                callbacks.insert(interest.bits(), callback);
            }
            let mut armed = record.armed.lock().unwrap();
            let combined = Interest::from_bits_truncate(*armed) | interest;
            self.epoll_ctl(fd, libc::EPOLL_CTL_MOD, combined.to_epoll() | libc::EPOLLET as u32)?;
            *armed = combined.bits();
            return Ok(());
        }
        drop(fds);

        {
            let mut fds = self.fds.write().unwrap();
            let record = fds.entry(fd).or_default();
            record.callbacks.lock().unwrap().insert(interest.bits(), callback);
            *record.armed.lock().unwrap() = interest.bits();
        }
        // `record` exists in the map the instant an fd is first armed, and
        // only ever leaves it once nothing is armed any more (`del_fd_event`,
        // `poll`, `cancel_all`), so its presence/absence tracks real epoll
        // registration and fixes ADD vs MOD without racing a concurrent
        // `poll` that might otherwise observe a stale, already-drained mask.
        if let Err(e) = self.epoll_ctl(fd, libc::EPOLL_CTL_ADD, interest.to_epoll() | libc::EPOLLET as u32) {
            self.fds.write().unwrap().remove(&fd);
            return Err(e);
        }
        Ok(())
    }

    /// Disarm `interest` on `fd`. No-op if it was not armed.
    pub fn del_fd_event(&self, fd: RawFd, interest: Interest) -> Result<()> {
        let fds = self.fds.read().unwrap();
        let Some(record) = fds.get(&fd) else {
            return Ok(());
        };
        let remaining_mask = {
            let mut callbacks = record.callbacks.lock().unwrap();
            for bit in [Interest::READ, Interest::WRITE] {
                if interest.contains(bit) {
                    callbacks.remove(&bit.bits());
                }
            }
            let mut armed = record.armed.lock().unwrap();
            *armed &= !interest.bits();
            *armed
        };
        drop(fds);

        if remaining_mask == 0 {
            self.epoll_ctl(fd, libc::EPOLL_CTL_DEL, 0)?;
            self.fds.write().unwrap().remove(&fd);
        } else {
            let remaining = Interest::from_bits_truncate(remaining_mask);
            self.epoll_ctl(fd, libc::EPOLL_CTL_MOD, remaining.to_epoll() | libc::EPOLLET as u32)?;
        }
        Ok(())
    }

    /// Tear down every pending registration for `fd`, running each armed
    /// callback once with [`FireReason::Cancelled`] so a fiber parked on it
    /// resumes instead of hanging forever (spec.md §8, "cancel-during-
    /// pending-read"). Used by the `close` hook and explicit cancellation.
    pub fn cancel_all(&self, fd: RawFd) {
        let _ = self.epoll_ctl(fd, libc::EPOLL_CTL_DEL, 0);
        let record = self.fds.write().unwrap().remove(&fd);
        if let Some(record) = record {
            let callbacks: Vec<Callback> = record.callbacks.lock().unwrap().drain().map(|(_, cb)| cb).collect();
            for cb in callbacks {
                cb(FireReason::Cancelled);
            }
        }
    }

    /// Block in `epoll_wait` for up to `timeout_ms` (`None` = forever),
    /// running the callbacks for whatever fds became ready. Returns the
    /// number of callbacks invoked. This is the idle-fiber body the
    /// scheduler runs when its task queue is empty (spec.md §4.F).
    pub fn poll(&self, timeout_ms: Option<i32>) -> Result<usize> {
        let mut events: [libc::epoll_event; 64] = unsafe { std::mem::zeroed() };
        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                events.as_mut_ptr(),
                events.len() as i32,
                timeout_ms.unwrap_or(-1),
            )
        };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(Error::Reactor {
                op: "epoll_wait",
                source: err,
            });
        }

        let mut fired = 0;
        for event in &events[..n as usize] {
            let fd = event.u64 as RawFd;
            if fd == self.wakeup_fd {
                self.drain_wakeup();
                continue;
            }
            let ready = Interest::from_epoll(event.events);
            let (callbacks, remaining_mask) = {
                let fds = self.fds.read().unwrap();
                let Some(record) = fds.get(&fd) else {
                    continue;
                };
                let mut callbacks = record.callbacks.lock().unwrap();
                let mut ready_callbacks = Vec::new();
                for bit in [Interest::READ, Interest::WRITE] {
                    if ready.contains(bit) {
                        if let Some(cb) = callbacks.remove(&bit.bits()) {
                            ready_callbacks.push(cb);
                        }
                    }
                }
                let mut armed = record.armed.lock().unwrap();
                *armed &= !ready.bits();
                (ready_callbacks, *armed)
            };
            // A fired callback's interest is no longer armed in epoll once
            // it has run; if nothing else is armed on this fd, drop the
            // registration entirely so a later `add_fd_event` on the same
            // fd sees "not registered" and issues ADD rather than hitting
            // EEXIST on a still-registered-but-empty record.
            if remaining_mask == 0 {
                let _ = self.epoll_ctl(fd, libc::EPOLL_CTL_DEL, 0);
                self.fds.write().unwrap().remove(&fd);
            } else {
                let remaining = Interest::from_bits_truncate(remaining_mask);
                let _ = self.epoll_ctl(fd, libc::EPOLL_CTL_MOD, remaining.to_epoll() | libc::EPOLLET as u32);
            }
            for cb in callbacks {
                fired += 1;
                cb(FireReason::Ready);
            }
        }
        Ok(fired)
    }

    /// Unblock a thread parked in `poll`, e.g. after registering a new event
    /// from another thread.
    pub fn wakeup(&self) {
        let value: u64 = 1;
        unsafe {
            libc::write(
                self.wakeup_fd,
                &value as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }

    fn drain_wakeup(&self) {
        let mut buf = [0u8; 8];
        unsafe {
            libc::read(self.wakeup_fd, buf.as_mut_ptr() as *mut libc::c_void, 8);
        }
    }

    fn epoll_add_raw(&self, fd: RawFd, events: u32) -> Result<()> {
        self.epoll_ctl(fd, libc::EPOLL_CTL_ADD, events)
    }

    fn epoll_ctl(&self, fd: RawFd, op: i32, events: u32) -> Result<()> {
        let mut event = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        let ptr = if op == libc::EPOLL_CTL_DEL {
            std::ptr::null_mut()
        } else {
            &mut event as *mut _
        };
        checked(unsafe { libc::epoll_ctl(self.epfd, op, fd, ptr) }, "epoll_ctl")?;
        Ok(())
    }
}

impl Drop for IOManager {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
            libc::close(self.wakeup_fd);
        }
    }
}

fn checked(rc: i32, op: &'static str) -> Result<i32> {
    if rc < 0 {
        Err(Error::Reactor {
            op,
            source: std::io::Error::last_os_error(),
        })
    } else {
        Ok(rc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn wake_on_socketpair_write() {
        let mut fds = [0; 2];
        assert_eq!(
            unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) },
            0
        );
        let (a, b) = (fds[0], fds[1]);
        let manager = IOManager::global();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        manager
            .add_fd_event(a, Interest::READ, Box::new(move |_reason| fired2.store(true, Ordering::SeqCst)))
            .unwrap();
        unsafe { libc::write(b, b"x".as_ptr() as *const libc::c_void, 1) };
        manager.poll(Some(1000)).unwrap();
        assert!(fired.load(Ordering::SeqCst));
        manager.cancel_all(a);
        unsafe {
            libc::close(a);
            libc::close(b);
        }
    }

    #[test]
    fn double_arm_same_interest_is_rejected() {
        let mut fds = [0; 2];
        assert_eq!(
            unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) },
            0
        );
        let (a, _b) = (fds[0], fds[1]);
        let manager = IOManager::global();
        manager.add_fd_event(a, Interest::READ, Box::new(|_| {})).unwrap();
        let err = manager.add_fd_event(a, Interest::READ, Box::new(|_| {})).unwrap_err();
        assert!(matches!(err, Error::AlreadyArmed { .. }));
        manager.cancel_all(a);
        unsafe { libc::close(a) };
        unsafe { libc::close(fds[1]) };
    }

    #[test]
    fn cancel_all_fires_pending_callback_as_cancelled() {
        let mut fds = [0; 2];
        assert_eq!(
            unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) },
            0
        );
        let (a, b) = (fds[0], fds[1]);
        let manager = IOManager::global();
        let reason_seen = Arc::new(Mutex::new(None));
        let seen2 = reason_seen.clone();
        manager
            .add_fd_event(a, Interest::READ, Box::new(move |reason| *seen2.lock().unwrap() = Some(reason)))
            .unwrap();
        manager.cancel_all(a);
        assert_eq!(*reason_seen.lock().unwrap(), Some(FireReason::Cancelled));
        unsafe {
            libc::close(a);
            libc::close(b);
        }
    }

    #[test]
    fn second_hooked_op_on_same_fd_after_first_fires_does_not_hit_eexist() {
        let mut fds = [0; 2];
        assert_eq!(
            unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) },
            0
        );
        let (a, b) = (fds[0], fds[1]);
        let manager = IOManager::global();

        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        manager
            .add_fd_event(
                a,
                Interest::READ,
                Box::new(move |_| {
                    let mut byte = [0u8; 1];
                    unsafe { libc::read(a, byte.as_mut_ptr() as *mut libc::c_void, 1) };
                    fired2.store(true, Ordering::SeqCst)
                }),
            )
            .unwrap();
        unsafe { libc::write(b, b"x".as_ptr() as *const libc::c_void, 1) };
        manager.poll(Some(1000)).unwrap();
        assert!(fired.load(Ordering::SeqCst));

        // The fd's first parked op has fired and drained; arming a second
        // one on the same fd must not see it as still epoll-registered.
        let fired3 = Arc::new(AtomicBool::new(false));
        let fired4 = fired3.clone();
        manager
            .add_fd_event(a, Interest::READ, Box::new(move |_| fired4.store(true, Ordering::SeqCst)))
            .unwrap();
        unsafe { libc::write(b, b"y".as_ptr() as *const libc::c_void, 1) };
        manager.poll(Some(1000)).unwrap();
        assert!(fired3.load(Ordering::SeqCst));

        manager.cancel_all(a);
        unsafe {
            libc::close(a);
            libc::close(b);
        }
    }
}
