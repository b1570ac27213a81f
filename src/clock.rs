//! Monotonic and wall-clock time sources.
//!
//! The timer subsystem requires a monotonic clock (spec §6, "OS boundary");
//! wall-clock time is used only for log timestamps, which `env_logger`
//! supplies on its own. This mirrors the teacher's `clock.rs`, but calls
//! `libc::clock_gettime` directly instead of FFI-ing into an external
//! process.
use std::time::Duration;

fn clock_gettime(clock_id: libc::clockid_t) -> Duration {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // Safety: `ts` is a valid out-pointer and `clock_id` is one of the
    // constants below.
    let rc = unsafe { libc::clock_gettime(clock_id, &mut ts) };
    debug_assert_eq!(rc, 0, "clock_gettime failed: {}", std::io::Error::last_os_error());
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

/// Wall-clock time since the Unix epoch, in milliseconds. Used only for
/// diagnostics; never for deadline arithmetic.
pub fn realtime_ms() -> u64 {
    clock_gettime(libc::CLOCK_REALTIME).as_millis() as u64
}

/// Monotonic time in milliseconds. This is the clock the `TimerManager`
/// and all deadline computations in the hook layer are built on.
pub fn monotonic_ms() -> u64 {
    clock_gettime(libc::CLOCK_MONOTONIC).as_millis() as u64
}
