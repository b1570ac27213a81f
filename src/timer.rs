//! Timer wheel.
//!
//! Grounded on `examples/original_source/src/timer.{h,cc}`: a manager that
//! keeps an ordered set of pending timers and exposes "how long until the
//! next one fires" and "pop everything that's due", which the reactor's
//! idle loop uses to bound its `epoll_wait` timeout. The ordered set here
//! is a `BTreeMap<(u64, u64), Timer>` keyed by `(expiry_ms, insertion_seq)`
//! per SPEC_FULL.md §4.D, rather than the original's `std::multiset` with a
//! custom comparator.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::clock::monotonic_ms;

/// Uniquely identifies a scheduled timer, used to cancel or reset it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerId(u64, u64);

enum Action {
    Once(Box<dyn FnOnce() + Send>),
    Recurring(Arc<dyn Fn() + Send + Sync>),
}

struct Timer {
    interval: Option<Duration>,
    action: Action,
    /// Set by `add_condition_timer`; the timer is silently dropped instead
    /// of firing if the weak reference has no more strong owners, matching
    /// the original's cooperative-cancellation pattern for condition
    /// timers.
    condition: Option<Weak<()>>,
}

/// Tracks pending timers and answers "what's due" / "how long to wait".
#[derive(Default)]
pub struct TimerManager {
    timers: Mutex<BTreeMap<(u64, u64), Timer>>,
    seq: AtomicU64,
}

impl TimerManager {
    pub fn new() -> Self {
        TimerManager::default()
    }

    /// The process-wide timer manager the reactor and hook layer share.
    pub fn global() -> &'static TimerManager {
        static INSTANCE: std::sync::OnceLock<TimerManager> = std::sync::OnceLock::new();
        INSTANCE.get_or_init(TimerManager::default)
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn insert(&self, delay: Duration, interval: Option<Duration>, condition: Option<Weak<()>>, action: Action) -> TimerId {
        let expiry = monotonic_ms() + delay.as_millis() as u64;
        let seq = self.next_seq();
        self.timers.lock().unwrap().insert(
            (expiry, seq),
            Timer {
                interval,
                action,
                condition,
            },
        );
        TimerId(expiry, seq)
    }

    /// Schedule `callback` to run once, no earlier than `delay` from now.
    pub fn add_timer(&self, delay: Duration, callback: impl FnOnce() + Send + 'static) -> TimerId {
        self.insert(delay, None, None, Action::Once(Box::new(callback)))
    }

    /// Schedule `callback` to run every `interval`, starting `interval` from
    /// now.
    pub fn add_recurring_timer(
        &self,
        interval: Duration,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> TimerId {
        self.insert(interval, Some(interval), None, Action::Recurring(Arc::new(callback)))
    }

    /// Like [`TimerManager::add_timer`], but the timer silently drops
    /// itself instead of firing once `condition` has no more strong
    /// owners — grounded on the original's condition-timer pattern used to
    /// cancel pending I/O deadlines when the operation already completed.
    pub fn add_condition_timer(
        &self,
        delay: Duration,
        condition: Weak<()>,
        callback: impl FnOnce() + Send + 'static,
    ) -> TimerId {
        self.insert(delay, None, Some(condition), Action::Once(Box::new(callback)))
    }

    /// Cancel a pending timer. Returns `false` if it had already fired or
    /// did not exist.
    pub fn cancel(&self, id: TimerId) -> bool {
        self.timers.lock().unwrap().remove(&(id.0, id.1)).is_some()
    }

    /// Reschedule a pending timer to fire `delay` from now, preserving its
    /// callback.
    pub fn reset(&self, id: TimerId, delay: Duration) -> Option<TimerId> {
        let mut timers = self.timers.lock().unwrap();
        let timer = timers.remove(&(id.0, id.1))?;
        let expiry = monotonic_ms() + delay.as_millis() as u64;
        let seq = self.next_seq();
        timers.insert((expiry, seq), timer);
        Some(TimerId(expiry, seq))
    }

    pub fn is_empty(&self) -> bool {
        self.timers.lock().unwrap().is_empty()
    }

    /// Milliseconds until the next timer is due, or `None` if there are no
    /// pending timers. Used by the reactor to bound `epoll_wait`'s timeout.
    pub fn next_timeout_ms(&self) -> Option<u64> {
        let timers = self.timers.lock().unwrap();
        let (&(expiry, _), _) = timers.iter().next()?;
        let now = monotonic_ms();
        Some(expiry.saturating_sub(now))
    }

    /// Run every timer whose deadline has passed; recurring ones are
    /// rescheduled for their next interval before returning. Returns the
    /// number of callbacks invoked.
    pub fn collect_expired(&self) -> usize {
        let now = monotonic_ms();
        let due: Vec<Timer> = {
            let mut timers = self.timers.lock().unwrap();
            let expired_keys: Vec<(u64, u64)> =
                timers.range(..=(now, u64::MAX)).map(|(k, _)| *k).collect();
            expired_keys
                .into_iter()
                .map(|key| timers.remove(&key).unwrap())
                .collect()
        };

        let mut fired = 0;
        for timer in due {
            if let Some(condition) = &timer.condition {
                if condition.upgrade().is_none() {
                    continue;
                }
            }
            match timer.action {
                Action::Once(callback) => {
                    fired += 1;
                    callback();
                }
                Action::Recurring(callback) => {
                    fired += 1;
                    callback();
                    let interval = timer.interval.expect("recurring timer without interval");
                    self.insert(interval, Some(interval), None, Action::Recurring(callback));
                }
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn expired_timers_fire_in_order() {
        let mgr = TimerManager::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let f1 = fired.clone();
        mgr.add_timer(Duration::from_millis(0), move || f1.lock().unwrap().push(1));
        let f2 = fired.clone();
        mgr.add_timer(Duration::from_millis(0), move || f2.lock().unwrap().push(2));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(mgr.collect_expired(), 2);
        assert_eq!(*fired.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn cancel_removes_pending_timer() {
        let mgr = TimerManager::new();
        let fired = Arc::new(AtomicBool::new(false));
        let f = fired.clone();
        let id = mgr.add_timer(Duration::from_millis(50), move || f.store(true, Ordering::SeqCst));
        assert!(mgr.cancel(id));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(mgr.collect_expired(), 0);
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn condition_timer_drops_silently_once_condition_is_gone() {
        let mgr = TimerManager::new();
        let token = Arc::new(());
        let weak = Arc::downgrade(&token);
        let fired = Arc::new(AtomicBool::new(false));
        let f = fired.clone();
        mgr.add_condition_timer(Duration::from_millis(0), weak, move || {
            f.store(true, Ordering::SeqCst)
        });
        drop(token);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(mgr.collect_expired(), 0);
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn recurring_timer_reschedules_itself() {
        let mgr = TimerManager::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        mgr.add_recurring_timer(Duration::from_millis(1), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(5));
        mgr.collect_expired();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!mgr.is_empty());
    }
}
