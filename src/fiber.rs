//! Fibers: stackful, cooperatively-scheduled units of execution.
//!
//! A fiber has three states: **ready** (not currently running, eligible to
//! be resumed), **running** (executing on some OS thread) and **terminated**
//! (its body returned). Unlike the teacher's FFI-backed `Fiber`, which
//! wrapped Tarantool's own `fiber_new`/`fiber_start`/`fiber_join`, this
//! `Fiber` owns its stack directly: it wraps a [`corosensei::Coroutine`]
//! running on a [`corosensei::stack::DefaultStack`], matching the public
//! shape (`new`, `resume`, body-runs-to-completion) the teacher exposed.
//!
//! See also:
//! - [corosensei](https://docs.rs/corosensei/)
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};

/// Default stack size for a new fiber: 128 KiB, clamped up from a 16 KiB
/// floor (spec.md §3, Fiber invariants).
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;
const MIN_STACK_SIZE: usize = 16 * 1024;

fn clamp_stack_size(requested: usize) -> usize {
    requested.max(MIN_STACK_SIZE)
}

/// Uniquely identifies a fiber for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u64);

impl FiberId {
    fn next() -> FiberId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        FiberId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A fiber's lifecycle state (spec.md §3, Fiber).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    Ready,
    Running,
    Terminated,
}

/// Why a fiber yielded control back to its resumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Yield {
    /// Cooperative yield with no pending I/O; the scheduler should requeue
    /// this fiber immediately.
    Yielded,
    /// The fiber is waiting on a reactor or timer event and must not be
    /// requeued until something resumes it explicitly.
    Parked,
}

type Body = Box<dyn FnOnce() + Send>;

/// A stackful fiber.
pub struct Fiber {
    id: FiberId,
    name: Option<String>,
    stack_size: usize,
    state: FiberState,
    coroutine: RefCell<Option<Coroutine<(), Yield, ()>>>,
}

impl Fiber {
    /// Create a new fiber with the default stack size.
    pub fn new(name: impl Into<String>, body: impl FnOnce() + Send + 'static) -> Self {
        Self::with_stack_size(name, DEFAULT_STACK_SIZE, body)
    }

    /// Create a new fiber with an explicit stack size, clamped to the
    /// 16 KiB floor named in spec.md §3.
    pub fn with_stack_size(
        name: impl Into<String>,
        stack_size: usize,
        body: impl FnOnce() + Send + 'static,
    ) -> Self {
        let stack_size = clamp_stack_size(stack_size);
        Fiber {
            id: FiberId::next(),
            name: Some(name.into()),
            stack_size,
            state: FiberState::Ready,
            coroutine: RefCell::new(Some(Self::spawn_coroutine(stack_size, Box::new(body)))),
        }
    }

    fn spawn_coroutine(stack_size: usize, body: Body) -> Coroutine<(), Yield, ()> {
        let stack = DefaultStack::new(stack_size).expect("failed to allocate fiber stack");
        Coroutine::with_stack(stack, move |yielder, ()| {
            push_yielder(yielder as *const _);
            body();
            pop_yielder();
        })
    }

    pub fn id(&self) -> FiberId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn state(&self) -> FiberState {
        self.state
    }

    /// Resume this fiber until it yields or terminates. Returns the reason
    /// it gave up control, or `None` if it had already terminated.
    pub fn resume(&mut self) -> Option<Yield> {
        if self.state == FiberState::Terminated {
            return None;
        }
        self.state = FiberState::Running;
        let mut slot = self.coroutine.borrow_mut();
        let result = slot.as_mut().expect("fiber polled after reset").resume(());
        match result {
            CoroutineResult::Yield(why) => {
                self.state = FiberState::Ready;
                Some(why)
            }
            CoroutineResult::Return(()) => {
                self.state = FiberState::Terminated;
                None
            }
        }
    }

    /// Re-arm a terminated fiber with a new body, reusing the `Fiber`
    /// handle's identity (but not its stack: `corosensei` has no API to
    /// reclaim a finished coroutine's stack, so `reset` allocates a fresh
    /// `DefaultStack` of the same size — see DESIGN.md).
    ///
    /// Valid only when the fiber has terminated (spec.md §4.A); panics
    /// otherwise, matching how contract violations are handled elsewhere in
    /// this crate (spec.md §7).
    pub fn reset(&mut self, body: impl FnOnce() + Send + 'static) {
        if self.state != FiberState::Terminated {
            log::error!(
                "fiber {:?} ({:?}): reset() called while state = {:?}, not Terminated",
                self.id,
                self.name,
                self.state
            );
            panic!("Fiber::reset called on a fiber that has not terminated");
        }
        *self.coroutine.borrow_mut() = Some(Self::spawn_coroutine(self.stack_size, Box::new(body)));
        self.state = FiberState::Ready;
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }
}

impl std::fmt::Debug for Fiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}

thread_local! {
    static CURRENT_YIELDER: RefCell<Vec<*const Yielder<(), Yield>>> = RefCell::new(Vec::new());
}

fn push_yielder(yielder: *const Yielder<(), Yield>) {
    CURRENT_YIELDER.with(|stack| stack.borrow_mut().push(yielder));
}

fn pop_yielder() -> *const Yielder<(), Yield> {
    CURRENT_YIELDER.with(|stack| {
        stack
            .borrow_mut()
            .pop()
            .expect("yield_now() called outside a fiber body")
    })
}

/// Give up control of the current thread back to whatever resumed this
/// fiber, with `reason` describing why. Panics if called from outside a
/// running fiber body (spec.md §3, "yield is only meaningful inside a
/// running fiber").
///
/// The calling thread's entry is popped *before* suspending and re-pushed
/// *after* `suspend` returns, rather than once for the fiber's whole body
/// lifetime: under the M:N scheduler a fiber can be resumed on a different
/// worker thread each time, and another fiber can run on this same thread
/// while this one is parked. Registering the yielder only for the span of
/// a single `resume()` call keeps each thread's stack holding exactly the
/// fibers currently running on it.
pub fn yield_now(reason: Yield) {
    let top = pop_yielder();
    // Safety: `top` was pushed for the duration of the calling thread's
    // `resume()` of this fiber and popped just above, before suspending;
    // the fiber body's stack frame stays parked (not dropped) across the
    // suspension, so the referent is still valid once some thread resumes
    // it and `suspend` returns, at which point we re-register it below.
    unsafe { (*top).suspend(reason) };
    push_yielder(top);
}

/// True if the current OS thread is executing inside a fiber body.
pub fn is_inside_fiber() -> bool {
    CURRENT_YIELDER.with(|stack| !stack.borrow().is_empty())
}

/// Put the current fiber to sleep for at least `duration`. This is a
/// cooperative cancellation point; see [`crate::hook::sleep`] for the
/// timer-integrated version used by hooked code.
pub fn sleep(duration: std::time::Duration) {
    crate::hook::sleep(duration);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn fiber_runs_body_to_completion() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let mut fiber = Fiber::new("test", move || {
            ran2.store(true, Ordering::SeqCst);
        });
        assert_eq!(fiber.state(), FiberState::Ready);
        assert!(fiber.resume().is_none());
        assert_eq!(fiber.state(), FiberState::Terminated);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn fiber_can_yield_and_be_resumed() {
        let mut fiber = Fiber::new("test", || {
            yield_now(Yield::Yielded);
        });
        assert_eq!(fiber.resume(), Some(Yield::Yielded));
        assert_eq!(fiber.state(), FiberState::Ready);
        assert_eq!(fiber.resume(), None);
        assert_eq!(fiber.state(), FiberState::Terminated);
    }

    #[test]
    fn reset_reuses_the_handle_for_a_new_body() {
        let mut fiber = Fiber::new("test", || {});
        fiber.resume();
        assert_eq!(fiber.state(), FiberState::Terminated);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        fiber.reset(move || ran2.store(true, Ordering::SeqCst));
        assert_eq!(fiber.state(), FiberState::Ready);
        fiber.resume();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn stack_size_is_clamped_to_the_floor() {
        let fiber = Fiber::with_stack_size("test", 1024, || {});
        assert_eq!(fiber.stack_size(), MIN_STACK_SIZE);
    }
}
