//! The M:N task scheduler.
//!
//! Grounded on `examples/original_source/src/scheduler.h`: a fixed pool of
//! worker threads pulling from one FIFO task queue, with a `use_caller`
//! option so the thread that constructs the scheduler also runs tasks
//! instead of sitting idle. The queue itself is a `VecDeque` behind a
//! `std::sync::Mutex`/`Condvar` pair per SPEC_FULL.md §4.C and §5's lock
//! model, in the same direct-`std::sync` style the teacher's `coio.rs`
//! uses for fd state.
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::cell::RefCell;

use crate::fiber::{Fiber, Yield};
use crate::io_manager::IOManager;
use crate::thread::Thread;
use crate::timer::TimerManager;

/// Upper bound on how long a worker blocks in the reactor while its queue
/// is empty (spec.md Design Notes, `DEFAULT_TICK`).
const DEFAULT_TICK_MS: u64 = 3000;

type FiberCell = Arc<Mutex<Option<Fiber>>>;
pub type RescheduleHandle = Arc<dyn Fn() + Send + Sync>;

struct Task {
    cell: FiberCell,
    /// Worker index this task must run on, or `-1` for "any worker"
    /// (spec.md §4.C, `schedule(task, thread_affinity=-1)`).
    affinity: i64,
}

/// No thread affinity: the task may run on any worker.
pub const ANY_WORKER: i64 = -1;

struct Queue {
    tasks: Mutex<VecDeque<Task>>,
    cond: Condvar,
}

/// A pool of worker threads draining one shared FIFO queue of fibers.
pub struct Scheduler {
    name: String,
    queue: Queue,
    stopped: AtomicBool,
    use_caller: bool,
    worker_count: usize,
    workers: Mutex<Vec<Thread>>,
}

impl Scheduler {
    /// Build a scheduler with `worker_count` dedicated OS threads. If
    /// `use_caller` is set, the thread that later calls
    /// [`Scheduler::run_caller_loop`] also drains the queue, matching the
    /// original's `use_caller` constructor argument.
    pub fn new(name: impl Into<String>, worker_count: usize, use_caller: bool) -> Arc<Scheduler> {
        Arc::new(Scheduler {
            name: name.into(),
            queue: Queue {
                tasks: Mutex::new(VecDeque::new()),
                cond: Condvar::new(),
            },
            stopped: AtomicBool::new(false),
            use_caller,
            worker_count,
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the dedicated worker threads. Does not block; if `use_caller`
    /// was set, call [`Scheduler::run_caller_loop`] afterwards on the
    /// thread you want to also participate.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock().unwrap();
        for i in 0..self.worker_count {
            let scheduler = self.clone();
            let thread_name = format!("{}-{}", self.name, i);
            let worker_id = i as i64;
            workers.push(Thread::spawn(thread_name, move |stop| {
                scheduler.worker_loop(&stop, worker_id);
            }));
        }
    }

    /// Run the drain loop on the calling thread until [`Scheduler::stop`]
    /// is observed. Intended for the `use_caller` thread. Its worker id is
    /// one past the last dedicated worker, so it can still be targeted by
    /// affinity (distinct from every pool worker's id).
    pub fn run_caller_loop(self: &Arc<Self>) {
        let stop = CallerStop(self.clone());
        self.worker_loop(&stop, self.worker_count as i64);
    }

    /// Queue `fiber` for execution on any worker. May be called from any
    /// thread, including from inside a running fiber (to spawn a child
    /// task).
    pub fn spawn(self: &Arc<Self>, fiber: Fiber) {
        self.spawn_with_affinity(fiber, ANY_WORKER);
    }

    /// Queue `fiber` for execution, pinned to worker `affinity` (spec.md
    /// §4.C). Pass [`ANY_WORKER`] for no pinning.
    pub fn spawn_with_affinity(self: &Arc<Self>, fiber: Fiber, affinity: i64) {
        let cell: FiberCell = Arc::new(Mutex::new(Some(fiber)));
        self.push(cell, affinity);
    }

    fn push(self: &Arc<Self>, cell: FiberCell, affinity: i64) {
        self.queue.tasks.lock().unwrap().push_back(Task { cell, affinity });
        self.queue.cond.notify_one();
        // Wake a worker that may be parked in the reactor's `epoll_wait`
        // idle body so it notices the new task without waiting out
        // `DEFAULT_TICK_MS`.
        IOManager::global().wakeup();
    }

    /// Ask every worker to stop after finishing its current fiber and wake
    /// anyone parked waiting for work.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.queue.cond.notify_all();
        for worker in self.workers.lock().unwrap().iter() {
            worker.stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// The scheduling-fiber loop from spec.md §2: pop a task and run it;
    /// when the queue is empty, run the idle body (drain due timers, then
    /// block in the reactor bounded by the next deadline or
    /// `DEFAULT_TICK_MS`) until a callback enqueues new work.
    fn worker_loop(self: &Arc<Self>, stop: &dyn ShouldStop, worker_id: i64) {
        loop {
            if self.stopped.load(Ordering::SeqCst) && self.is_queue_empty() {
                break;
            }
            if stop.should_stop() {
                break;
            }

            if let Some(task) = self.pop_task(worker_id) {
                self.run_task(task);
                continue;
            }

            TimerManager::global().collect_expired();
            if let Some(task) = self.pop_task(worker_id) {
                self.run_task(task);
                continue;
            }

            let wait_ms = TimerManager::global()
                .next_timeout_ms()
                .unwrap_or(DEFAULT_TICK_MS)
                .min(DEFAULT_TICK_MS)
                .max(1);
            let _ = IOManager::global().poll(Some(wait_ms as i32));
        }
    }

    /// Pop the task at the head of the queue. If it is pinned to a
    /// different worker, put it back and report nothing ready (spec.md
    /// §4.C worker-loop step 2), leaving it for the worker it's pinned to.
    fn pop_task(&self, worker_id: i64) -> Option<Task> {
        let mut tasks = self.queue.tasks.lock().unwrap();
        let task = tasks.pop_front()?;
        if task.affinity != ANY_WORKER && task.affinity != worker_id {
            tasks.push_back(task);
            return None;
        }
        Some(task)
    }

    fn is_queue_empty(&self) -> bool {
        self.queue.tasks.lock().unwrap().is_empty()
    }

    fn run_task(self: &Arc<Self>, task: Task) {
        let mut fiber = task.cell.lock().unwrap().take().expect("task fiber missing");
        let affinity = task.affinity;
        let handle: RescheduleHandle = {
            let scheduler = self.clone();
            let cell = task.cell.clone();
            Arc::new(move || scheduler.push(cell.clone(), affinity))
        };
        push_reschedule_handle(handle);
        let result = fiber.resume();
        pop_reschedule_handle();
        *task.cell.lock().unwrap() = Some(fiber);
        match result {
            Some(Yield::Yielded) => self.push(task.cell, affinity),
            Some(Yield::Parked) => {
                // The park site stashed `task.cell`'s reschedule handle
                // with whatever it's waiting on (a reactor event, a
                // timer); it alone decides when to call `self.push` again.
            }
            None => {
                // Fiber terminated; dropping `task.cell` frees its stack.
            }
        }
    }
}

trait ShouldStop {
    fn should_stop(&self) -> bool;
}

impl ShouldStop for crate::thread::StopToken {
    fn should_stop(&self) -> bool {
        crate::thread::StopToken::should_stop(self)
    }
}

struct CallerStop(Arc<Scheduler>);

impl ShouldStop for CallerStop {
    fn should_stop(&self) -> bool {
        self.0.is_stopped()
    }
}

thread_local! {
    static RESCHEDULE_STACK: RefCell<Vec<RescheduleHandle>> = RefCell::new(Vec::new());
}

fn push_reschedule_handle(handle: RescheduleHandle) {
    RESCHEDULE_STACK.with(|s| s.borrow_mut().push(handle));
}

fn pop_reschedule_handle() {
    RESCHEDULE_STACK.with(|s| {
        s.borrow_mut().pop();
    });
}

/// Returns a closure that, when called, pushes the currently-running fiber
/// back onto its scheduler's queue. The hook layer captures this before
/// parking on a reactor or timer event so the event callback can resume
/// the fiber later. Panics if called from outside a scheduled fiber.
pub fn current_reschedule_handle() -> RescheduleHandle {
    RESCHEDULE_STACK.with(|s| {
        s.borrow()
            .last()
            .cloned()
            .expect("current_reschedule_handle() called outside a scheduled fiber")
    })
}
