//! OS worker threads.
//!
//! The teacher's fibers ran inside a single externally-owned Tarantool
//! thread, so nothing in this pack wraps OS threads for a scheduler. This
//! is new code in the idiom of `std::thread`: a joinable, named thread with
//! a cooperative stop flag, built directly on `std::thread::Builder` the
//! way the rest of this crate builds directly on `libc`.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A named, joinable worker thread with a cooperative stop signal.
pub struct Thread {
    name: String,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Thread {
    /// Spawn `body` on a new OS thread named `name`. `body` receives a
    /// [`StopToken`] it should poll periodically to know when to return.
    pub fn spawn(name: impl Into<String>, body: impl FnOnce(StopToken) + Send + 'static) -> Self {
        let name = name.into();
        let running = Arc::new(AtomicBool::new(true));
        let token = StopToken {
            running: running.clone(),
        };
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(token))
            .expect("failed to spawn worker thread");
        Thread {
            name,
            running,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the thread to stop. Does not block; call [`Thread::join`]
    /// afterwards to wait for it to actually exit.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Block until the thread exits.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
        }
    }
}

/// Handed to a worker thread's body so it can observe [`Thread::stop`].
#[derive(Clone)]
pub struct StopToken {
    running: Arc<AtomicBool>,
}

impl StopToken {
    pub fn should_stop(&self) -> bool {
        !self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn thread_runs_until_stopped() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter2 = counter.clone();
        let thread = Thread::spawn("worker", move |token| {
            while !token.should_stop() {
                counter2.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        thread.stop();
        thread.join();
        assert!(counter.load(Ordering::SeqCst) > 0);
    }
}
