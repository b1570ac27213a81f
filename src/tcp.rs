//! TCP-server skeleton: bind, accept, hand each connection to a handler
//! fiber.
//!
//! Grounded on `examples/original_source/src/tcp_server.{h,cc}`'s
//! `TcpServer`: construct with a name, `bind` one or more addresses,
//! `start` an accept loop per listener, `handle_client` runs per
//! connection. The original's `io_worker`/`accept_worker` split (accept
//! and per-connection I/O can run on different `IOManager`s) collapses to
//! a single `Scheduler` here since `fibra` has exactly one scheduler type.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::fiber::Fiber;
use crate::hook::stream::{CoListener, CoStream};
use crate::net::Address;
use crate::scheduler::Scheduler;

/// A connection handler, invoked on its own fiber once per accepted
/// connection. Mirrors the original's overridable `handle_client`.
pub type Handler = Arc<dyn Fn(CoStream) + Send + Sync>;

/// Binds zero or more listeners and runs one accept-loop fiber per
/// listener, dispatching each accepted connection to `handler` on its own
/// fiber.
pub struct TcpServer {
    name: String,
    scheduler: Arc<Scheduler>,
    handler: Handler,
    listeners: Vec<CoListener>,
    running: Arc<AtomicBool>,
}

impl TcpServer {
    pub fn new(name: impl Into<String>, scheduler: Arc<Scheduler>, handler: Handler) -> Self {
        TcpServer {
            name: name.into(),
            scheduler,
            handler,
            listeners: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind one address, adding its listener to the set `start` will run
    /// accept loops for.
    pub fn bind(&mut self, addr: Address) -> std::io::Result<()> {
        self.listeners.push(CoListener::bind(&addr)?);
        Ok(())
    }

    /// Bind every address in `addrs`, collecting failures instead of
    /// aborting on the first one — mirrors the original's
    /// `bind(vector<Address>, vector<Address>& fails)` overload.
    pub fn bind_many(&mut self, addrs: &[Address]) -> Vec<(Address, std::io::Error)> {
        let mut fails = Vec::new();
        for &addr in addrs {
            if let Err(err) = self.bind(addr) {
                fails.push((addr, err));
            }
        }
        fails
    }

    /// Spawn one accept-loop fiber per bound listener.
    pub fn start(&mut self) {
        self.running.store(true, Ordering::SeqCst);
        for listener in self.listeners.drain(..) {
            let handler = self.handler.clone();
            let running = self.running.clone();
            let scheduler = self.scheduler.clone();
            let name = self.name.clone();
            self.scheduler.spawn(Fiber::new(format!("{}-accept", name), move || {
                while running.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _peer)) => {
                            let handler = handler.clone();
                            scheduler.spawn(Fiber::new(format!("{}-conn", name), move || {
                                handler(stream);
                            }));
                        }
                        Err(err) => {
                            log::warn!("{}: accept failed: {}", name, err);
                            break;
                        }
                    }
                }
            }));
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
