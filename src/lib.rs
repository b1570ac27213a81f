//! `fibra`: a single-process coroutine runtime for network servers.
//!
//! Stackful fibers ([`fiber`]) are multiplexed onto a fixed pool of OS
//! threads by the [`scheduler`]; an epoll reactor ([`io_manager`]) turns
//! non-blocking fd readiness into fiber resumptions; a [`timer`] wheel
//! tracks deadlines; the [`hook`] layer makes ordinary-looking blocking
//! POSIX calls cooperatively yield instead of blocking a worker thread.
//! [`http`] and [`tcp`] are consumers built on top of that substrate.
#[macro_use]
extern crate bitflags;

pub mod clock;
pub mod config;
pub mod error;
pub mod fd;
pub mod fiber;
pub mod hook;
pub mod http;
pub mod io_manager;
pub mod log;
pub mod net;
pub mod scheduler;
pub mod tcp;
pub mod thread;
pub mod timer;

pub use error::{Error, Result};
pub use fiber::Fiber;
pub use scheduler::Scheduler;
