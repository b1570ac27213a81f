//! HTTP server: bind, accept, parse, dispatch, respond — one fiber per
//! connection.
//!
//! Grounded on `examples/original_source/src/http/http_server.{h,cc}`'s
//! `HttpServer`, which binds a listener, runs an accept loop on its own
//! fiber and spawns one fiber per accepted connection to run the
//! parse/dispatch/respond cycle.
use std::io::{Read, Write};
use std::sync::Arc;

use crate::fiber::Fiber;
use crate::hook::stream::{CoListener, CoStream};
use crate::net::Address;
use crate::scheduler::Scheduler;

use super::message::Request;
use super::servlet::ServletDispatch;

/// How many bytes a connection's read buffer grows to before a request
/// that still hasn't parsed is rejected with 400.
const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// A minimal HTTP/1.1 server: accepts connections on a [`Scheduler`] and
/// dispatches each request through a [`ServletDispatch`].
pub struct HttpServer {
    dispatch: Arc<ServletDispatch>,
    scheduler: Arc<Scheduler>,
}

impl HttpServer {
    pub fn new(scheduler: Arc<Scheduler>, dispatch: Arc<ServletDispatch>) -> Self {
        HttpServer { dispatch, scheduler }
    }

    /// Bind `addr` and spawn the accept-loop fiber. Returns once the
    /// listener is bound; the accept loop and per-connection fibers run
    /// asynchronously on the scheduler.
    pub fn serve(&self, addr: Address) -> std::io::Result<()> {
        let listener = CoListener::bind(&addr)?;
        let dispatch = self.dispatch.clone();
        let scheduler = self.scheduler.clone();
        self.scheduler.spawn(Fiber::new("http-accept", move || {
            loop {
                match listener.accept() {
                    Ok((stream, _peer)) => {
                        let dispatch = dispatch.clone();
                        scheduler.spawn(Fiber::new("http-conn", move || {
                            handle_connection(stream, &dispatch);
                        }));
                    }
                    Err(err) => {
                        log::warn!("http accept failed: {}", err);
                        break;
                    }
                }
            }
        }));
        Ok(())
    }
}

fn handle_connection(mut stream: CoStream, dispatch: &ServletDispatch) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) => {
                log::debug!("http connection read error: {}", err);
                return;
            }
        }

        match Request::parse(&buf) {
            Ok(Some((req, consumed))) => {
                let response = dispatch.handle(&req);
                if stream.write_all(&response.to_bytes()).is_err() {
                    return;
                }
                buf.drain(..consumed);
            }
            Ok(None) => {
                if buf.len() > MAX_REQUEST_BYTES {
                    log::warn!("http request exceeded {} bytes without completing", MAX_REQUEST_BYTES);
                    return;
                }
            }
            Err(err) => {
                log::warn!("http parse error: {:?}", err);
                return;
            }
        }
    }
}
