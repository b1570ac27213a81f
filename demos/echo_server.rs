//! Scenario S1 from spec.md §8, run as a standalone binary: bind a TCP
//! listener, accept connections, echo back whatever each one sends.
use std::io::{Read, Write};
use std::net::SocketAddr;

use fibra::fiber::Fiber;
use fibra::hook::stream::{CoListener, CoStream};
use fibra::net::Address;
use fibra::scheduler::Scheduler;

fn main() {
    env_logger::init();

    let scheduler = Scheduler::new("echo", 2, true);
    scheduler.start();

    let addr: SocketAddr = "127.0.0.1:7878".parse().unwrap();
    let listener = CoListener::bind(&Address::new(addr)).expect("bind failed");
    log::info!("echo server listening on {}", addr);

    let accept_scheduler = scheduler.clone();
    scheduler.spawn(Fiber::new("accept", move || loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                log::info!("accepted connection from {}", peer);
                accept_scheduler.spawn(Fiber::new("conn", move || handle(stream)));
            }
            Err(err) => {
                log::error!("accept failed: {}", err);
                break;
            }
        }
    }));

    scheduler.run_caller_loop();
}

fn handle(mut stream: CoStream) {
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                if stream.write_all(&buf[..n]).is_err() {
                    return;
                }
            }
            Err(err) => {
                log::debug!("connection read error: {}", err);
                return;
            }
        }
    }
}
