//! A minimal HTTP server demo: a couple of routes registered on a
//! [`fibra::http::ServletDispatch`] and served on the scheduler.
use std::net::SocketAddr;
use std::sync::Arc;

use fibra::http::{HttpServer, Response, ServletDispatch, Status};
use fibra::net::Address;
use fibra::scheduler::Scheduler;

fn main() {
    env_logger::init();

    let scheduler = Scheduler::new("http", 2, true);
    scheduler.start();

    let dispatch = Arc::new(ServletDispatch::new());
    dispatch.add_servlet("/", |_req| {
        Response::new(Status::Ok)
            .with_header("Content-Type", "text/plain")
            .with_body(b"hello from fibra\n".to_vec())
    });
    dispatch.add_prefix_servlet("/echo/", |req| {
        Response::new(Status::Ok)
            .with_header("Content-Type", "text/plain")
            .with_body(req.path().as_bytes().to_vec())
    });

    let server = HttpServer::new(scheduler.clone(), dispatch);
    let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
    server.serve(Address::new(addr)).expect("bind failed");
    log::info!("http server listening on {}", addr);

    scheduler.run_caller_loop();
}
