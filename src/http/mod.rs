//! HTTP client/server, the consumer layer spec.md §1 names.
//!
//! Grounded on `examples/original_source/src/http/*`: a zero-copy request
//! parser (here, `httparse`), a servlet dispatch table, and server/client
//! wrappers over the hook layer's non-blocking streams.
pub mod client;
pub mod message;
pub mod server;
pub mod servlet;

pub use client::{get, request, ClientResponse};
pub use message::{Method, Request, Response, Status};
pub use server::HttpServer;
pub use servlet::ServletDispatch;
