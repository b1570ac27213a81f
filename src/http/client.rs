//! A minimal HTTP/1.1 client: one request per connection.
//!
//! Grounded on `examples/original_source/src/http/http_connection.{h,cc}`,
//! the original's client-side counterpart to `HttpServer` — it opens a
//! connection, writes a request, and parses the response. This mirrors
//! that shape over [`CoStream`] instead of the original's `Socket`.
use std::fmt::Write as _;
use std::io::{Read, Write};
use std::time::Duration;

use crate::hook::stream::CoStream;
use crate::net::Address;

use super::message::{Method, Status};

/// The response half of a client request: status line plus raw body
/// bytes. Headers are not parsed back out since no caller in this pack
/// needs them; callers that do can add an `httparse::Response` pass over
/// `body`'s preceding bytes later.
pub struct ClientResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Issue a single GET request to `addr` for `path`, suspending the
/// current fiber for the connect, write and read instead of blocking the
/// thread.
pub fn get(addr: &Address, host: &str, path: &str, timeout: Option<Duration>) -> std::io::Result<ClientResponse> {
    request(addr, Method::Get, host, path, &[], timeout)
}

/// Issue a single request with an explicit method and body.
pub fn request(
    addr: &Address,
    method: Method,
    host: &str,
    path: &str,
    body: &[u8],
    timeout: Option<Duration>,
) -> std::io::Result<ClientResponse> {
    let mut stream = CoStream::connect(addr, timeout)?;
    if let Some(t) = timeout {
        stream.set_recv_timeout(Some(t));
        stream.set_send_timeout(Some(t));
    }

    let method_str = match method {
        Method::Get => "GET",
        Method::Post => "POST",
        Method::Put => "PUT",
        Method::Delete => "DELETE",
        Method::Head => "HEAD",
        Method::Options => "OPTIONS",
        Method::Patch => "PATCH",
        Method::Other => "GET",
    };
    let mut head = String::new();
    let _ = write!(head, "{} {} HTTP/1.1\r\n", method_str, path);
    let _ = write!(head, "Host: {}\r\n", host);
    let _ = write!(head, "Content-Length: {}\r\n", body.len());
    head.push_str("Connection: close\r\n\r\n");
    stream.write_all(head.as_bytes())?;
    stream.write_all(body)?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw)?;
    parse_response(&raw)
}

fn parse_response(raw: &[u8]) -> std::io::Result<ClientResponse> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut resp = httparse::Response::new(&mut headers);
    let parsed_len = match resp.parse(raw).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "incomplete response"));
        }
    };
    let status = resp.code.unwrap_or(Status::InternalServerError.into());
    Ok(ClientResponse {
        status,
        body: raw[parsed_len..].to_vec(),
    })
}

impl From<Status> for u16 {
    fn from(status: Status) -> u16 {
        match status {
            Status::Ok => 200,
            Status::NotFound => 404,
            Status::BadRequest => 400,
            Status::InternalServerError => 500,
        }
    }
}
