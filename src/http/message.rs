//! HTTP request/response types built on `httparse`.
//!
//! Grounded on `examples/original_source/src/http/http.{h,cc}`: a request
//! carries method, path, query, headers and body; a response carries a
//! status code, headers and body. `httparse` only tokenizes the
//! start-line and header block, so [`Request::parse`] copies the pieces it
//! needs into owned `String`/`Vec<u8>` fields rather than borrowing from
//! the input buffer, since a `Request` outlives the buffer it was parsed
//! from once handed to a servlet.
use std::collections::HashMap;
use std::fmt::Write as _;

/// The handful of methods `original_source/src/http/http.h`'s `HttpMethod`
/// enum names that a servlet dispatcher needs to distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Other,
}

impl Method {
    fn parse(s: &str) -> Method {
        match s {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            _ => Method::Other,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Other => "GET",
        }
    }
}

/// A parsed HTTP/1.1 request, handed to a servlet by the server.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: String,
    version: u8,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

/// How much of the connection's read buffer a request line/headers block
/// may occupy before we give up and answer 400, matching the original's
/// fixed parse buffer rather than growing unbounded.
const MAX_HEADERS: usize = 64;

impl Request {
    /// Parse one HTTP/1.1 request out of `buf`. Returns the parsed request
    /// and the number of bytes consumed (start-line + headers + body), or
    /// `Ok(None)` if `buf` does not yet contain a complete request.
    pub fn parse(buf: &[u8]) -> Result<Option<(Request, usize)>, httparse::Error> {
        let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut header_storage);
        let parsed_len = match parsed.parse(buf)? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => return Ok(None),
        };

        let mut headers = HashMap::new();
        for header in parsed.headers.iter() {
            headers.insert(
                header.name.to_ascii_lowercase(),
                String::from_utf8_lossy(header.value).into_owned(),
            );
        }

        let content_length: usize = headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        if buf.len() < parsed_len + content_length {
            return Ok(None);
        }
        let body = buf[parsed_len..parsed_len + content_length].to_vec();

        let raw_path = parsed.path.unwrap_or("/");
        let (path, query) = match raw_path.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (raw_path.to_string(), String::new()),
        };

        Ok(Some((
            Request {
                method: Method::parse(parsed.method.unwrap_or("GET")),
                path,
                query,
                version: parsed.version.unwrap_or(1),
                headers,
                body,
            },
            parsed_len + content_length,
        )))
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// A well-known status line, the subset `original_source/src/http/http.h`'s
/// `HttpStatus` enum lists that a servlet dispatcher actually emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotFound,
    BadRequest,
    InternalServerError,
}

impl Status {
    fn code_and_reason(self) -> (u16, &'static str) {
        match self {
            Status::Ok => (200, "OK"),
            Status::NotFound => (404, "Not Found"),
            Status::BadRequest => (400, "Bad Request"),
            Status::InternalServerError => (500, "Internal Server Error"),
        }
    }
}

/// A response a servlet builds and the server serializes back to the
/// client.
#[derive(Debug, Clone)]
pub struct Response {
    status: Status,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: Status) -> Self {
        Response {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Render the status line, headers (plus a computed `Content-Length`)
    /// and body as bytes ready to write to the socket.
    pub fn to_bytes(&self) -> Vec<u8> {
        let (code, reason) = self.status.code_and_reason();
        let mut out = String::new();
        let _ = write!(out, "HTTP/1.1 {} {}\r\n", code, reason);
        for (key, value) in &self.headers {
            let _ = write!(out, "{}: {}\r\n", key, value);
        }
        let _ = write!(out, "Content-Length: {}\r\n\r\n", self.body.len());
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}
