//! Servlet dispatch: path → handler routing.
//!
//! Grounded on `examples/original_source/src/http/servlet.{h,cc}`'s
//! `ServletDispatch`, kept thin per SPEC_FULL.md §9: exact-match and
//! prefix routes only, no regex routing.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::message::{Request, Response, Status};

/// A request handler. Boxed so [`ServletDispatch`] can hold a
/// heterogeneous set of closures and function pointers, mirroring the
/// original's `FunctionServlet::callback`.
pub type Servlet = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

/// Routes requests to the servlet registered for the closest matching
/// path, falling back to a 404 handler.
pub struct ServletDispatch {
    exact: RwLock<HashMap<String, Servlet>>,
    /// Longest-prefix-first routes, mirroring the original's
    /// `global_creators_` vector of `(uri_prefix, creator)` pairs.
    prefixes: RwLock<Vec<(String, Servlet)>>,
    not_found: Servlet,
}

impl ServletDispatch {
    pub fn new() -> Self {
        ServletDispatch {
            exact: RwLock::new(HashMap::new()),
            prefixes: RwLock::new(Vec::new()),
            not_found: Arc::new(|_req| {
                Response::new(Status::NotFound)
                    .with_header("Content-Type", "text/plain")
                    .with_body(b"404 Not Found".to_vec())
            }),
        }
    }

    /// Register a handler for an exact path match, e.g. `/hello`.
    pub fn add_servlet(&self, path: impl Into<String>, handler: impl Fn(&Request) -> Response + Send + Sync + 'static) {
        self.exact.write().unwrap().insert(path.into(), Arc::new(handler));
    }

    /// Register a handler for every path under `prefix`, e.g. `/static/`.
    pub fn add_prefix_servlet(&self, prefix: impl Into<String>, handler: impl Fn(&Request) -> Response + Send + Sync + 'static) {
        self.prefixes.write().unwrap().push((prefix.into(), Arc::new(handler)));
    }

    pub fn del_servlet(&self, path: &str) {
        self.exact.write().unwrap().remove(path);
    }

    /// Find the best match for `path`: an exact match first, then the
    /// longest matching prefix, then the default 404 servlet.
    fn get_matched(&self, path: &str) -> Servlet {
        if let Some(servlet) = self.exact.read().unwrap().get(path) {
            return servlet.clone();
        }
        let prefixes = self.prefixes.read().unwrap();
        prefixes
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, servlet)| servlet.clone())
            .unwrap_or_else(|| self.not_found.clone())
    }

    /// Dispatch `req` to the matching servlet and return its response.
    pub fn handle(&self, req: &Request) -> Response {
        let servlet = self.get_matched(req.path());
        servlet(req)
    }
}

impl Default for ServletDispatch {
    fn default() -> Self {
        ServletDispatch::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::message::Method;

    fn req(path: &str) -> Request {
        let raw = format!("GET {} HTTP/1.1\r\n\r\n", path);
        Request::parse(raw.as_bytes()).unwrap().unwrap().0
    }

    #[test]
    fn exact_match_wins_over_prefix() {
        let dispatch = ServletDispatch::new();
        dispatch.add_prefix_servlet("/api", |_| Response::new(Status::Ok).with_body(b"prefix".to_vec()));
        dispatch.add_servlet("/api/health", |_| Response::new(Status::Ok).with_body(b"exact".to_vec()));
        let resp = dispatch.handle(&req("/api/health"));
        assert_eq!(resp.to_bytes().ends_with(b"exact"), true);
    }

    #[test]
    fn unmatched_path_hits_default_not_found() {
        let dispatch = ServletDispatch::new();
        let resp = dispatch.handle(&req("/missing"));
        let bytes = resp.to_bytes();
        assert!(String::from_utf8(bytes).unwrap().starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn longest_prefix_wins() {
        let dispatch = ServletDispatch::new();
        dispatch.add_prefix_servlet("/a", |_| Response::new(Status::Ok).with_body(b"short".to_vec()));
        dispatch.add_prefix_servlet("/a/b", |_| Response::new(Status::Ok).with_body(b"long".to_vec()));
        let resp = dispatch.handle(&req("/a/b/c"));
        assert!(resp.to_bytes().ends_with(b"long"));
        let _ = Method::Get;
    }
}
