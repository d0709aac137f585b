use crate::error::Result;
use std::collections::HashMap;

/// HTTP headers sent with a host-list request
pub type Headers = HashMap<String, String>;

/// Response of a host-list request
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Parsed JSON body (`Value::Null` when the body was empty or not JSON)
    pub body: serde_json::Value,
}

impl HttpResponse {
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self { status, body }
    }

    /// Check for a 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Continuation invoked with the outcome of a request
pub type HttpCallback = Box<dyn FnOnce(Result<HttpResponse>) + Send>;

/// Asynchronous HTTP GET used to discover chat hosts
///
/// The callback may run on any thread owned by the requester. Callers must
/// not touch stream state from it directly; they re-enter the I/O core
/// through `create_stream` / `post_stream_action`.
pub trait HostListRequester: Send + Sync {
    fn get(&self, url: &str, headers: Headers, callback: HttpCallback);
}
