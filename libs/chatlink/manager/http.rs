//! Host-list requester backed by reqwest
//!
//! Runs requests on a small private tokio runtime so the transport can be
//! used from synchronous code. Callbacks run on the runtime's worker thread.

use crate::error::{ChatError, Result};
use crate::traits::{Headers, HostListRequester, HttpCallback, HttpResponse};
use reqwest::Client;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ReqwestRequester {
    runtime: Option<Runtime>,
    client: Client,
}

impl ReqwestRequester {
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("chatlink-http")
            .enable_all()
            .build()?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChatError::Http(e.to_string()))?;

        Ok(Self {
            runtime: Some(runtime),
            client,
        })
    }
}

impl HostListRequester for ReqwestRequester {
    fn get(&self, url: &str, headers: Headers, callback: HttpCallback) {
        let Some(runtime) = self.runtime.as_ref() else {
            callback(Err(ChatError::Shutdown));
            return;
        };

        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let url = url.to_string();
        runtime.spawn(async move {
            debug!(%url, "GET");
            callback(fetch(request).await);
        });
    }
}

async fn fetch(request: reqwest::RequestBuilder) -> Result<HttpResponse> {
    let response = request.send().await.map_err(|e| ChatError::Http(e.to_string()))?;
    let status = response.status().as_u16();
    let text = response.text().await.map_err(|e| ChatError::Http(e.to_string()))?;

    let body = if text.trim().is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!(status, error = %e, "Response body is not JSON");
            serde_json::Value::Null
        })
    };
    Ok(HttpResponse::new(status, body))
}

impl Drop for ReqwestRequester {
    fn drop(&mut self) {
        // May run on a runtime worker when the last reference is released
        // from a callback, where a blocking shutdown would panic.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
