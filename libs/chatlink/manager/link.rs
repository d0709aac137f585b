//! Handler construction shared by channels and one-shot sends

use super::hosts::CandidateHost;
use crate::core::{DispatchQueue, IoCore, StreamId, TransportConfig};
use crate::protocol::{IrcHandler, WebSocketHandler};
use crate::traits::{Headers, HostListRequester, SendFn, StreamHandler};
use std::sync::Arc;

/// Services every connection manager is constructed with
#[derive(Clone)]
pub(crate) struct TransportContext {
    pub config: Arc<TransportConfig>,
    pub io: IoCore,
    pub dispatch: DispatchQueue,
    pub requester: Arc<dyn HostListRequester>,
}

impl TransportContext {
    /// Headers sent with every host-list request
    pub fn host_list_headers(&self) -> Headers {
        let mut headers = Headers::new();
        headers.insert("Client-ID".to_string(), self.config.client_id.clone());
        headers
    }
}

/// Raw send bound to a stream: every write is posted back through the I/O
/// core, never performed directly on the calling thread.
pub(crate) fn stream_sender(io: IoCore, id: StreamId) -> SendFn {
    Arc::new(move |bytes: &[u8]| {
        let data = bytes.to_vec();
        io.post_stream_action(id, move |stream| {
            stream.write(&data);
        })
        .is_ok()
    })
}

/// IRC directly for raw hosts, IRC wrapped in WebSocket framing otherwise
pub(crate) fn build_handler(host: &CandidateHost, irc: IrcHandler, send: SendFn) -> Box<dyn StreamHandler> {
    let mut handler: Box<dyn StreamHandler> = if host.is_websocket() {
        Box::new(WebSocketHandler::new(host.address.clone(), Some(Box::new(irc))))
    } else {
        Box::new(irc)
    };
    handler.set_send_function(send);
    handler
}
