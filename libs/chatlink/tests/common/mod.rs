//! Common test utilities for chatlink integration tests
//!
//! Provides an in-process chat server speaking IRC over raw TCP or
//! WebSocket frames, scripted host-list requesters and a helper that pumps
//! the dispatch queue until a condition holds.

#![allow(dead_code)]

use chatlink::codec::{get_frame, make_frame, FrameDecode, FrameType, Opcode};
use chatlink::{ChatTransport, Headers, HostListRequester, HttpCallback, HttpResponse, TransportConfig};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

const UPGRADE_RESPONSE: &str = "HTTP/1.1 101 Switching Protocols\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";

/// How the mock server treats each accepted client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Welcome, join and answer pings
    Accept,
    /// Answer NICK with a login failure notice
    RejectLogin,
    /// Close the socket right after accepting
    CloseOnAccept,
}

#[derive(Default)]
struct ServerState {
    lines: Mutex<Vec<String>>,
    clients: Mutex<Vec<Client>>,
    accepted: AtomicUsize,
    websocket_upgrades: AtomicUsize,
}

struct Client {
    stream: TcpStream,
    websocket: bool,
}

impl Client {
    fn send_line(&mut self, line: &str) -> bool {
        let mut bytes = line.as_bytes().to_vec();
        bytes.extend_from_slice(b"\r\n");
        if self.websocket {
            bytes = make_frame(Opcode::Text, &bytes, false);
        }
        self.stream.write_all(&bytes).is_ok()
    }
}

/// A scripted chat server bound to an ephemeral localhost port
pub struct MockChatServer {
    pub addr: SocketAddr,
    behavior: MockBehavior,
    state: Arc<ServerState>,
    running: Arc<AtomicBool>,
}

impl MockChatServer {
    pub fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState::default());
        let running = Arc::new(AtomicBool::new(true));

        let accept_state = Arc::clone(&state);
        let accept_running = Arc::clone(&running);
        thread::spawn(move || {
            for stream in listener.incoming() {
                if !accept_running.load(Ordering::Acquire) {
                    break;
                }
                let Ok(stream) = stream else {
                    continue;
                };
                accept_state.accepted.fetch_add(1, Ordering::SeqCst);

                if behavior == MockBehavior::CloseOnAccept {
                    let _ = stream.shutdown(Shutdown::Both);
                    continue;
                }

                let state = Arc::clone(&accept_state);
                thread::spawn(move || serve_client(stream, behavior, state));
            }
        });

        Self {
            addr,
            behavior,
            state,
            running,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// `host:port` entry for a host-list body
    pub fn entry(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    pub fn behavior(&self) -> MockBehavior {
        self.behavior
    }

    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    pub fn websocket_upgrades(&self) -> usize {
        self.state.websocket_upgrades.load(Ordering::SeqCst)
    }

    /// Every line received so far, without line terminators
    pub fn lines(&self) -> Vec<String> {
        self.state.lines.lock().clone()
    }

    pub fn received(&self, line: &str) -> bool {
        self.state.lines.lock().iter().any(|l| l == line)
    }

    /// Send a line to every connected client
    pub fn broadcast(&self, line: &str) {
        let mut clients = self.state.clients.lock();
        clients.retain_mut(|client| client.send_line(line));
    }

    pub fn client_count(&self) -> usize {
        self.state.clients.lock().len()
    }

    /// Close every client socket from the server side
    pub fn drop_clients(&self) {
        for client in self.state.clients.lock().drain(..) {
            let _ = client.stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for MockChatServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.drop_clients();
        // Unblock the accept loop
        let _ = TcpStream::connect(self.addr);
    }
}

fn serve_client(stream: TcpStream, behavior: MockBehavior, state: Arc<ServerState>) {
    let Ok(mut reader) = stream.try_clone() else {
        return;
    };
    let Ok(writer) = stream.try_clone() else {
        return;
    };
    let mut client = Client {
        stream: writer,
        websocket: false,
    };

    let mut raw = Vec::new();
    let mut text = String::new();
    let mut detected = false;
    let mut buf = [0u8; 4096];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        raw.extend_from_slice(&buf[..n]);

        if !detected {
            if raw.len() < 4 {
                continue;
            }
            if raw.starts_with(b"GET ") {
                let Some(end) = find(&raw, b"\r\n\r\n") else {
                    continue;
                };
                raw.drain(..end + 4);
                if client.stream.write_all(UPGRADE_RESPONSE.as_bytes()).is_err() {
                    break;
                }
                client.websocket = true;
                state.websocket_upgrades.fetch_add(1, Ordering::SeqCst);
            }
            detected = true;
            if let Ok(registered) = stream.try_clone() {
                state.clients.lock().push(Client {
                    stream: registered,
                    websocket: client.websocket,
                });
            }
        }

        if client.websocket {
            let mut closed = false;
            while let FrameDecode::Complete(frame) = get_frame(&raw) {
                raw.drain(..frame.consumed);
                match frame.frame_type {
                    FrameType::Text => text.push_str(&String::from_utf8_lossy(&frame.payload)),
                    FrameType::Error => {
                        closed = true;
                        break;
                    }
                    _ => {}
                }
            }
            if closed {
                break;
            }
        } else {
            text.push_str(&String::from_utf8_lossy(&raw));
            raw.clear();
        }

        while let Some(pos) = text.find('\n') {
            let line: String = text.drain(..=pos).collect();
            let line = line.trim_end_matches(&['\r', '\n'][..]).to_string();
            if line.is_empty() {
                continue;
            }
            crate::verbose_println!("  server << {}", line);
            state.lines.lock().push(line.clone());
            if !respond(&mut client, behavior, &line) {
                return;
            }
        }
    }
}

fn respond(client: &mut Client, behavior: MockBehavior, line: &str) -> bool {
    let mut parts = line.splitn(2, ' ');
    let command = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("");

    match command {
        "NICK" if behavior == MockBehavior::RejectLogin => {
            client.send_line(":tmi.test NOTICE * :Login authentication failed")
        }
        "NICK" => client.send_line(&format!(":tmi.test 001 {} :Welcome, GLHF!", rest)),
        "JOIN" => client.send_line(&format!(":justinfan12345!justinfan12345@justinfan12345.tmi.test JOIN {}", rest)),
        "PING" => {
            let token = rest.trim_start_matches(':');
            client.send_line(&format!(":tmi.test PONG tmi.test :{}", token))
        }
        _ => true,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// A localhost port with nothing listening on it
pub fn dead_entry() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("127.0.0.1:{}", port)
}

/// A localhost listener whose accept queue is already full, so connects to
/// it stay pending until the client gives up
pub struct StalledListener {
    listener: tokio::net::TcpListener,
    _held: Vec<TcpStream>,
    // Only hosts the listener registration; never driven
    _runtime: tokio::runtime::Runtime,
}

impl StalledListener {
    pub fn start() -> Self {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
            .unwrap();
        let listener = {
            let _guard = runtime.enter();
            let socket = tokio::net::TcpSocket::new_v4().unwrap();
            socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
            socket.listen(1).unwrap()
        };
        let addr = listener.local_addr().unwrap();

        let mut held = Vec::new();
        while let Ok(stream) = TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
            held.push(stream);
            assert!(held.len() < 64, "accept queue never filled");
        }

        Self {
            listener,
            _held: held,
            _runtime: runtime,
        }
    }

    pub fn entry(&self) -> String {
        let port = self.listener.local_addr().map(|addr| addr.port()).unwrap_or(0);
        format!("127.0.0.1:{}", port)
    }
}

/// Host-list body with the given raw IRC and WebSocket entries
pub fn host_list(irc: &[String], websocket: &[String]) -> Value {
    json!({
        "servers": irc,
        "websockets_servers": websocket,
    })
}

/// Configuration where every port has the same priority, so candidates
/// are attempted in host-list order
pub fn test_config() -> TransportConfig {
    TransportConfig {
        api_server: "chat.test".to_string(),
        client_id: "test-client".to_string(),
        irc_ports: Vec::new(),
        websocket_ports: Vec::new(),
        unlisted_port_priority: 1,
        select_timeout_ms: 20,
        connect_timeout_ms: 2000,
        ..TransportConfig::default()
    }
}

/// Answers every request with the same response from a fresh thread
pub struct StaticRequester {
    response: Mutex<(u16, Value)>,
    requests: Mutex<Vec<(String, Headers)>>,
}

impl StaticRequester {
    pub fn new(status: u16, body: Value) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new((status, body)),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn set_response(&self, status: u16, body: Value) {
        *self.response.lock() = (status, body);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<(String, Headers)> {
        self.requests.lock().clone()
    }
}

impl HostListRequester for StaticRequester {
    fn get(&self, url: &str, headers: Headers, callback: HttpCallback) {
        self.requests.lock().push((url.to_string(), headers));
        let (status, body) = self.response.lock().clone();
        thread::spawn(move || callback(Ok(HttpResponse::new(status, body))));
    }
}

/// Holds callbacks until the test answers them
#[derive(Default)]
pub struct ManualRequester {
    pending: Mutex<Vec<(String, HttpCallback)>>,
}

impl ManualRequester {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Answer the oldest pending request on the calling thread
    pub fn respond_next(&self, status: u16, body: Value) -> bool {
        let next = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                None
            } else {
                Some(pending.remove(0))
            }
        };
        match next {
            Some((_, callback)) => {
                callback(Ok(HttpResponse::new(status, body)));
                true
            }
            None => false,
        }
    }
}

impl HostListRequester for ManualRequester {
    fn get(&self, url: &str, _headers: Headers, callback: HttpCallback) {
        self.pending.lock().push((url.to_string(), callback));
    }
}

/// Run dispatched callbacks until `done` holds or `timeout` elapses
pub fn pump_until<F>(transport: &ChatTransport, timeout: Duration, mut done: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        transport.dispatch_events();
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Keep pumping for `duration`, for asserting that nothing else happens
pub fn pump_for(transport: &ChatTransport, duration: Duration) {
    pump_until(transport, duration, || false);
}

pub const WAIT: Duration = Duration::from_secs(5);
