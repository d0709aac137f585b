//! I/O core
//!
//! Owns the single background thread every socket runs on.
//!
//! ```text
//!            post_stream_action / open_stream
//! any thread ────────────────────────────────> action queue ──┐
//!                                                  (waker)    │
//! chatlink-io:  loop {                                        │
//!     poll(readiness, select_timeout)                         │
//!     dispatch ready events ──> per-stream handler            │
//!     expire pending connects (Timeout)                       │
//!     swap action queue, run actions in order <───────────────┘
//! }
//! ```
//!
//! Handlers receive a `&mut Stream` valid only for the duration of the
//! callback. A stream whose socket is released and not reconnected during
//! its `Close` callback receives `Destroy` and its context is removed.

use super::config::TransportConfig;
use super::stream::{SocketState, Stream, StreamEvent, StreamId};
use crate::error::{ChatError, Result};
use mio::{Events, Poll, Registry, Token, Waker};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

const WAKE_TOKEN: Token = Token(0);
const EVENT_CAPACITY: usize = 256;

/// Per-stream event callback, invoked on the I/O thread
pub type StreamEventHandler = Box<dyn FnMut(&mut Stream, StreamEvent) + Send>;

type Action = Box<dyn FnOnce(&mut Reactor) + Send>;

struct StreamContext {
    stream: Stream,
    handler: StreamEventHandler,
}

impl StreamContext {
    fn dispatch(&mut self, event: StreamEvent) {
        (self.handler)(&mut self.stream, event);
    }

    fn fail(&mut self, reason: String) {
        warn!(stream_id = %self.stream.id(), label = self.stream.label(), reason = %reason, "Stream error");
        self.dispatch(StreamEvent::Error(reason));
        self.stream.close();
    }
}

struct IoShared {
    next_id: AtomicU64,
    actions: Mutex<Vec<Action>>,
    waker: Waker,
    running: Arc<AtomicBool>,
    live_streams: Arc<AtomicUsize>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the I/O thread. Cheap to clone; all clones share one thread.
#[derive(Clone)]
pub struct IoCore {
    shared: Arc<IoShared>,
}

impl IoCore {
    /// Spawn the I/O thread
    pub fn start(config: &TransportConfig) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        let registry = Arc::new(poll.registry().try_clone()?);
        let running = Arc::new(AtomicBool::new(true));
        let live_streams = Arc::new(AtomicUsize::new(0));

        let shared = Arc::new(IoShared {
            next_id: AtomicU64::new(1),
            actions: Mutex::new(Vec::new()),
            waker,
            running: Arc::clone(&running),
            live_streams: Arc::clone(&live_streams),
            thread: Mutex::new(None),
        });

        let reactor = Reactor {
            poll,
            registry,
            running,
            live_streams,
            contexts: HashMap::new(),
            read_buf: vec![0u8; config.read_buffer_size.max(1)],
            select_timeout: config.select_timeout(),
            connect_timeout: config.connect_timeout(),
        };

        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("chatlink-io".to_string())
            .spawn(move || reactor.run(&loop_shared))?;
        *shared.thread.lock() = Some(handle);

        info!("I/O core started");
        Ok(Self { shared })
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Number of streams with a live context
    pub fn stream_count(&self) -> usize {
        self.shared.live_streams.load(Ordering::Acquire)
    }

    /// Allocate the next stream id without creating the stream
    pub fn reserve_stream_id(&self) -> StreamId {
        StreamId::from_raw(self.shared.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Allocate an id and queue creation of its stream
    pub fn create_stream<H, C>(&self, label: impl Into<String>, handler: H, created: C) -> Result<StreamId>
    where
        H: FnMut(&mut Stream, StreamEvent) + Send + 'static,
        C: FnOnce(&mut Stream) + Send + 'static,
    {
        let id = self.reserve_stream_id();
        self.open_stream(id, label, handler, created)?;
        Ok(id)
    }

    /// Queue creation of a stream under a previously reserved id.
    ///
    /// `created` runs on the I/O thread with the new stream; a stream left
    /// unconnected when it returns is destroyed.
    pub fn open_stream<H, C>(&self, id: StreamId, label: impl Into<String>, handler: H, created: C) -> Result<()>
    where
        H: FnMut(&mut Stream, StreamEvent) + Send + 'static,
        C: FnOnce(&mut Stream) + Send + 'static,
    {
        let label = label.into();
        let handler: StreamEventHandler = Box::new(handler);
        self.post(Box::new(move |reactor: &mut Reactor| {
            reactor.insert(id, label, handler, created);
        }))
    }

    /// Queue `action` against a live stream. A no-op if the stream is gone
    /// by the time the action runs.
    pub fn post_stream_action<F>(&self, id: StreamId, action: F) -> Result<()>
    where
        F: FnOnce(&mut Stream) + Send + 'static,
    {
        self.post(Box::new(move |reactor: &mut Reactor| {
            reactor.with_stream(id, action);
        }))
    }

    pub fn close_stream(&self, id: StreamId) -> Result<()> {
        self.post_stream_action(id, |stream| stream.close())
    }

    /// Stop the loop, close every stream and join the thread
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.shared.waker.wake() {
            warn!(error = %e, "Failed to wake I/O thread");
        }

        let handle = self.shared.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("I/O thread panicked");
            }
        }
        info!("I/O core stopped");
    }

    fn post(&self, action: Action) -> Result<()> {
        if !self.is_running() {
            return Err(ChatError::Shutdown);
        }
        self.shared.actions.lock().push(action);
        if let Err(e) = self.shared.waker.wake() {
            warn!(error = %e, "Failed to wake I/O thread");
        }
        Ok(())
    }
}

struct Reactor {
    poll: Poll,
    registry: Arc<Registry>,
    running: Arc<AtomicBool>,
    live_streams: Arc<AtomicUsize>,
    contexts: HashMap<StreamId, StreamContext>,
    read_buf: Vec<u8>,
    select_timeout: Duration,
    connect_timeout: Duration,
}

impl Reactor {
    fn run(mut self, shared: &IoShared) {
        let mut events = Events::with_capacity(EVENT_CAPACITY);

        while shared.running.load(Ordering::Acquire) {
            let timeout = self.poll_timeout();
            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "Poll failed, stopping I/O thread");
                shared.running.store(false, Ordering::Release);
                break;
            }

            for event in events.iter() {
                if event.token() == WAKE_TOKEN {
                    continue;
                }
                let id = StreamId::from_raw(event.token().0 as u64);
                self.handle_ready(
                    id,
                    event.is_readable() || event.is_read_closed(),
                    event.is_writable(),
                    event.is_error() || event.is_write_closed(),
                );
            }

            self.expire_connects();

            let actions = std::mem::take(&mut *shared.actions.lock());
            for action in actions {
                action(&mut self);
            }
        }

        // Drop anything queued after the stop so captured handles are released
        shared.actions.lock().clear();
        self.close_all();
        debug!("I/O thread exiting");
    }

    fn poll_timeout(&self) -> Duration {
        let now = Instant::now();
        self.contexts
            .values()
            .filter_map(|ctx| ctx.stream.connect_deadline())
            .map(|deadline| deadline.saturating_duration_since(now))
            .fold(self.select_timeout, Duration::min)
    }

    fn insert<C>(&mut self, id: StreamId, label: String, handler: StreamEventHandler, created: C)
    where
        C: FnOnce(&mut Stream),
    {
        let stream = Stream::new(
            id,
            label,
            Arc::clone(&self.registry),
            Arc::clone(&self.running),
            self.connect_timeout,
        );
        let ctx = self
            .contexts
            .entry(id)
            .or_insert(StreamContext { stream, handler });
        self.live_streams.fetch_add(1, Ordering::AcqRel);
        trace!(stream_id = %id, "Stream created");

        created(&mut ctx.stream);
        self.settle(id);
    }

    fn with_stream<F>(&mut self, id: StreamId, action: F)
    where
        F: FnOnce(&mut Stream),
    {
        match self.contexts.get_mut(&id) {
            Some(ctx) => action(&mut ctx.stream),
            None => {
                trace!(stream_id = %id, "Action for a destroyed stream dropped");
                return;
            }
        }
        self.settle(id);
    }

    fn handle_ready(&mut self, id: StreamId, readable: bool, writable: bool, failed: bool) {
        let Some(ctx) = self.contexts.get_mut(&id) else {
            return;
        };

        if ctx.stream.state() == SocketState::Connecting {
            match ctx.stream.finish_connect() {
                Ok(true) => {
                    debug!(stream_id = %id, peer = ?ctx.stream.peer_addr(), "Stream connected");
                    ctx.dispatch(StreamEvent::Connect);
                }
                Ok(false) if failed => ctx.fail("connection failed".to_string()),
                Ok(false) => return,
                Err(e) => ctx.fail(e.to_string()),
            }
        } else if writable && ctx.stream.state() == SocketState::Connected {
            if let Err(e) = ctx.stream.flush() {
                ctx.fail(e.to_string());
            }
        }

        if readable {
            while ctx.stream.state() == SocketState::Connected && !ctx.stream.is_close_requested() {
                match ctx.stream.read(&mut self.read_buf) {
                    Ok(0) => {
                        debug!(stream_id = %id, "Peer closed the connection");
                        ctx.stream.close();
                    }
                    Ok(n) => ctx.dispatch(StreamEvent::Data(self.read_buf[..n].to_vec())),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => ctx.fail(e.to_string()),
                }
            }
        }

        self.settle(id);
    }

    fn expire_connects(&mut self) {
        let now = Instant::now();
        let expired: Vec<StreamId> = self
            .contexts
            .iter()
            .filter(|(_, ctx)| ctx.stream.connect_deadline().map_or(false, |deadline| deadline <= now))
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(ctx) = self.contexts.get_mut(&id) {
                info!(stream_id = %id, peer = ?ctx.stream.peer_addr(), "Connect timed out");
                ctx.dispatch(StreamEvent::Timeout);
                ctx.stream.close();
            }
            self.settle(id);
        }
    }

    /// Apply a pending close request and destroy a stream left without a
    /// socket. `Destroy` is dispatched before the context is removed.
    fn settle(&mut self, id: StreamId) {
        loop {
            let Some(ctx) = self.contexts.get_mut(&id) else {
                return;
            };

            if ctx.stream.take_close_request() {
                ctx.stream.teardown();
                trace!(stream_id = %id, "Stream closed");
                ctx.dispatch(StreamEvent::Close);
                continue;
            }

            if ctx.stream.state() == SocketState::Closed {
                ctx.dispatch(StreamEvent::Destroy);
                self.contexts.remove(&id);
                self.live_streams.fetch_sub(1, Ordering::AcqRel);
                trace!(stream_id = %id, "Stream destroyed");
            }
            return;
        }
    }

    fn close_all(&mut self) {
        let ids: Vec<StreamId> = self.contexts.keys().copied().collect();
        for id in ids {
            if let Some(mut ctx) = self.contexts.remove(&id) {
                if ctx.stream.state() != SocketState::Closed {
                    ctx.stream.teardown();
                    ctx.dispatch(StreamEvent::Close);
                    ctx.stream.teardown();
                }
                ctx.dispatch(StreamEvent::Destroy);
                self.live_streams.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn test_config() -> TransportConfig {
        TransportConfig {
            select_timeout_ms: 50,
            connect_timeout_ms: 2000,
            ..TransportConfig::default()
        }
    }

    fn recv(rx: &Receiver<StreamEvent>) -> StreamEvent {
        rx.recv_timeout(Duration::from_secs(5)).expect("stream event")
    }

    /// Listener with a full accept queue: further connects never complete.
    /// The runtime only hosts the listener registration and is never driven.
    fn stalled_listener() -> (tokio::runtime::Runtime, tokio::net::TcpListener, Vec<std::net::TcpStream>) {
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
        while let Ok(socket) = std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
            held.push(socket);
            assert!(held.len() < 64, "accept queue never filled");
        }
        (runtime, listener, held)
    }

    #[test]
    fn test_ids_are_monotonic() {
        let io = IoCore::start(&test_config()).unwrap();
        let a = io.reserve_stream_id();
        let b = io.reserve_stream_id();
        assert!(a.is_valid());
        assert!(b > a);
        io.shutdown();
    }

    #[test]
    fn test_unconnected_stream_is_destroyed() {
        let io = IoCore::start(&test_config()).unwrap();
        let (tx, rx) = unbounded();

        io.create_stream("idle", move |_stream: &mut Stream, event| {
            let _ = tx.send(event);
        }, |_stream: &mut Stream| {})
        .unwrap();

        assert_eq!(recv(&rx), StreamEvent::Destroy);
        io.shutdown();
        assert_eq!(io.stream_count(), 0);
    }

    #[test]
    fn test_connect_write_read_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).unwrap();
            socket.write_all(b"pong").unwrap();
            buf
        });

        let io = IoCore::start(&test_config()).unwrap();
        let (tx, rx) = unbounded();
        let id = io
            .create_stream(
                "echo",
                move |stream: &mut Stream, event| {
                    if event == StreamEvent::Connect {
                        stream.write(b"hello");
                    }
                    let _ = tx.send(event);
                },
                move |stream: &mut Stream| {
                    assert!(stream.connect("127.0.0.1", port));
                },
            )
            .unwrap();

        assert_eq!(recv(&rx), StreamEvent::Connect);
        assert_eq!(recv(&rx), StreamEvent::Data(b"pong".to_vec()));
        assert_eq!(&server.join().unwrap(), b"hello");

        // server dropped its socket
        assert_eq!(recv(&rx), StreamEvent::Close);
        assert_eq!(recv(&rx), StreamEvent::Destroy);

        // late action on a destroyed stream is a no-op
        io.post_stream_action(id, |stream| {
            stream.write(b"late");
        })
        .unwrap();
        io.shutdown();
    }

    #[test]
    fn test_refused_connect_reports_error_then_close() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let io = IoCore::start(&test_config()).unwrap();
        let (tx, rx) = unbounded();
        io.create_stream(
            "refused",
            move |_stream: &mut Stream, event| {
                let _ = tx.send(event);
            },
            move |stream: &mut Stream| {
                stream.connect("127.0.0.1", port);
            },
        )
        .unwrap();

        let mut events = Vec::new();
        loop {
            let event = recv(&rx);
            let done = event == StreamEvent::Destroy;
            events.push(event);
            if done {
                break;
            }
        }

        // an immediate refusal skips straight to Destroy
        assert!(!events.contains(&StreamEvent::Connect));
        if events.len() > 1 {
            assert!(matches!(events[0], StreamEvent::Error(_)));
            assert_eq!(&events[1..], &[StreamEvent::Close, StreamEvent::Destroy]);
        }
        io.shutdown();
    }

    #[test]
    fn test_connect_timeout_raises_timeout_then_close() {
        let (_runtime, listener, _held) = stalled_listener();
        let port = listener.local_addr().unwrap().port();

        let config = TransportConfig {
            connect_timeout_ms: 150,
            ..test_config()
        };
        let io = IoCore::start(&config).unwrap();
        let (tx, rx) = unbounded();
        let started = Instant::now();
        io.create_stream(
            "stalled",
            move |_stream: &mut Stream, event| {
                let _ = tx.send(event);
            },
            move |stream: &mut Stream| {
                assert!(stream.connect("127.0.0.1", port));
            },
        )
        .unwrap();

        assert_eq!(recv(&rx), StreamEvent::Timeout);
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(recv(&rx), StreamEvent::Close);
        assert_eq!(recv(&rx), StreamEvent::Destroy);
        io.shutdown();
        assert_eq!(io.stream_count(), 0);
    }

    #[test]
    fn test_close_stream_from_other_thread() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = std::thread::spawn(move || listener.accept().map(|(socket, _)| {
            std::thread::sleep(Duration::from_millis(500));
            drop(socket);
        }));

        let io = IoCore::start(&test_config()).unwrap();
        let (tx, rx) = unbounded();
        let id = io
            .create_stream(
                "closer",
                move |_stream: &mut Stream, event| {
                    let _ = tx.send(event);
                },
                move |stream: &mut Stream| {
                    stream.connect("127.0.0.1", port);
                },
            )
            .unwrap();

        assert_eq!(recv(&rx), StreamEvent::Connect);
        io.close_stream(id).unwrap();
        assert_eq!(recv(&rx), StreamEvent::Close);
        assert_eq!(recv(&rx), StreamEvent::Destroy);
        io.shutdown();
    }

    #[test]
    fn test_post_after_shutdown_fails() {
        let io = IoCore::start(&test_config()).unwrap();
        io.shutdown();
        assert!(!io.is_running());
        assert!(matches!(
            io.close_stream(StreamId::from_raw(1)),
            Err(ChatError::Shutdown)
        ));
        // second shutdown is a no-op
        io.shutdown();
    }
}
