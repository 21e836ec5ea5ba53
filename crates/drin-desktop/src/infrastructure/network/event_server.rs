//! TCP server for pairing, unpairing, and event delivery.
//!
//! Every connection carries exactly one exchange and is then closed:
//!
//! ```text
//! phone                                 desktop
//! ─────                                 ───────
//! PAIRME:<id>\n              ──►        store.pair(id)
//!                            ◄──        PAIRED:OK\n   (or PAIRED:ERROR\n)
//!
//! UNPAIRME:<id>\n            ──►        store.unpair(id)
//!                            ◄──        UNPAIRED:OK\n
//!
//! INCOMING_DRIN\n            ──►
//! [len:4][bincode event]     ──►        sink.deliver(event)   (no reply)
//!
//! anything else\n            ──►
//!                            ◄──        ERROR\n
//! ```
//!
//! # Scalability
//!
//! The accept loop never handles a session itself: each accepted connection
//! is handed to its own Tokio task before the next `accept()`, so a slow or
//! stalled peer never delays the others.  Every session is bounded by
//! [`SESSION_TIMEOUT`].
//!
//! # Shutdown
//!
//! `accept()` is wrapped in a 200 ms timeout so the loop can check the
//! `running` flag.  When the flag is cleared the loop exits and the listener
//! is dropped; in-flight sessions finish on their own.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use drin_core::protocol::codec::{
    decode_event_body, decode_text, encode_error_reply, encode_pairing_response,
    event_payload_len, parse_request_line, ProtocolError,
};
use drin_core::protocol::messages::{
    PairingAction, PairingRequest, PairingResponse, PairingStatus, RequestLine, APP_NAME,
    EVENT_LENGTH_PREFIX, MAX_LINE_LEN,
};
use drin_core::{DrinEvent, EventAction};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{describe, is_addr_in_use};
use crate::infrastructure::notifier::EventSink;
use crate::infrastructure::storage::pairing_store::{PairingStore, StoreError};

/// How often the accept loop checks the `running` flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Most bytes skipped after an over-long request line before replying.
const MAX_DISCARDED_LINE: usize = 64 * 1024;

/// Upper bound on one whole session, including a large event payload.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for starting the event server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Another process already owns the TCP port.
    #[error("{} is already in use; is DrinViewer already running?", describe(.addr))]
    BindConflict {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The listener could not be bound for any other reason.
    #[error("failed to bind event server on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single session ended early.  Logged, never surfaced.
#[derive(Debug, Error)]
enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("session timed out")]
    TimedOut,
}

/// Collaborators shared by every session task.
struct SessionContext {
    store: Arc<dyn PairingStore>,
    sink: Arc<dyn EventSink>,
}

/// Handle to a running event server.
#[derive(Debug)]
pub struct EventServerHandle {
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl EventServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed) && !self.task.is_finished()
    }

    /// Stops accepting connections and waits for the accept loop to exit.
    pub async fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        if let Err(e) = self.task.await {
            error!("event server task failed: {e}");
        }
    }
}

/// Binds the TCP listener on `bind_addr` and spawns the accept loop.
///
/// # Errors
///
/// Returns [`ServerError::BindConflict`] if the port is taken, or
/// [`ServerError::BindFailed`] for any other bind failure.
pub async fn start_event_server(
    bind_addr: SocketAddr,
    store: Arc<dyn PairingStore>,
    sink: Arc<dyn EventSink>,
) -> Result<EventServerHandle, ServerError> {
    let listener = TcpListener::bind(bind_addr).await.map_err(|source| {
        if is_addr_in_use(&source) {
            ServerError::BindConflict {
                addr: bind_addr,
                source,
            }
        } else {
            ServerError::BindFailed {
                addr: bind_addr,
                source,
            }
        }
    })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| ServerError::BindFailed {
            addr: bind_addr,
            source,
        })?;

    info!("event server listening on TCP {local_addr}");

    let running = Arc::new(AtomicBool::new(true));
    let ctx = Arc::new(SessionContext { store, sink });
    let task = tokio::spawn(accept_loop(listener, ctx, Arc::clone(&running)));

    Ok(EventServerHandle {
        running,
        local_addr,
        task,
    })
}

/// Accepts connections until `running` is cleared.
async fn accept_loop(listener: TcpListener, ctx: Arc<SessionContext>, running: Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::Relaxed) {
            break;
        }

        match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("connection from {peer_addr}");
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    handle_session(stream, peer_addr, ctx).await;
                });
            }
            Ok(Err(e)) => {
                // Transient accept error (e.g. too many open file descriptors).
                warn!("accept error: {e}");
            }
            Err(_) => {
                // No connection in the last poll interval.
            }
        }
    }

    info!("event server stopped");
}

// ── Per-session handler ───────────────────────────────────────────────────────

/// Runs [`run_session`] under [`SESSION_TIMEOUT`] and logs the outcome.
async fn handle_session(stream: TcpStream, peer_addr: SocketAddr, ctx: Arc<SessionContext>) {
    let result = match timeout(SESSION_TIMEOUT, run_session(stream, peer_addr, &ctx)).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::TimedOut),
    };
    match result {
        Ok(()) => debug!("session {peer_addr} closed"),
        Err(e) => debug!("session {peer_addr} ended: {e}"),
    }
}

/// Reads one request line, dispatches it, and closes the connection.
async fn run_session(
    stream: TcpStream,
    peer_addr: SocketAddr,
    ctx: &SessionContext,
) -> Result<(), SessionError> {
    let mut reader = BufReader::new(stream);

    let mut line = Vec::new();
    let read = (&mut reader)
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', &mut line)
        .await?;
    if read == 0 {
        return Ok(());
    }

    // A full buffer without a terminator means the line was cut.
    let request = if line.len() >= MAX_LINE_LEN && !line.ends_with(b"\n") {
        discard_line(&mut reader).await?;
        Err(ProtocolError::InvalidField {
            field: "request line",
            reason: format!("longer than {MAX_LINE_LEN} bytes"),
        })
    } else {
        decode_text(&line).and_then(parse_request_line)
    };

    match request {
        Ok(RequestLine::Pairing(request)) => {
            let response = apply_pairing(&request, ctx).await;
            let stream = reader.get_mut();
            stream
                .write_all(encode_pairing_response(&response).as_bytes())
                .await?;
            stream.shutdown().await?;

            if response.status == PairingStatus::Ok {
                info!("{} ({peer_addr})", pairing_message(request.action));
                notify_pairing(request.action, ctx).await;
            }
            Ok(())
        }
        Ok(RequestLine::IncomingDrin) => {
            let event = read_event(&mut reader).await?;
            debug!("event {:?} from {peer_addr}", event.action);
            if let Err(e) = ctx.sink.deliver(event).await {
                warn!("event sink rejected event from {peer_addr}: {e}");
            }
            Ok(())
        }
        Err(e) => {
            debug!("rejecting request from {peer_addr}: {e}");
            let stream = reader.get_mut();
            stream.write_all(encode_error_reply().as_bytes()).await?;
            stream.shutdown().await?;
            Ok(())
        }
    }
}

/// Skips the rest of an over-long request line so the peer's unread bytes
/// do not turn the close into a reset and swallow the `ERROR` reply.
async fn discard_line(reader: &mut BufReader<TcpStream>) -> Result<(), SessionError> {
    let mut rest = Vec::new();
    reader
        .take(MAX_DISCARDED_LINE as u64)
        .read_until(b'\n', &mut rest)
        .await?;
    Ok(())
}

/// Calls the pairing store and maps the outcome to a response.
///
/// The store is synchronous and may touch the disk, so it runs on the
/// blocking pool.
async fn apply_pairing(request: &PairingRequest, ctx: &SessionContext) -> PairingResponse {
    let Some(device_id) = request.device_id.clone() else {
        return PairingResponse {
            action: request.action,
            status: PairingStatus::Error,
        };
    };

    let store = Arc::clone(&ctx.store);
    let action = request.action;
    let outcome = tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
        match action {
            PairingAction::Pair => store.pair(&device_id),
            PairingAction::Unpair => store.unpair(&device_id),
        }
    })
    .await;

    let status = match outcome {
        Ok(Ok(())) => PairingStatus::Ok,
        Ok(Err(e)) => {
            warn!("pairing store update failed: {e}");
            PairingStatus::Error
        }
        Err(e) => {
            error!("pairing store task failed: {e}");
            PairingStatus::Error
        }
    };

    PairingResponse { action, status }
}

fn pairing_message(action: PairingAction) -> &'static str {
    match action {
        PairingAction::Pair => "Device paired",
        PairingAction::Unpair => "Device unpaired",
    }
}

/// Tells the UI that the set of paired devices changed.
async fn notify_pairing(action: PairingAction, ctx: &SessionContext) {
    let event = DrinEvent::new(APP_NAME, pairing_message(action), EventAction::ShowPaired);
    if let Err(e) = ctx.sink.deliver(event).await {
        warn!("event sink rejected pairing notification: {e}");
    }
}

/// Reads the length-prefixed event payload that follows `INCOMING_DRIN`.
///
/// The declared length is checked before anything is allocated.
async fn read_event(reader: &mut BufReader<TcpStream>) -> Result<DrinEvent, SessionError> {
    let mut prefix = [0u8; EVENT_LENGTH_PREFIX];
    reader.read_exact(&mut prefix).await?;
    let len = event_payload_len(prefix)?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(decode_event_body(&body)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::notifier::{ChannelEventSink, MockEventSink};
    use crate::infrastructure::storage::pairing_store::{MemoryPairingStore, MockPairingStore};
    use drin_core::protocol::codec::encode_event_payload;
    use drin_core::protocol::messages::MAX_EVENT_PAYLOAD;

    async fn start(
        store: Arc<dyn PairingStore>,
        sink: Arc<dyn EventSink>,
    ) -> EventServerHandle {
        start_event_server("127.0.0.1:0".parse().unwrap(), store, sink)
            .await
            .expect("server must bind")
    }

    /// Sends `request` and returns everything the server wrote back.
    async fn exchange(addr: SocketAddr, request: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();
        let mut reply = String::new();
        timeout(Duration::from_secs(5), stream.read_to_string(&mut reply))
            .await
            .expect("server must close the connection")
            .unwrap();
        reply
    }

    #[tokio::test]
    async fn test_pairme_pairs_device_and_replies_ok() {
        // Arrange
        let store = Arc::new(MemoryPairingStore::new());
        let (sink, mut events) = ChannelEventSink::new(4);
        let server = start(store.clone(), Arc::new(sink)).await;

        // Act
        let reply = exchange(server.local_addr(), b"PAIRME:abc\n").await;

        // Assert
        assert_eq!(reply, "PAIRED:OK\n");
        assert!(store.is_paired("abc").unwrap());
        let note = timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(note.action, EventAction::ShowPaired);
        assert_eq!(note.title, APP_NAME);
        assert_eq!(note.message, "Device paired");
        server.stop().await;
    }

    #[tokio::test]
    async fn test_unpairme_unpairs_device() {
        let store = Arc::new(MemoryPairingStore::with_paired(["abc"]));
        let (sink, _events) = ChannelEventSink::new(4);
        let server = start(store.clone(), Arc::new(sink)).await;

        let reply = exchange(server.local_addr(), b"UNPAIRME:abc\n").await;

        assert_eq!(reply, "UNPAIRED:OK\n");
        assert!(!store.is_paired("abc").unwrap());
        server.stop().await;
    }

    #[tokio::test]
    async fn test_store_failure_replies_error_without_notification() {
        // Arrange
        let mut store = MockPairingStore::new();
        store
            .expect_pair()
            .times(1)
            .returning(|_| Err(StoreError::EmptyDeviceId));
        let mut sink = MockEventSink::new();
        sink.expect_deliver().times(0);
        let server = start(Arc::new(store), Arc::new(sink)).await;

        // Act
        let reply = exchange(server.local_addr(), b"PAIRME:abc\n").await;

        // Assert
        assert_eq!(reply, "PAIRED:ERROR\n");
        server.stop().await;
    }

    #[tokio::test]
    async fn test_pairme_without_id_replies_error() {
        let mut store = MockPairingStore::new();
        store.expect_pair().times(0);
        let server = start(Arc::new(store), Arc::new(MockEventSink::new())).await;

        let reply = exchange(server.local_addr(), b"PAIRME\n").await;

        assert_eq!(reply, "PAIRED:ERROR\n");
        server.stop().await;
    }

    #[tokio::test]
    async fn test_overlong_request_line_replies_error_without_pairing() {
        // Arrange
        let mut store = MockPairingStore::new();
        store.expect_pair().times(0);
        let server = start(Arc::new(store), Arc::new(MockEventSink::new())).await;
        let mut request = b"PAIRME:".to_vec();
        request.extend(std::iter::repeat(b'a').take(600));
        request.push(b'\n');

        // Act
        let reply = exchange(server.local_addr(), &request).await;

        // Assert
        assert_eq!(reply, "ERROR\n");
        server.stop().await;
    }

    #[tokio::test]
    async fn test_overlong_device_id_within_line_replies_error() {
        let mut store = MockPairingStore::new();
        store.expect_pair().times(0);
        let server = start(Arc::new(store), Arc::new(MockEventSink::new())).await;
        let request = format!("PAIRME:{}\n", "a".repeat(300));

        let reply = exchange(server.local_addr(), request.as_bytes()).await;

        assert_eq!(reply, "ERROR\n");
        server.stop().await;
    }

    #[tokio::test]
    async fn test_non_utf8_request_line_replies_error() {
        let mut store = MockPairingStore::new();
        store.expect_pair().times(0);
        let server = start(Arc::new(store), Arc::new(MockEventSink::new())).await;

        let reply = exchange(server.local_addr(), &[b'P', 0xFF, 0xFE, b'\n']).await;

        assert_eq!(reply, "ERROR\n");
        server.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_keyword_replies_error() {
        let server = start(
            Arc::new(MemoryPairingStore::new()),
            Arc::new(MockEventSink::new()),
        )
        .await;

        let reply = exchange(server.local_addr(), b"HELLO:abc\n").await;

        assert_eq!(reply, "ERROR\n");
        server.stop().await;
    }

    #[tokio::test]
    async fn test_incoming_drin_delivers_event_to_sink() {
        // Arrange
        let (sink, mut events) = ChannelEventSink::new(4);
        let server = start(Arc::new(MemoryPairingStore::new()), Arc::new(sink)).await;
        let event = DrinEvent::new("Erin", "+49 30 1234567", EventAction::ShowPopup)
            .with_image(vec![7; 1024]);
        let mut request = b"INCOMING_DRIN\n".to_vec();
        request.extend(encode_event_payload(&event).unwrap());

        // Act
        let reply = exchange(server.local_addr(), &request).await;

        // Assert
        assert_eq!(reply, "");
        let delivered = timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered, event);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_oversized_payload_is_dropped() {
        // Arrange
        let mut sink = MockEventSink::new();
        sink.expect_deliver().times(0);
        let server = start(Arc::new(MemoryPairingStore::new()), Arc::new(sink)).await;
        let mut request = b"INCOMING_DRIN\n".to_vec();
        request.extend(((MAX_EVENT_PAYLOAD + 1) as u32).to_be_bytes());

        // Act
        let reply = exchange(server.local_addr(), &request).await;

        // Assert
        assert_eq!(reply, "");
        server.stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_independent() {
        // Arrange
        let store = Arc::new(MemoryPairingStore::new());
        let (sink, _events) = ChannelEventSink::new(64);
        let server = start(store.clone(), Arc::new(sink)).await;
        let addr = server.local_addr();

        // Act: one stalled peer plus many real exchanges.
        let _stalled = TcpStream::connect(addr).await.unwrap();
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            tasks.spawn(async move { exchange(addr, format!("PAIRME:dev-{i}\n").as_bytes()).await });
        }
        let mut replies = Vec::new();
        while let Some(reply) = tasks.join_next().await {
            replies.push(reply.unwrap());
        }

        // Assert
        assert_eq!(replies.len(), 16);
        assert!(replies.iter().all(|r| r == "PAIRED:OK\n"));
        for i in 0..16 {
            assert!(store.is_paired(&format!("dev-{i}")).unwrap());
        }
        server.stop().await;
    }

    #[tokio::test]
    async fn test_second_bind_on_same_port_is_bind_conflict() {
        let first = start(
            Arc::new(MemoryPairingStore::new()),
            Arc::new(MockEventSink::new()),
        )
        .await;

        let second = start_event_server(
            first.local_addr(),
            Arc::new(MemoryPairingStore::new()),
            Arc::new(MockEventSink::new()),
        )
        .await;

        assert!(matches!(second, Err(ServerError::BindConflict { .. })));
        first.stop().await;
    }

    #[tokio::test]
    async fn test_stop_ends_accept_loop() {
        let server = start(
            Arc::new(MemoryPairingStore::new()),
            Arc::new(MockEventSink::new()),
        )
        .await;
        assert!(server.is_running());

        timeout(Duration::from_secs(2), server.stop())
            .await
            .expect("stop must complete promptly");
    }
}
