//! Integration tests for the desktop responder.
//!
//! These tests start a real [`DesktopServer`] on loopback and talk to it with
//! plain std sockets, the way a phone would: UDP for discovery, TCP for
//! pairing and events.  They verify:
//!
//! - Discovery reports `ISPAIRED` for a known device and `ISUNPAIRED` for an
//!   unknown one.
//! - A `PAIRME` exchange flips the next discovery reply to `ISPAIRED`, and an
//!   `UNPAIRME` exchange flips it back.
//! - Do-not-disturb silences unpaired devices only.
//! - Events sent with `INCOMING_DRIN` reach the event sink.
//! - An over-long `PAIRME` line is refused instead of pairing a cut-off id.
//! - Revoking a device locally is seen by the next discovery reply.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use drin_core::protocol::codec::{encode_event_payload, parse_discovery_response};
use drin_core::protocol::messages::DiscoveryResponse;
use drin_core::{DrinEvent, EventAction};
use drin_desktop::application::manage_pairings::ManagePairingsUseCase;
use drin_desktop::application::serve_host::{DesktopServer, ServerSettings};
use drin_desktop::infrastructure::notifier::{ChannelEventSink, LogEventSink};
use drin_desktop::infrastructure::storage::pairing_store::{MemoryPairingStore, PairingStore};

const IO_TIMEOUT: Duration = Duration::from_secs(3);

async fn start_server(store: MemoryPairingStore) -> (DesktopServer, SocketAddr) {
    start_shared(Arc::new(store)).await
}

async fn start_shared(store: Arc<dyn PairingStore>) -> (DesktopServer, SocketAddr) {
    let mut server = DesktopServer::new(
        ServerSettings {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            host_name: Some("integration-host".to_string()),
        },
        store,
        Arc::new(LogEventSink),
    );
    let addr = server.start().await.expect("server must start");
    (server, addr)
}

/// Sends one discovery datagram and waits for a reply.
async fn discover(addr: SocketAddr, device_id: &str) -> Option<DiscoveryResponse> {
    let payload = format!("DISCOVER:{device_id}");
    tokio::task::spawn_blocking(move || {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        socket.send_to(payload.as_bytes(), addr).unwrap();
        let mut buf = [0u8; 512];
        let (len, _) = socket.recv_from(&mut buf).ok()?;
        let text = std::str::from_utf8(&buf[..len]).ok()?;
        parse_discovery_response(text).ok()
    })
    .await
    .unwrap()
}

/// Runs one TCP exchange and returns the reply text.
async fn exchange(addr: SocketAddr, request: Vec<u8>) -> String {
    tokio::task::spawn_blocking(move || {
        let mut stream = TcpStream::connect_timeout(&addr, IO_TIMEOUT).unwrap();
        stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        stream.write_all(&request).unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).unwrap();
        reply
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_discover_reports_paired_and_unpaired_devices() {
    // Arrange
    let (mut server, addr) = start_server(MemoryPairingStore::with_paired(["abc"])).await;

    // Act
    let known = discover(addr, "abc").await.expect("reply for known device");
    let unknown = discover(addr, "xyz").await.expect("reply for unknown device");

    // Assert
    assert!(known.paired);
    assert_eq!(known.host_name.as_deref(), Some("integration-host"));
    assert!(!unknown.paired);
    server.stop().await;
}

#[tokio::test]
async fn test_pair_discover_unpair_cycle() {
    // Arrange
    let (mut server, addr) = start_server(MemoryPairingStore::new()).await;
    assert!(!discover(addr, "abc").await.unwrap().paired);

    // Act / Assert: pair
    let reply = exchange(addr, b"PAIRME:abc\n".to_vec()).await;
    assert_eq!(reply, "PAIRED:OK\n");
    assert!(discover(addr, "abc").await.unwrap().paired);

    // Act / Assert: unpair
    let reply = exchange(addr, b"UNPAIRME:abc\n".to_vec()).await;
    assert_eq!(reply, "UNPAIRED:OK\n");
    assert!(!discover(addr, "abc").await.unwrap().paired);

    server.stop().await;
}

#[tokio::test]
async fn test_do_not_disturb_answers_only_paired_devices() {
    // Arrange
    let (mut server, addr) = start_server(MemoryPairingStore::with_paired(["abc"])).await;
    server.set_do_not_disturb(true);

    // Act
    let paired = discover(addr, "abc").await;
    let unpaired = discover(addr, "xyz").await;

    // Assert
    assert!(paired.expect("paired device still answered").paired);
    assert!(unpaired.is_none(), "unpaired device must get no reply");
    server.stop().await;
}

#[tokio::test]
async fn test_incoming_drin_reaches_event_sink() {
    // Arrange
    let (sink, mut events) = ChannelEventSink::new(4);
    let mut server = DesktopServer::new(
        ServerSettings {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            host_name: None,
        },
        Arc::new(MemoryPairingStore::new()),
        Arc::new(sink),
    );
    let addr = server.start().await.unwrap();
    let event = DrinEvent::new("Frank", "+33 1 23 45 67 89", EventAction::ShowPopup);
    let mut request = b"INCOMING_DRIN\n".to_vec();
    request.extend(encode_event_payload(&event).unwrap());

    // Act
    let reply = exchange(addr, request).await;

    // Assert
    assert_eq!(reply, "");
    let delivered = tokio::time::timeout(IO_TIMEOUT, events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered, event);
    server.stop().await;
}

#[tokio::test]
async fn test_nameless_host_omits_name_field() {
    let mut server = DesktopServer::new(
        ServerSettings {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            host_name: None,
        },
        Arc::new(MemoryPairingStore::new()),
        Arc::new(LogEventSink),
    );
    let addr = server.start().await.unwrap();

    let reply = discover(addr, "abc").await.unwrap();

    assert_eq!(reply.host_name, None);
    server.stop().await;
}

#[tokio::test]
async fn test_overlong_pairme_line_pairs_nothing() {
    // Arrange
    let store = Arc::new(MemoryPairingStore::new());
    let (mut server, addr) = start_shared(store.clone()).await;
    let device_id = "a".repeat(600);

    // Act
    let reply = exchange(addr, format!("PAIRME:{device_id}\n").into_bytes()).await;

    // Assert
    assert_eq!(reply, "ERROR\n");
    assert!(store.paired_devices().unwrap().is_empty());
    server.stop().await;
}

#[tokio::test]
async fn test_local_removal_is_seen_by_next_discovery() {
    // Arrange
    let store = Arc::new(MemoryPairingStore::with_paired(["abc", "def"]));
    let (mut server, addr) = start_shared(store.clone()).await;
    let manage = ManagePairingsUseCase::new(store);
    assert!(discover(addr, "abc").await.unwrap().paired);

    // Act
    assert!(manage.remove("abc").unwrap());

    // Assert
    assert!(!discover(addr, "abc").await.unwrap().paired);
    assert!(discover(addr, "def").await.unwrap().paired);
    assert_eq!(manage.list().unwrap(), vec!["def"]);
    server.stop().await;
}
