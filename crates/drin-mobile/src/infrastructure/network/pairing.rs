//! TCP sessions from the phone to one desktop.
//!
//! Every exchange uses its own connection and closes it afterwards:
//!
//! ```text
//!  toggle:  ──► PAIRME:<deviceId>\n         ◄── PAIRED:OK\n
//!           ──► UNPAIRME:<deviceId>\n       ◄── UNPAIRED:OK\n
//!  event:   ──► INCOMING_DRIN\n[len:4][payload]   (no reply)
//! ```
//!
//! Connection problems (refused, unreachable, timed out) surface as
//! [`SessionError`].  A desktop that answers but does not confirm (an
//! `ERROR` status, the wrong keyword, garbage, or a closed connection) leaves
//! the device *not paired*: the toggle reports `false` rather than guessing.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use drin_core::protocol::codec::{
    decode_text, encode_event_payload, encode_incoming_drin_marker, encode_pairing_request,
    parse_pairing_response,
};
use drin_core::protocol::messages::{
    PairingAction, PairingStatus, DEFAULT_PORT, MAX_LINE_LEN, PAIRING_TIMEOUT,
};
use drin_core::{DrinEvent, HostRecord, ProtocolError};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    time,
};
use tracing::{debug, info, warn};

/// Errors that can occur during one TCP exchange.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The TCP connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The connection broke while sending or receiving.
    #[error("connection I/O error with {addr}: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Connecting or waiting for the reply took longer than allowed.
    #[error("{addr} did not respond within {after:?}")]
    Timeout { addr: SocketAddr, after: Duration },

    /// The request could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl SessionError {
    /// Returns `true` for failures to reach or talk to the desktop, as
    /// opposed to a request that could not even be built.
    pub fn is_connection_failure(&self) -> bool {
        !matches!(self, SessionError::Protocol(_))
    }
}

/// Opens one-shot TCP sessions to desktops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingSession {
    /// Desktop TCP port.
    pub port: u16,
    /// Limit for establishing the connection.
    pub connect_timeout: Duration,
    /// Limit for sending the request and, for pairing, receiving the reply.
    pub io_timeout: Duration,
}

impl Default for PairingSession {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: PAIRING_TIMEOUT,
            io_timeout: PAIRING_TIMEOUT,
        }
    }
}

impl PairingSession {
    /// Builds a session using one timeout for both connecting and replies.
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self {
            port,
            connect_timeout: timeout,
            io_timeout: timeout,
        }
    }

    /// Pairs with `host` if it is currently unpaired, unpairs otherwise.
    ///
    /// Returns the pairing state the desktop confirmed.  Anything short of a
    /// matching `OK` reply yields `false`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connect`], [`SessionError::Io`], or
    /// [`SessionError::Timeout`] when the desktop cannot be reached or does
    /// not reply within [`io_timeout`](Self::io_timeout), and
    /// [`SessionError::Protocol`] for an unusable `device_id`.
    pub async fn toggle_pairing(
        &self,
        host: &HostRecord,
        device_id: &str,
    ) -> Result<bool, SessionError> {
        let action = PairingAction::toggling(host.paired);
        let request = encode_pairing_request(action, device_id)?;
        let addr = SocketAddr::new(host.address, self.port);

        let mut stream = self.connect(addr).await?;
        self.with_io_timeout(addr, stream.write_all(request.as_bytes()))
            .await?;

        let mut line = String::new();
        let mut reader = BufReader::new(&mut stream).take(MAX_LINE_LEN as u64);
        self.with_io_timeout(addr, reader.read_line(&mut line))
            .await?;

        let confirmed = match decode_text(line.as_bytes()).and_then(parse_pairing_response) {
            Ok(reply) if reply.action == action && reply.status == PairingStatus::Ok => true,
            Ok(reply) => {
                warn!(?reply, "{host} did not confirm {:?}", action);
                false
            }
            Err(e) => {
                warn!("unusable pairing reply from {host}: {e}");
                false
            }
        };

        let paired = confirmed && action.resulting_state();
        if confirmed {
            info!(paired, "pairing with {host} changed");
        }
        Ok(paired)
    }

    /// Delivers one event to `host`.  Does not wait for any reply.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Protocol`] if the event cannot be encoded
    /// (for example an oversized image), otherwise see
    /// [`send_encoded`](Self::send_encoded).
    pub async fn send_event(&self, host: &HostRecord, event: &DrinEvent) -> Result<(), SessionError> {
        let payload = encode_event_payload(event)?;
        self.send_encoded(host.address, &payload).await
    }

    /// Sends `INCOMING_DRIN` followed by an already encoded event payload.
    ///
    /// Lets one encoding be shared when the same event goes to many hosts.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connect`], [`SessionError::Io`], or
    /// [`SessionError::Timeout`].
    pub async fn send_encoded(&self, address: IpAddr, payload: &[u8]) -> Result<(), SessionError> {
        let addr = SocketAddr::new(address, self.port);
        let mut stream = self.connect(addr).await?;
        let marker = encode_incoming_drin_marker();

        self.with_io_timeout(addr, async {
            stream.write_all(marker.as_bytes()).await?;
            stream.write_all(payload).await?;
            stream.flush().await?;
            stream.shutdown().await
        })
        .await?;

        debug!(bytes = payload.len(), "event sent to {addr}");
        Ok(())
    }

    async fn connect(&self, addr: SocketAddr) -> Result<TcpStream, SessionError> {
        match time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(SessionError::Connect { addr, source }),
            Err(_) => Err(SessionError::Timeout {
                addr,
                after: self.connect_timeout,
            }),
        }
    }

    async fn with_io_timeout<T>(
        &self,
        addr: SocketAddr,
        op: impl std::future::Future<Output = std::io::Result<T>>,
    ) -> Result<T, SessionError> {
        match time::timeout(self.io_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(SessionError::Io { addr, source }),
            Err(_) => Err(SessionError::Timeout {
                addr,
                after: self.io_timeout,
            }),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use drin_core::protocol::codec::{decode_event_body, event_payload_len};
    use drin_core::EventAction;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_test::{assert_err, assert_ok};

    fn loopback_host(paired: bool) -> HostRecord {
        HostRecord::new(Some("desk".to_string()), IpAddr::V4(Ipv4Addr::LOCALHOST), paired)
    }

    fn session(port: u16) -> PairingSession {
        PairingSession::new(port, Duration::from_millis(500))
    }

    /// Accepts one connection, records the request line, and replies.
    async fn one_shot_server(reply: &'static str) -> (u16, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            reader.get_mut().write_all(reply.as_bytes()).await.unwrap();
            reader.get_mut().shutdown().await.ok();
            tx.send(line).ok();
        });
        (port, rx)
    }

    #[tokio::test]
    async fn test_toggle_on_unpaired_host_sends_pairme() {
        // Arrange
        let (port, request) = one_shot_server("PAIRED:OK\n").await;

        // Act
        let paired = assert_ok!(
            session(port)
                .toggle_pairing(&loopback_host(false), "ABC")
                .await
        );

        // Assert
        assert!(paired);
        assert_eq!(request.await.unwrap(), "PAIRME:ABC\n");
    }

    #[tokio::test]
    async fn test_toggle_on_paired_host_sends_unpairme() {
        let (port, request) = one_shot_server("UNPAIRED:OK\n").await;

        let paired = assert_ok!(
            session(port)
                .toggle_pairing(&loopback_host(true), "ABC")
                .await
        );

        assert!(!paired);
        assert_eq!(request.await.unwrap(), "UNPAIRME:ABC\n");
    }

    #[tokio::test]
    async fn test_error_status_fails_closed() {
        let (port, _request) = one_shot_server("PAIRED:ERROR\n").await;

        let paired = assert_ok!(
            session(port)
                .toggle_pairing(&loopback_host(false), "ABC")
                .await
        );

        assert!(!paired);
    }

    #[tokio::test]
    async fn test_mismatched_keyword_fails_closed() {
        let (port, _request) = one_shot_server("UNPAIRED:OK\n").await;

        let paired = assert_ok!(
            session(port)
                .toggle_pairing(&loopback_host(false), "ABC")
                .await
        );

        assert!(!paired);
    }

    #[tokio::test]
    async fn test_bare_error_reply_fails_closed() {
        let (port, _request) = one_shot_server("ERROR\n").await;

        let paired = assert_ok!(
            session(port)
                .toggle_pairing(&loopback_host(false), "ABC")
                .await
        );

        assert!(!paired);
    }

    #[tokio::test]
    async fn test_closed_connection_without_reply_fails_closed() {
        let (port, _request) = one_shot_server("").await;

        let paired = assert_ok!(
            session(port)
                .toggle_pairing(&loopback_host(false), "ABC")
                .await
        );

        assert!(!paired);
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() {
        // Arrange
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        // Act
        let result = session(port)
            .toggle_pairing(&loopback_host(false), "ABC")
            .await;

        // Assert
        let err = assert_err!(result);
        assert!(matches!(err, SessionError::Connect { .. }));
        assert!(err.is_connection_failure());
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let holder = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });
        let started = std::time::Instant::now();

        // Act
        let result = PairingSession::new(port, Duration::from_millis(200))
            .toggle_pairing(&loopback_host(false), "ABC")
            .await;

        // Assert
        assert!(matches!(result, Err(SessionError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
        holder.abort();
    }

    #[tokio::test]
    async fn test_invalid_device_id_is_protocol_error() {
        let result = session(9).toggle_pairing(&loopback_host(false), "").await;

        let err = result.unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
        assert!(!err.is_connection_failure());
    }

    #[tokio::test]
    async fn test_send_event_writes_marker_and_payload() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let receiver = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let mut prefix = [0u8; 4];
            reader.read_exact(&mut prefix).await.unwrap();
            let mut body = vec![0u8; event_payload_len(prefix).unwrap()];
            reader.read_exact(&mut body).await.unwrap();
            (line, decode_event_body(&body).unwrap())
        });
        let event = DrinEvent::new("Alice", "calling", EventAction::ShowPopup);

        // Act
        session(port)
            .send_event(&loopback_host(true), &event)
            .await
            .unwrap();

        // Assert
        let (line, received) = receiver.await.unwrap();
        assert_eq!(line, "INCOMING_DRIN\n");
        assert_eq!(received, event);
    }
}
