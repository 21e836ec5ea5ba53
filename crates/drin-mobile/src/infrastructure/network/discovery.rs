//! UDP discovery client.
//!
//! Broadcasts `DISCOVER:<deviceId>` to the DrinViewer port and collects the
//! `DISCOVER_RESPONSE` datagrams that desktops send back.  Every responding
//! desktop becomes a [`HostRecord`] in the shared [`HostRegistry`].
//!
//! # Retry policy (for beginners)
//!
//! UDP broadcasts get lost, and desktops answer at different speeds.  The
//! client therefore runs in *attempts*:
//!
//! ```text
//!  send DISCOVER ──► wait for replies ──► window closes after `attempt_timeout`
//!        ▲                 │                 of silence
//!        │                 ▼
//!        │         reply from a new host?  ── yes ──► attempt was fruitful
//!        │                                  ── no  ──► attempt was fruitless
//!        └──────── until `broadcast_count` fruitless attempts in a row
//! ```
//!
//! - The silence window restarts after every accepted reply, so a host that
//!   answers late in the window does not cut the next one short.
//! - Finding a new host resets the fruitless counter; duplicates do not.
//! - `max_duration` is a hard wall-clock ceiling that ends the run whatever
//!   the counters say.
//!
//! # Termination
//!
//! However the run ends (counters exhausted, ceiling hit, socket error, or
//! [`DiscoveryHandle::stop`]), [`HostRegistry::mark_producer_stopped`] is
//! called exactly once, so a consumer blocked in
//! [`HostRegistry::consume_latest`] is always released.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use drin_core::protocol::codec::{
    decode_text, encode_discovery_request, parse_discovery_response,
};
use drin_core::protocol::messages::{
    DATAGRAM_BUFFER_LEN, DEFAULT_PORT, DISCOVERY_BROADCAST_COUNT, DISCOVERY_MAX_TIMEOUT,
    DISCOVER_TIMEOUT,
};
use drin_core::{HostRecord, HostRegistry, ProtocolError, PublishOutcome};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::is_timeout_error;

/// Longest single blocking receive.  Bounds how long `stop()` takes to be
/// noticed.
const RECV_SLICE: Duration = Duration::from_millis(250);

/// Error type for starting a discovery run.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The device id cannot be put on the wire.
    #[error("invalid device id: {0}")]
    InvalidDeviceId(#[source] ProtocolError),

    /// The discovery thread could not be started.
    #[error("failed to spawn discovery thread: {0}")]
    ThreadSpawn(#[source] io::Error),
}

/// Timing and addressing for one discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverySettings {
    /// Desktop port the broadcast is sent to.
    pub port: u16,
    /// Fruitless attempts in a row before giving up.
    pub broadcast_count: u32,
    /// Silence window per attempt.
    pub attempt_timeout: Duration,
    /// Hard ceiling for the whole run.
    pub max_duration: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            broadcast_count: DISCOVERY_BROADCAST_COUNT,
            attempt_timeout: DISCOVER_TIMEOUT,
            max_duration: DISCOVERY_MAX_TIMEOUT,
        }
    }
}

/// How discovered hosts enter the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandoffMode {
    /// Through the blocking single-slot relay.  Expects a consumer draining
    /// [`HostRegistry::consume_latest`]; without one the second host blocks
    /// the run until it is stopped or `max_duration` runs out.
    Relay,
    /// Straight into the list.  For callers that only look at the result.
    #[default]
    Bulk,
}

/// Marks the producer stopped at most once per run.
#[derive(Debug, Clone)]
struct StopSignal {
    registry: Arc<HostRegistry>,
    sent: Arc<AtomicBool>,
}

impl StopSignal {
    fn send(&self) {
        if !self.sent.swap(true, Ordering::AcqRel) {
            self.registry.mark_producer_stopped();
        }
    }
}

/// Sends the stop signal when the discovery thread exits, even on panic.
struct StopOnExit(StopSignal);

impl Drop for StopOnExit {
    fn drop(&mut self) {
        self.0.send();
    }
}

/// Cloneable capability to end a discovery run early.
#[derive(Debug, Clone)]
pub struct DiscoveryStopper {
    running: Arc<AtomicBool>,
    signal: StopSignal,
}

impl DiscoveryStopper {
    /// Ends the run.
    ///
    /// The registry is marked stopped immediately, so a blocked consumer
    /// returns at once; the thread itself exits within one receive slice.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.signal.send();
    }
}

/// Handle to a running discovery thread.
#[derive(Debug)]
pub struct DiscoveryHandle {
    stopper: DiscoveryStopper,
    thread: Option<JoinHandle<()>>,
}

impl DiscoveryHandle {
    /// Ends the run early.  See [`DiscoveryStopper::stop`].
    pub fn stop(&self) {
        self.stopper.stop();
    }

    /// A stopper that can be kept after the handle itself has been moved
    /// to the thread that joins it.
    pub fn stopper(&self) -> DiscoveryStopper {
        self.stopper.clone()
    }

    /// Waits for the discovery thread to finish without stopping it.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("discovery thread panicked");
            }
        }
    }

    /// Returns `true` once the discovery thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

/// Resets `registry` and starts a discovery run on a new thread.
///
/// Results are sent to `broadcast:settings.port`.  Only one run per registry
/// may be active; stop and join the previous handle first.
///
/// # Errors
///
/// Returns [`DiscoveryError::InvalidDeviceId`] if `device_id` is empty or
/// contains the field separator, and [`DiscoveryError::ThreadSpawn`] if the
/// OS refuses a new thread.  In the latter case the registry has already been
/// reset and is marked stopped again before returning.
pub fn start_discovery(
    broadcast: IpAddr,
    device_id: &str,
    settings: DiscoverySettings,
    registry: Arc<HostRegistry>,
    mode: HandoffMode,
) -> Result<DiscoveryHandle, DiscoveryError> {
    let request = encode_discovery_request(device_id).map_err(DiscoveryError::InvalidDeviceId)?;

    registry.reset();
    let running = Arc::new(AtomicBool::new(true));
    let signal = StopSignal {
        registry: Arc::clone(&registry),
        sent: Arc::new(AtomicBool::new(false)),
    };

    let target = SocketAddr::new(broadcast, settings.port);
    let thread_running = Arc::clone(&running);
    let thread_signal = signal.clone();
    let spawned = std::thread::Builder::new()
        .name("drin-discover".to_string())
        .spawn(move || {
            let _exit = StopOnExit(thread_signal);
            match discovery_loop(target, &request, settings, &registry, mode, &thread_running) {
                Ok(found) => info!("discovery finished: {found} new host(s)"),
                Err(e) => error!("discovery aborted: {e}"),
            }
        });

    match spawned {
        Ok(thread) => Ok(DiscoveryHandle {
            stopper: DiscoveryStopper { running, signal },
            thread: Some(thread),
        }),
        Err(e) => {
            signal.send();
            Err(DiscoveryError::ThreadSpawn(e))
        }
    }
}

/// The attempt loop executed on the discovery thread.  Returns the number of
/// hosts added to the registry.
fn discovery_loop(
    target: SocketAddr,
    request: &str,
    settings: DiscoverySettings,
    registry: &HostRegistry,
    mode: HandoffMode,
    running: &AtomicBool,
) -> io::Result<usize> {
    let local: IpAddr = match target {
        SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    };
    let socket = UdpSocket::bind(SocketAddr::new(local, 0))?;
    if target.is_ipv4() {
        socket.set_broadcast(true)?;
    }

    let deadline = Instant::now() + settings.max_duration;
    let mut buf = [0u8; DATAGRAM_BUFFER_LEN];
    let mut fruitless = 0u32;
    let mut found = 0usize;

    info!("discovering DrinViewer hosts via {target}");

    'attempts: while running.load(Ordering::Relaxed)
        && fruitless < settings.broadcast_count
        && Instant::now() < deadline
    {
        socket.send_to(request.as_bytes(), target)?;
        debug!(attempt = fruitless + 1, "discovery request sent");

        let mut found_new = false;
        let mut window_end = Instant::now() + settings.attempt_timeout;

        while running.load(Ordering::Relaxed) {
            let now = Instant::now();
            let until = window_end.min(deadline);
            if now >= until {
                break;
            }
            socket.set_read_timeout(Some((until - now).min(RECV_SLICE)))?;

            let (len, src) = match socket.recv_from(&mut buf) {
                Ok(pair) => pair,
                Err(e) if is_timeout_error(&e) => continue,
                // ICMP "port unreachable" for an earlier datagram, reported
                // on some platforms as a receive error.  Not a socket failure.
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    debug!("discovery recv error: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let response = match decode_text(&buf[..len]).and_then(parse_discovery_response) {
                Ok(response) => response,
                Err(e) => {
                    debug!("ignoring datagram from {src}: {e}");
                    continue;
                }
            };

            window_end = Instant::now() + settings.attempt_timeout;
            let record = HostRecord::from_response(&response, src.ip());
            let added = match mode {
                HandoffMode::Relay => match registry.publish_until(record.clone(), deadline) {
                    PublishOutcome::Added => true,
                    PublishOutcome::Duplicate => false,
                    PublishOutcome::TimedOut => break 'attempts,
                },
                HandoffMode::Bulk => registry.bulk_add(record.clone()),
            };
            if added {
                info!(paired = record.paired, "found host {record}");
                found_new = true;
                found += 1;
            }
        }

        if found_new {
            fruitless = 0;
        } else {
            fruitless += 1;
        }
    }

    if Instant::now() >= deadline {
        warn!(
            "discovery stopped at the {:?} ceiling",
            settings.max_duration
        );
    }
    Ok(found)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    /// A loopback UDP socket that answers every request with `reply`.
    fn fake_responder(reply: &'static str) -> (u16, Arc<AtomicBool>) {
        fake_responders(reply, &[])
    }

    /// Like [`fake_responder`], but every request is also answered from each
    /// address in `also_from`, so the client sees one host per address.
    fn fake_responders(reply: &'static str, also_from: &[Ipv4Addr]) -> (u16, Arc<AtomicBool>) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let port = socket.local_addr().unwrap().port();
        let others: Vec<UdpSocket> = also_from
            .iter()
            .map(|ip| UdpSocket::bind(SocketAddr::new(IpAddr::V4(*ip), 0)).unwrap())
            .collect();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        std::thread::spawn(move || {
            let mut buf = [0u8; DATAGRAM_BUFFER_LEN];
            while flag.load(Ordering::Relaxed) {
                if let Ok((_, src)) = socket.recv_from(&mut buf) {
                    socket.send_to(reply.as_bytes(), src).ok();
                    for other in &others {
                        other.send_to(reply.as_bytes(), src).ok();
                    }
                }
            }
        });
        (port, running)
    }

    fn fast_settings(port: u16) -> DiscoverySettings {
        DiscoverySettings {
            port,
            broadcast_count: 2,
            attempt_timeout: Duration::from_millis(100),
            max_duration: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_default_settings_match_protocol_constants() {
        let settings = DiscoverySettings::default();
        assert_eq!(settings.port, 50001);
        assert_eq!(settings.broadcast_count, 3);
        assert_eq!(settings.attempt_timeout, Duration::from_millis(4000));
        assert_eq!(settings.max_duration, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_device_id_is_rejected_before_reset() {
        // Arrange
        let registry = Arc::new(HostRegistry::new());

        // Act
        let result = start_discovery(
            loopback(),
            "a:b",
            fast_settings(9),
            Arc::clone(&registry),
            HandoffMode::Bulk,
        );

        // Assert
        assert!(matches!(result, Err(DiscoveryError::InvalidDeviceId(_))));
        assert!(!registry.is_producer_active());
    }

    #[test]
    fn test_no_responders_ends_with_one_stop_signal() {
        // Arrange
        let registry = Arc::new(HostRegistry::new());
        let closed_port = UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let started = Instant::now();

        // Act
        let handle = start_discovery(
            loopback(),
            "ABC",
            fast_settings(closed_port),
            Arc::clone(&registry),
            HandoffMode::Relay,
        )
        .unwrap();
        let consumed = registry.consume_latest();
        handle.join();

        // Assert
        assert_eq!(consumed, None);
        assert!(registry.is_empty());
        assert_eq!(registry.stop_signal_count(), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_hard_ceiling_ends_run_despite_large_retry_count() {
        // Arrange
        let registry = Arc::new(HostRegistry::new());
        let settings = DiscoverySettings {
            port: 9,
            broadcast_count: 1_000,
            attempt_timeout: Duration::from_millis(100),
            max_duration: Duration::from_millis(400),
        };
        let started = Instant::now();

        // Act
        let handle =
            start_discovery(loopback(), "ABC", settings, Arc::clone(&registry), HandoffMode::Bulk)
                .unwrap();
        handle.join();

        // Assert
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(registry.stop_signal_count(), 1);
    }

    #[test]
    fn test_responding_host_is_bulk_added_once() {
        // Arrange
        let (port, responder) =
            fake_responder("DISCOVER_RESPONSE:ISPAIRED:desk:DISCOVER_RESPONSE_END");
        let registry = Arc::new(HostRegistry::new());

        // Act
        let handle = start_discovery(
            loopback(),
            "ABC",
            fast_settings(port),
            Arc::clone(&registry),
            HandoffMode::Bulk,
        )
        .unwrap();
        handle.join();
        responder.store(false, Ordering::Relaxed);

        // Assert
        let hosts = registry.snapshot();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].display_name, "desk");
        assert_eq!(hosts[0].address, loopback());
        assert!(hosts[0].paired);
        assert_eq!(registry.stop_signal_count(), 1);
    }

    #[test]
    fn test_relay_mode_hands_host_to_consumer() {
        // Arrange
        let (port, responder) =
            fake_responder("DISCOVER_RESPONSE:ISUNPAIRED:DISCOVER_RESPONSE_END");
        let registry = Arc::new(HostRegistry::new());

        // Act
        let handle = start_discovery(
            loopback(),
            "ABC",
            fast_settings(port),
            Arc::clone(&registry),
            HandoffMode::Relay,
        )
        .unwrap();
        let first = registry.consume_latest();
        let end = registry.consume_latest();
        handle.join();
        responder.store(false, Ordering::Relaxed);

        // Assert
        let first = first.expect("host relayed");
        assert_eq!(first.display_name, "127.0.0.1");
        assert!(!first.paired);
        assert_eq!(end, None);
    }

    #[test]
    fn test_relay_mode_without_consumer_still_honours_ceiling() {
        // Arrange: two hosts answer, nobody drains the slot.
        let (port, responder) = fake_responders(
            "DISCOVER_RESPONSE:ISUNPAIRED:DISCOVER_RESPONSE_END",
            &[Ipv4Addr::new(127, 0, 0, 2)],
        );
        let registry = Arc::new(HostRegistry::new());
        let settings = DiscoverySettings {
            port,
            broadcast_count: 3,
            attempt_timeout: Duration::from_millis(200),
            max_duration: Duration::from_millis(500),
        };
        let started = Instant::now();

        // Act
        let handle =
            start_discovery(loopback(), "ABC", settings, Arc::clone(&registry), HandoffMode::Relay)
                .unwrap();
        while !handle.is_finished() && started.elapsed() < Duration::from_secs(3) {
            std::thread::sleep(Duration::from_millis(20));
        }
        let finished = handle.is_finished();
        handle.stop();
        handle.join();
        responder.store(false, Ordering::Relaxed);

        // Assert
        assert!(finished, "discovery ran past its 500ms ceiling");
        assert!(!registry.is_producer_active());
        assert_eq!(registry.stop_signal_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_malformed_replies_are_ignored() {
        let (port, responder) = fake_responder("HELLO");
        let registry = Arc::new(HostRegistry::new());

        let handle = start_discovery(
            loopback(),
            "ABC",
            fast_settings(port),
            Arc::clone(&registry),
            HandoffMode::Bulk,
        )
        .unwrap();
        handle.join();
        responder.store(false, Ordering::Relaxed);

        assert!(registry.is_empty());
    }

    #[test]
    fn test_stop_releases_consumer_and_signals_once() {
        // Arrange
        let registry = Arc::new(HostRegistry::new());
        let settings = DiscoverySettings {
            port: 9,
            broadcast_count: 1_000,
            attempt_timeout: Duration::from_secs(1),
            max_duration: Duration::from_secs(30),
        };
        let handle =
            start_discovery(loopback(), "ABC", settings, Arc::clone(&registry), HandoffMode::Relay)
                .unwrap();

        // Act
        handle.stop();
        let consumed = registry.consume_latest();
        handle.join();

        // Assert
        assert_eq!(consumed, None);
        assert_eq!(registry.stop_signal_count(), 1);
    }
}
