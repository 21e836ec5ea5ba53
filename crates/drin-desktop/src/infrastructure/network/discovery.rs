//! UDP discovery responder.
//!
//! The desktop binds a UDP socket on the DrinViewer port (default 50001) and
//! answers every `DISCOVER[:<deviceId>]` datagram with
//!
//! ```text
//! DISCOVER_RESPONSE:<ISPAIRED|ISUNPAIRED>[:<hostName>]:DISCOVER_RESPONSE_END
//! ```
//!
//! sent back to the source address and port of the request.
//!
//! # How UDP discovery works (for beginners)
//!
//! UDP is connectionless: a datagram sent to the LAN broadcast address (e.g.
//! `255.255.255.255`) reaches every machine on the subnet that is listening on
//! that port.  The phone does exactly that, and every desktop running this
//! responder replies directly (unicast) to the phone.  The phone collects the
//! replies and now knows the address of every desktop on the LAN.
//!
//! # Threads
//!
//! The receive loop runs on a dedicated OS thread so synchronous socket I/O
//! never blocks the Tokio runtime.  Each request is answered on its own
//! short-lived worker thread, so a slow pairing-store lookup does not delay
//! the next receive.  At most [`MAX_IN_FLIGHT_REPLIES`] workers run at once;
//! datagrams beyond that are dropped, which the sender sees as "no reply".
//!
//! # Read timeout
//!
//! The socket has a 500 ms read timeout.  It is not a protocol timeout: it
//! only lets the loop notice that the `running` flag was cleared.
//!
//! # Do not disturb
//!
//! While do-not-disturb is on, requests from devices that are not paired get
//! no reply at all.  Paired devices are still answered.

use std::net::{SocketAddr, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use drin_core::protocol::codec::{decode_text, encode_discovery_response, parse_discovery_request};
use drin_core::protocol::messages::{DiscoveryRequest, DiscoveryResponse, DATAGRAM_BUFFER_LEN};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{describe, is_addr_in_use, is_timeout_error};
use crate::infrastructure::storage::pairing_store::PairingStore;

/// Poll interval for the `running` flag.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on concurrently running reply workers.
pub const MAX_IN_FLIGHT_REPLIES: usize = 32;

/// Error type for discovery responder operations.
#[derive(Debug, Error)]
pub enum ResponderError {
    /// Another process already owns the discovery port.
    #[error("{} is already in use; is DrinViewer already running?", describe(.addr))]
    BindConflict {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The UDP socket could not be bound for any other reason.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Socket options could not be applied.
    #[error("failed to configure discovery socket: {0}")]
    Socket(#[source] std::io::Error),

    /// The receive thread could not be started.
    #[error("failed to spawn discovery thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}

/// Everything a reply worker needs, shared by all workers.
struct ReplyContext {
    socket: UdpSocket,
    store: Arc<dyn PairingStore>,
    host_name: Option<String>,
    do_not_disturb: Arc<AtomicBool>,
    in_flight: AtomicUsize,
}

/// Decrements the in-flight counter when a worker finishes, even on panic.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Handle to a running responder.  Dropping it stops the responder.
#[derive(Debug)]
pub struct ResponderHandle {
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
    thread: Option<JoinHandle<()>>,
}

impl ResponderHandle {
    /// The address the socket is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Asks the receive loop to exit.  Returns immediately; the loop notices
    /// within one poll interval.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Stops the loop and waits for the receive thread to finish.
    pub fn join(mut self) {
        self.stop();
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("discovery thread panicked");
            }
        }
    }
}

impl Drop for ResponderHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Binds the discovery socket on `bind_addr` and spawns the receive thread.
///
/// `host_name` is sent in every reply; `None` omits the field and the phone
/// shows the desktop's address instead.  `do_not_disturb` is read on every
/// request, so toggling it takes effect immediately.
///
/// # Errors
///
/// Returns [`ResponderError::BindConflict`] if the port is taken,
/// [`ResponderError::BindFailed`] for any other bind failure, and
/// [`ResponderError::ThreadSpawn`] if the OS refuses a new thread.
pub fn start_discovery_responder(
    bind_addr: SocketAddr,
    store: Arc<dyn PairingStore>,
    host_name: Option<String>,
    do_not_disturb: Arc<AtomicBool>,
) -> Result<ResponderHandle, ResponderError> {
    let socket = UdpSocket::bind(bind_addr).map_err(|source| {
        if is_addr_in_use(&source) {
            ResponderError::BindConflict {
                addr: bind_addr,
                source,
            }
        } else {
            ResponderError::BindFailed {
                addr: bind_addr,
                source,
            }
        }
    })?;
    socket.set_broadcast(true).map_err(ResponderError::Socket)?;
    socket
        .set_read_timeout(Some(RECV_POLL_INTERVAL))
        .map_err(ResponderError::Socket)?;
    let local_addr = socket.local_addr().map_err(ResponderError::Socket)?;

    let running = Arc::new(AtomicBool::new(true));
    let ctx = Arc::new(ReplyContext {
        socket,
        store,
        host_name,
        do_not_disturb,
        in_flight: AtomicUsize::new(0),
    });

    let loop_running = Arc::clone(&running);
    let thread = std::thread::Builder::new()
        .name("drin-discovery".to_string())
        .spawn(move || responder_loop(ctx, loop_running))
        .map_err(ResponderError::ThreadSpawn)?;

    info!("discovery responder listening on UDP {local_addr}");
    Ok(ResponderHandle {
        running,
        local_addr,
        thread: Some(thread),
    })
}

/// The receive loop executed on the discovery thread.
fn responder_loop(ctx: Arc<ReplyContext>, running: Arc<AtomicBool>) {
    let mut buf = [0u8; DATAGRAM_BUFFER_LEN];

    while running.load(Ordering::Relaxed) {
        let (len, src) = match ctx.socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                // Windows reports ICMP port-unreachable for an earlier reply
                // as a recv error on the next call; it is not fatal.
                debug!("discovery recv error: {e}");
                continue;
            }
        };

        let request = match decode_text(&buf[..len]).and_then(parse_discovery_request) {
            Ok(request) => request,
            Err(e) => {
                debug!("ignoring datagram from {src}: {e}");
                continue;
            }
        };

        if ctx.in_flight.fetch_add(1, Ordering::AcqRel) >= MAX_IN_FLIGHT_REPLIES {
            ctx.in_flight.fetch_sub(1, Ordering::AcqRel);
            warn!("too many pending discovery replies; dropping request from {src}");
            continue;
        }

        let worker_ctx = Arc::clone(&ctx);
        let spawned = std::thread::Builder::new()
            .name("drin-discovery-reply".to_string())
            .spawn(move || {
                let _guard = InFlightGuard(&worker_ctx.in_flight);
                reply(&worker_ctx, &request, src);
            });
        if let Err(e) = spawned {
            ctx.in_flight.fetch_sub(1, Ordering::AcqRel);
            warn!("failed to spawn discovery reply worker: {e}");
        }
    }

    info!("discovery responder stopped");
}

/// Answers one request.  Runs on a worker thread.
fn reply(ctx: &ReplyContext, request: &DiscoveryRequest, dest: SocketAddr) {
    let dnd = ctx.do_not_disturb.load(Ordering::Relaxed);
    let Some(response) = build_response(ctx.store.as_ref(), request, ctx.host_name.as_deref(), dnd)
    else {
        debug!("do-not-disturb: not answering unpaired device at {dest}");
        return;
    };

    let text = match encode_discovery_response(&response) {
        Ok(text) => text,
        Err(e) => {
            error!("failed to encode discovery response: {e}");
            return;
        }
    };

    match ctx.socket.send_to(text.as_bytes(), dest) {
        Ok(_) => debug!(paired = response.paired, "answered discovery from {dest}"),
        Err(e) => warn!("failed to send discovery response to {dest}: {e}"),
    }
}

/// Decides what to answer, or `None` to stay silent.
///
/// A pairing-store failure counts as "not paired": the phone is told less
/// than it might be entitled to, never more.
pub(crate) fn build_response(
    store: &dyn PairingStore,
    request: &DiscoveryRequest,
    host_name: Option<&str>,
    do_not_disturb: bool,
) -> Option<DiscoveryResponse> {
    let paired = match request.device_id.as_deref() {
        Some(id) => store.is_paired(id).unwrap_or_else(|e| {
            warn!("pairing store lookup failed: {e}");
            false
        }),
        None => false,
    };

    if do_not_disturb && !paired {
        return None;
    }

    Some(DiscoveryResponse {
        paired,
        host_name: host_name.map(str::to_string),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
