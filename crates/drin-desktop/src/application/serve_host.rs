//! DesktopServer: the process-scoped responder service.
//!
//! One `DesktopServer` owns both network services of the desktop side:
//!
//! - the UDP discovery responder (answers `DISCOVER` broadcasts), and
//! - the TCP event server (pairing exchanges and event delivery).
//!
//! Both share one port number and the same injected [`PairingStore`], so a
//! device paired over TCP is reported as `ISPAIRED` by the very next
//! discovery reply.
//!
//! # Lifecycle
//!
//! ```text
//!  new() ──► start() ──► running ──► stop() ──► stopped ──► start() ...
//! ```
//!
//! `start()` binds TCP first and then UDP on the port TCP actually got, which
//! keeps the two on the same number even when port 0 (OS-assigned) is used.
//! If the second bind fails the first service is shut down again, so a
//! failed start leaves nothing running.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use thiserror::Error;
use tracing::{info, warn};

use crate::infrastructure::network::discovery::{
    start_discovery_responder, ResponderError, ResponderHandle,
};
use crate::infrastructure::network::event_server::{
    start_event_server, EventServerHandle, ServerError,
};
use crate::infrastructure::notifier::EventSink;
use crate::infrastructure::storage::pairing_store::PairingStore;

/// Error type for the desktop server lifecycle.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Discovery(#[from] ResponderError),

    #[error(transparent)]
    Events(#[from] ServerError),
}

impl ServeError {
    /// Returns `true` when the port is held by another process, which the
    /// user should be told about as "already running".
    pub fn is_bind_conflict(&self) -> bool {
        matches!(
            self,
            ServeError::Discovery(ResponderError::BindConflict { .. })
                | ServeError::Events(ServerError::BindConflict { .. })
        )
    }
}

/// Where and as whom the server answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Address for both sockets.  Port 0 lets the OS pick one.
    pub bind_addr: SocketAddr,
    /// Name sent in discovery replies.
    pub host_name: Option<String>,
}

struct RunningServices {
    responder: ResponderHandle,
    events: EventServerHandle,
}

/// The desktop responder service.
pub struct DesktopServer {
    settings: ServerSettings,
    store: Arc<dyn PairingStore>,
    sink: Arc<dyn EventSink>,
    do_not_disturb: Arc<AtomicBool>,
    services: Option<RunningServices>,
}

impl DesktopServer {
    pub fn new(
        settings: ServerSettings,
        store: Arc<dyn PairingStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            settings,
            store,
            sink,
            do_not_disturb: Arc::new(AtomicBool::new(false)),
            services: None,
        }
    }

    /// Binds both sockets and starts serving.
    ///
    /// Returns the address both services are bound to.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::AlreadyRunning`] if called twice without
    /// [`stop`](Self::stop), or the bind error of whichever service failed;
    /// check [`ServeError::is_bind_conflict`] for the "port in use" case.
    pub async fn start(&mut self) -> Result<SocketAddr, ServeError> {
        if self.services.is_some() {
            return Err(ServeError::AlreadyRunning);
        }

        let events = start_event_server(
            self.settings.bind_addr,
            Arc::clone(&self.store),
            Arc::clone(&self.sink),
        )
        .await?;

        let udp_addr = SocketAddr::new(self.settings.bind_addr.ip(), events.local_addr().port());
        let responder = match start_discovery_responder(
            udp_addr,
            Arc::clone(&self.store),
            self.settings.host_name.clone(),
            Arc::clone(&self.do_not_disturb),
        ) {
            Ok(responder) => responder,
            Err(e) => {
                events.stop().await;
                return Err(e.into());
            }
        };

        let addr = responder.local_addr();
        info!(
            host_name = self.settings.host_name.as_deref().unwrap_or("<none>"),
            "DrinViewer desktop serving on {addr}"
        );
        self.services = Some(RunningServices { responder, events });
        Ok(addr)
    }

    /// Stops both services.  Does nothing if not running.
    pub async fn stop(&mut self) {
        let Some(services) = self.services.take() else {
            return;
        };
        services.events.stop().await;
        let responder = services.responder;
        if tokio::task::spawn_blocking(move || responder.join())
            .await
            .is_err()
        {
            warn!("discovery responder did not shut down cleanly");
        }
        info!("DrinViewer desktop stopped");
    }

    pub fn is_running(&self) -> bool {
        self.services
            .as_ref()
            .is_some_and(|s| s.responder.is_running() && s.events.is_running())
    }

    /// The address both services are bound to, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.services.as_ref().map(|s| s.responder.local_addr())
    }

    /// Turns do-not-disturb on or off.  Takes effect on the next request.
    pub fn set_do_not_disturb(&self, enabled: bool) {
        self.do_not_disturb.store(enabled, Ordering::Relaxed);
        info!(enabled, "do-not-disturb changed");
    }

    pub fn do_not_disturb(&self) -> bool {
        self.do_not_disturb.load(Ordering::Relaxed)
    }
}

/// Picks the name sent in discovery replies.
///
/// A configured name wins over the OS host name.  The result never contains
/// the field separator, and an empty result becomes `None`.
pub fn resolve_host_name(configured: Option<&str>) -> Option<String> {
    let raw = configured
        .map(str::to_string)
        .filter(|n| !n.trim().is_empty())
        .or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
        })?;

    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c == ':' || c.is_control() { '-' } else { c })
        .collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
