//! Use case: find the DrinViewer desktops on the LAN.
//!
//! [`DiscoverHostsUseCase`] owns the discovery lifecycle for one registry:
//! start a round, stop it, change the broadcast address, or clear the
//! results.  A UI can subscribe to [`DiscoveryEvent`]s instead of polling.
//!
//! # Observer relay
//!
//! With an observer attached, hosts go through the registry's single-slot
//! relay and a dedicated consumer thread turns each hand-off into a
//! [`DiscoveryEvent::HostDiscovered`]:
//!
//! ```text
//!  drin-discover thread ─ publish ─► HostRegistry ─ consume_latest ─► drin-discover-relay
//!                                                                           │
//!                                         Started, HostDiscovered(..), Done ▼
//!                                                                   mpsc::UnboundedSender
//! ```
//!
//! When the relay ends, the consumer waits for the discovery thread and then
//! sweeps any record that was appended after the last hand-off, so the
//! observer sees every host of the round before `Done`.

use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use drin_core::{HostRecord, HostRegistry};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::infrastructure::network::discovery::{
    start_discovery, DiscoveryError, DiscoveryHandle, DiscoverySettings, DiscoveryStopper,
    HandoffMode,
};

/// Progress notifications for an observer (typically the UI).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// The host list was emptied outside a discovery round.
    CollectionReset,
    /// A discovery round began.
    Started,
    /// A new host answered.
    HostDiscovered(HostRecord),
    /// The round ended; no more `HostDiscovered` until the next `Started`.
    Done,
}

/// One discovery round in flight.
enum Round {
    /// No observer: the handle is joined directly.
    Direct(DiscoveryHandle),
    /// With observer: the relay thread owns and joins the discovery handle.
    Observed {
        stopper: DiscoveryStopper,
        relay: JoinHandle<()>,
    },
}

impl Round {
    fn stop(&self) {
        match self {
            Round::Direct(handle) => handle.stop(),
            Round::Observed { stopper, .. } => stopper.stop(),
        }
    }

    fn join(self) {
        match self {
            Round::Direct(handle) => handle.join(),
            Round::Observed { relay, .. } => {
                if relay.join().is_err() {
                    error!("discovery relay thread panicked");
                }
            }
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            Round::Direct(handle) => handle.is_finished(),
            Round::Observed { relay, .. } => relay.is_finished(),
        }
    }
}

/// Discovery front-end for the mobile side.
pub struct DiscoverHostsUseCase {
    registry: Arc<HostRegistry>,
    device_id: String,
    settings: DiscoverySettings,
    broadcast: Mutex<IpAddr>,
    handoff: HandoffMode,
    observer: Option<mpsc::UnboundedSender<DiscoveryEvent>>,
    round: Mutex<Option<Round>>,
}

impl DiscoverHostsUseCase {
    /// Creates the use case.  No round is started yet.
    pub fn new(
        registry: Arc<HostRegistry>,
        device_id: impl Into<String>,
        settings: DiscoverySettings,
        broadcast: IpAddr,
    ) -> Self {
        Self {
            registry,
            device_id: device_id.into(),
            settings,
            broadcast: Mutex::new(broadcast),
            handoff: HandoffMode::Bulk,
            observer: None,
            round: Mutex::new(None),
        }
    }

    /// Attaches an observer.  Switches hand-off to [`HandoffMode::Relay`]
    /// with an internal consumer.
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<DiscoveryEvent>) -> Self {
        self.observer = Some(observer);
        self.handoff = HandoffMode::Relay;
        self
    }

    /// Chooses how hosts enter the registry when no observer is attached.
    ///
    /// With [`HandoffMode::Relay`] the caller must drain
    /// [`consume_latest`](Self::consume_latest) while a round runs.
    pub fn with_handoff(mut self, mode: HandoffMode) -> Self {
        if self.observer.is_none() {
            self.handoff = mode;
        }
        self
    }

    fn round(&self) -> MutexGuard<'_, Option<Round>> {
        self.round.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broadcast(&self) -> IpAddr {
        *self.broadcast.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a new round, stopping any round still running.
    ///
    /// The registry is cleared as part of the start.
    ///
    /// # Errors
    ///
    /// See [`start_discovery`].
    pub fn start_discovery(&self) -> Result<(), DiscoveryError> {
        let mut round = self.round();
        if let Some(previous) = round.take() {
            previous.stop();
            previous.join();
        }

        let handle = start_discovery(
            self.broadcast(),
            &self.device_id,
            self.settings,
            Arc::clone(&self.registry),
            self.handoff,
        )?;

        *round = Some(match &self.observer {
            None => Round::Direct(handle),
            Some(observer) => {
                let stopper = handle.stopper();
                let registry = Arc::clone(&self.registry);
                let observer = observer.clone();
                let spawned = std::thread::Builder::new()
                    .name("drin-discover-relay".to_string())
                    .spawn(move || relay_round(&registry, handle, &observer));
                match spawned {
                    Ok(relay) => Round::Observed { stopper, relay },
                    Err(e) => {
                        // The handle moved into the failed closure and was
                        // dropped; the run must not outlive it.
                        stopper.stop();
                        return Err(DiscoveryError::ThreadSpawn(e));
                    }
                }
            }
        });
        Ok(())
    }

    /// Stops the current round and waits for it to wind down.  Does nothing
    /// when idle.
    pub fn stop_discovery(&self) {
        if let Some(round) = self.round().take() {
            round.stop();
            round.join();
            info!("discovery stopped");
        }
    }

    /// Waits for the current round to end on its own.
    pub fn wait_until_done(&self) {
        if let Some(round) = self.round().take() {
            round.join();
        }
    }

    /// Returns `true` while a round is running.
    pub fn is_discovering(&self) -> bool {
        self.round().as_ref().is_some_and(|r| !r.is_finished())
    }

    /// Takes the next relayed host, blocking while the round runs.
    ///
    /// Returns `None` once the round is over.  Only meaningful with
    /// [`HandoffMode::Relay`] and no observer attached.
    pub fn consume_latest(&self) -> Option<HostRecord> {
        self.registry.consume_latest()
    }

    /// Changes where discovery requests are sent.  A running round is
    /// restarted with the new address.
    ///
    /// # Errors
    ///
    /// See [`start_discovery`](Self::start_discovery).
    pub fn set_broadcast_address(&self, address: IpAddr) -> Result<(), DiscoveryError> {
        *self.broadcast.lock().unwrap_or_else(PoisonError::into_inner) = address;
        info!("broadcast address set to {address}");
        if self.is_discovering() {
            self.start_discovery()?;
        }
        Ok(())
    }

    /// Stops any round and empties the host list.
    pub fn reset_collection(&self) {
        self.stop_discovery();
        self.registry.clear();
        if let Some(observer) = &self.observer {
            notify(observer, DiscoveryEvent::CollectionReset);
        }
    }

    /// Every host found so far, in discovery order.
    pub fn hosts(&self) -> Vec<HostRecord> {
        self.registry.snapshot()
    }

    /// The registry shared with other use cases.
    pub fn registry(&self) -> Arc<HostRegistry> {
        Arc::clone(&self.registry)
    }
}

impl Drop for DiscoverHostsUseCase {
    fn drop(&mut self) {
        if let Some(round) = self.round().take() {
            round.stop();
        }
    }
}

/// Body of the relay thread.
fn relay_round(
    registry: &HostRegistry,
    discovery: DiscoveryHandle,
    observer: &mpsc::UnboundedSender<DiscoveryEvent>,
) {
    notify(observer, DiscoveryEvent::Started);

    let mut delivered = 0;
    while let Some(host) = registry.consume_latest() {
        delivered += 1;
        notify(observer, DiscoveryEvent::HostDiscovered(host));
    }

    discovery.join();
    while let Some(host) = registry.get(delivered) {
        delivered += 1;
        notify(observer, DiscoveryEvent::HostDiscovered(host));
    }

    notify(observer, DiscoveryEvent::Done);
}

fn notify(observer: &mpsc::UnboundedSender<DiscoveryEvent>, event: DiscoveryEvent) {
    if observer.send(event).is_err() {
        debug!("discovery observer is gone");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
