//! Use case: pair with desktops and send them events.
//!
//! Works on the hosts already in the shared [`HostRegistry`]; run discovery
//! first.  Pairing results are written back into the registry so the next
//! fan-out goes to the right set of desktops.

use std::net::IpAddr;
use std::sync::Arc;

use drin_core::protocol::codec::encode_event_payload;
use drin_core::{DrinEvent, HostRecord, HostRegistry, ProtocolError};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::infrastructure::network::pairing::{PairingSession, SessionError};

/// Error type for single-host operations.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The address is not in the registry.
    #[error("no discovered DrinViewer host at {0}")]
    UnknownHost(IpAddr),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Outcome of one delivery in a fan-out.
#[derive(Debug)]
pub struct DeliveryReport {
    pub host: HostRecord,
    pub result: Result<(), SessionError>,
}

/// Pairing and event delivery against discovered hosts.
pub struct NotifyHostsUseCase {
    registry: Arc<HostRegistry>,
    session: PairingSession,
    device_id: String,
}

impl NotifyHostsUseCase {
    pub fn new(
        registry: Arc<HostRegistry>,
        session: PairingSession,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            session,
            device_id: device_id.into(),
        }
    }

    /// Flips the pairing state of the host at `address`.
    ///
    /// Returns the new state, which is also stored in the registry.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::UnknownHost`] if discovery has not seen the
    /// address, or [`NotifyError::Session`] if the desktop could not be
    /// reached.  The registry is left unchanged on error.
    pub async fn toggle_pairing(&self, address: IpAddr) -> Result<bool, NotifyError> {
        let host = self
            .registry
            .find(address)
            .ok_or(NotifyError::UnknownHost(address))?;

        let paired = self.session.toggle_pairing(&host, &self.device_id).await?;
        self.registry.set_paired(address, paired);
        Ok(paired)
    }

    /// Sends `event` to the host at `address`, paired or not.
    ///
    /// # Errors
    ///
    /// Same as [`toggle_pairing`](Self::toggle_pairing).
    pub async fn send_event(&self, address: IpAddr, event: &DrinEvent) -> Result<(), NotifyError> {
        let host = self
            .registry
            .find(address)
            .ok_or(NotifyError::UnknownHost(address))?;
        self.session.send_event(&host, event).await?;
        Ok(())
    }

    /// Sends `event` to every paired host concurrently.
    ///
    /// One failing host never stops the others.  Reports come back in
    /// registry order.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] only if the event itself cannot be encoded,
    /// in which case nothing is sent.
    pub async fn notify_paired_hosts(
        &self,
        event: &DrinEvent,
    ) -> Result<Vec<DeliveryReport>, ProtocolError> {
        let payload: Arc<[u8]> = encode_event_payload(event)?.into();
        let hosts = self.registry.paired_hosts();
        if hosts.is_empty() {
            info!("no paired hosts to notify");
            return Ok(Vec::new());
        }

        let mut tasks = JoinSet::new();
        for (index, host) in hosts.into_iter().enumerate() {
            let session = self.session;
            let payload = Arc::clone(&payload);
            tasks.spawn(async move {
                let result = session.send_encoded(host.address, &payload).await;
                (index, DeliveryReport { host, result })
            });
        }

        let mut reports = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report)) => {
                    match &report.result {
                        Ok(()) => info!("event delivered to {}", report.host),
                        Err(e) => warn!("event not delivered to {}: {e}", report.host),
                    }
                    reports.push((index, report));
                }
                Err(e) => error!("delivery task failed: {e}"),
            }
        }

        reports.sort_by_key(|(index, _)| *index);
        Ok(reports.into_iter().map(|(_, report)| report).collect())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
