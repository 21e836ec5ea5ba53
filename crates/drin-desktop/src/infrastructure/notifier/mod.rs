//! Event sinks: where delivered notifications end up.
//!
//! The desktop UI (tray icon, popup windows) is not part of this crate.  The
//! [`EventSink`] trait is the seam it plugs into; the server only knows that
//! it hands each decoded [`DrinEvent`] to a sink.
//!
//! Two sinks ship here:
//!
//! - [`LogEventSink`] writes events to the `tracing` log.  The headless
//!   binary uses it.
//! - [`ChannelEventSink`] forwards events over a Tokio channel so another
//!   task (a UI bridge, or a test) can consume them.

use async_trait::async_trait;
use drin_core::DrinEvent;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

/// Error returned when a sink cannot accept an event.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The consuming side of a channel sink has gone away.
    #[error("event sink receiver closed")]
    Closed,
}

/// Receives events for display.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Hands `event` over for display.  Must not block for long: the server
    /// awaits this on the connection's task.
    async fn deliver(&self, event: DrinEvent) -> Result<(), SinkError>;
}

/// Writes every event to the log at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn deliver(&self, event: DrinEvent) -> Result<(), SinkError> {
        info!(
            title = %event.title,
            message = %event.message,
            action = ?event.action,
            image_bytes = event.image.as_ref().map_or(0, Vec::len),
            "event received"
        );
        Ok(())
    }
}

/// Forwards events to an `mpsc` receiver.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<DrinEvent>,
}

impl ChannelEventSink {
    /// Creates a sink and the receiver that drains it.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DrinEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn deliver(&self, event: DrinEvent) -> Result<(), SinkError> {
        self.tx.send(event).await.map_err(|_| SinkError::Closed)
    }
}
